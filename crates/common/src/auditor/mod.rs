//! Consistency audits
//!
//! Provides:
//! - File integrity verification and the periodic file audit ([`files`])
//! - Per-record consistency checks ([`records`])
//! - OAI set / community correspondence ([`oai`])
//!
//! Every check yields a [`CheckResult`] whose `issues` tree is empty when the
//! check passed. Failed checks are logged as JSON.

pub mod files;
pub mod oai;
pub mod records;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::hash::Hash;
use tracing::error;
use uuid::Uuid;

/// Outcome of one check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    /// What was checked (record, community, ...)
    pub subject: Value,
    /// Nested issue tree: `{category: {issue: details}}`
    pub issues: Map<String, Value>,
}

impl CheckResult {
    pub fn new(subject: Value) -> Self {
        Self {
            subject,
            issues: Map::new(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.issues.is_empty()
    }

    /// Record an issue under `category.name`
    pub fn issue(&mut self, category: &str, name: &str, details: Value) {
        let entry = self
            .issues
            .entry(category.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if let Some(map) = entry.as_object_mut() {
            map.insert(name.to_string(), details);
        }
    }
}

/// Results of one audit run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditReport {
    pub audit_id: Uuid,
    pub checked: usize,
    pub failed: Vec<CheckResult>,
}

impl AuditReport {
    pub fn new() -> Self {
        Self {
            audit_id: Uuid::new_v4(),
            checked: 0,
            failed: Vec::new(),
        }
    }

    /// Count a check and keep it when it failed
    pub fn push(&mut self, check: CheckResult) {
        self.checked += 1;
        if !check.is_ok() {
            error!(
                audit_id = %self.audit_id,
                check = %serde_json::to_string(&check).unwrap_or_default(),
                "Audit check failed"
            );
            self.failed.push(check);
        }
    }

    pub fn is_ok(&self) -> bool {
        self.failed.is_empty()
    }
}

impl Default for AuditReport {
    fn default() -> Self {
        Self::new()
    }
}

/// Items occurring more than once, in first-occurrence order
pub fn duplicates<T: Eq + Hash + Clone>(items: impl IntoIterator<Item = T>) -> Vec<T> {
    let mut counts: HashMap<T, usize> = HashMap::new();
    let mut order = Vec::new();
    for item in items {
        let count = counts.entry(item.clone()).or_insert(0);
        *count += 1;
        if *count == 2 {
            order.push(item);
        }
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_duplicates() {
        assert_eq!(duplicates(vec!["a", "b", "a", "c", "b", "a"]), vec!["a", "b"]);
        assert!(duplicates(Vec::<i32>::new()).is_empty());
    }

    #[test]
    fn test_check_result_and_report() {
        let mut ok = CheckResult::new(json!({"recid": 1}));
        assert!(ok.is_ok());

        let mut report = AuditReport::new();
        report.push(ok.clone());
        ok.issue("files", "missing", json!(true));
        ok.issue("files", "multiple_buckets", json!(["a", "b"]));
        report.push(ok);

        assert_eq!(report.checked, 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].issues["files"]["missing"], true);
        assert!(!report.is_ok());
    }
}
