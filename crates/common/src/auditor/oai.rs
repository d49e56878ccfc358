//! OAI set / community correspondence

use super::{AuditReport, CheckResult};
use crate::db::models::*;
use crate::errors::Result;
use crate::oaiset::{community_spec, COMMUNITY_SET_PREFIX};
use sea_orm::{ConnectionTrait, EntityTrait};
use serde_json::json;
use std::collections::HashSet;
use tracing::{info, instrument};

/// Check that communities and community sets match one to one
pub fn check_sets(communities: &[Community], sets: &[OaiSet]) -> Vec<CheckResult> {
    let specs: HashSet<&str> = sets.iter().map(|s| s.spec.as_str()).collect();
    let ids: HashSet<&str> = communities.iter().map(|c| c.id.as_str()).collect();
    let mut checks = Vec::new();

    for community in communities {
        let mut check = CheckResult::new(json!({"community": community.id}));
        let spec = community_spec(&community.id);
        if !specs.contains(spec.as_str()) {
            check.issue("oai", "missing_oai_set", json!(spec));
        }
        checks.push(check);
    }

    for set in sets {
        let Some(community_id) = set.spec.strip_prefix(COMMUNITY_SET_PREFIX) else {
            continue;
        };
        if set.search_pattern.is_some() {
            continue;
        }
        let mut check = CheckResult::new(json!({"oai_set": set.spec}));
        if !ids.contains(community_id) {
            check.issue("oai", "missing_community", json!(community_id));
        }
        checks.push(check);
    }

    checks
}

#[instrument(skip(db))]
pub async fn audit_oai_sets<C: ConnectionTrait>(db: &C) -> Result<AuditReport> {
    let communities = CommunityEntity::find().all(db).await?;
    let sets = OaiSetEntity::find().all(db).await?;

    let mut report = AuditReport::new();
    for check in check_sets(&communities, &sets) {
        report.push(check);
    }

    info!(checked = report.checked, failed = report.failed.len(), "OAI set audit finished");
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn community(id: &str) -> Community {
        Community {
            id: id.to_string(),
            title: id.to_uppercase(),
            owner_id: 1,
            created: Utc::now().into(),
            updated: Utc::now().into(),
        }
    }

    fn set(id: i32, spec: &str, pattern: Option<&str>) -> OaiSet {
        OaiSet {
            id,
            spec: spec.to_string(),
            name: None,
            description: None,
            search_pattern: pattern.map(String::from),
        }
    }

    #[test]
    fn test_check_sets() {
        let communities = vec![community("c1"), community("c2")];
        let sets = vec![
            set(1, "user-c1", None),
            set(2, "user-orphan", None),
            set(3, "user-pattern", Some("keywords:x")),
            set(4, "openaire", None),
        ];

        let failed: Vec<CheckResult> = check_sets(&communities, &sets)
            .into_iter()
            .filter(|c| !c.is_ok())
            .collect();

        assert_eq!(failed.len(), 2);
        assert_eq!(failed[0].subject, json!({"community": "c2"}));
        assert_eq!(failed[0].issues["oai"]["missing_oai_set"], "user-c2");
        assert_eq!(failed[1].issues["oai"]["missing_community"], "orphan");
    }
}
