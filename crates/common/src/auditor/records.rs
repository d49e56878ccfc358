//! Record consistency checks

use super::{duplicates, AuditReport, CheckResult};
use crate::db::models::*;
use crate::errors::Result;
use crate::oaiset::{community_spec, COMMUNITY_SET_PREFIX, OAI_PID_TYPE};
use crate::records;
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QuerySelect};
use serde_json::{json, Value};
use std::collections::{BTreeSet, HashSet};
use tracing::{info, instrument};
use uuid::Uuid;

/// Reference data the record checks resolve against
#[derive(Debug, Clone, Default)]
pub struct AuditContext {
    pub communities: HashSet<String>,
    pub owners: HashSet<i64>,
    /// Specs of pattern-based sets
    pub pattern_sets: HashSet<String>,
    pub oai_pids: HashSet<String>,
}

impl AuditContext {
    pub async fn load<C: ConnectionTrait>(db: &C) -> Result<Self> {
        let communities: Vec<String> = CommunityEntity::find()
            .select_only()
            .column(CommunityColumn::Id)
            .into_tuple()
            .all(db)
            .await?;
        let owners: Vec<i32> = UserEntity::find()
            .select_only()
            .column(UserColumn::Id)
            .into_tuple()
            .all(db)
            .await?;
        let pattern_sets: Vec<String> = OaiSetEntity::find()
            .select_only()
            .column(OaiSetColumn::Spec)
            .filter(OaiSetColumn::SearchPattern.is_not_null())
            .into_tuple()
            .all(db)
            .await?;
        let oai_pids: Vec<String> = PidEntity::find()
            .select_only()
            .column(PidColumn::PidValue)
            .filter(PidColumn::PidType.eq(OAI_PID_TYPE))
            .into_tuple()
            .all(db)
            .await?;

        Ok(Self {
            communities: communities.into_iter().collect(),
            owners: owners.into_iter().map(i64::from).collect(),
            pattern_sets: pattern_sets.into_iter().collect(),
            oai_pids: oai_pids.into_iter().collect(),
        })
    }
}

fn strings(record: &Value, pointer: &str) -> Vec<String> {
    record
        .pointer(pointer)
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).map(String::from).collect())
        .unwrap_or_default()
}

fn check_communities(record: &Value, ctx: &AuditContext, check: &mut CheckResult) {
    let communities = strings(record, "/communities");
    let unresolvable: BTreeSet<&String> = communities
        .iter()
        .filter(|c| !ctx.communities.contains(*c))
        .collect();
    if !unresolvable.is_empty() {
        check.issue("communities", "unresolvable", json!(unresolvable));
    }
    let dups = duplicates(communities.iter().cloned());
    if !dups.is_empty() {
        check.issue("communities", "duplicates", json!(dups));
    }
}

fn check_owners(record: &Value, ctx: &AuditContext, check: &mut CheckResult) {
    let owners: Vec<i64> = record
        .get("owners")
        .and_then(Value::as_array)
        .map(|o| o.iter().filter_map(Value::as_i64).collect())
        .unwrap_or_default();

    if owners.is_empty() {
        check.issue("owners", "missing", json!(true));
    }
    let dups = duplicates(owners.iter().copied());
    if !dups.is_empty() {
        check.issue("owners", "duplicates", json!(dups));
    }
    let unresolvable: BTreeSet<i64> = owners.into_iter().filter(|o| !ctx.owners.contains(o)).collect();
    if !unresolvable.is_empty() {
        check.issue("owners", "unresolvable", json!(unresolvable));
    }
}

fn check_files(record: &Value, check: &mut CheckResult) {
    let files = record
        .get("_files")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    if files.is_empty() {
        check.issue("files", "missing", json!(true));
        return;
    }

    let field = |f: &Value, key: &str| f.get(key).and_then(Value::as_str).unwrap_or_default().to_string();

    let dup_keys = duplicates(files.iter().map(|f| field(f, "key")));
    let dup_versions = duplicates(files.iter().map(|f| field(f, "version_id")));
    let duplicate_files: Vec<&Value> = files
        .iter()
        .filter(|f| dup_keys.contains(&field(f, "key")) || dup_versions.contains(&field(f, "version_id")))
        .collect();
    if !duplicate_files.is_empty() {
        check.issue("files", "duplicates", json!(duplicate_files));
    }

    let no_checksum: Vec<String> = files
        .iter()
        .filter(|f| field(f, "checksum").is_empty())
        .map(|f| field(f, "key"))
        .collect();
    if !no_checksum.is_empty() {
        check.issue("files", "missing_checksum", json!(no_checksum));
    }

    let buckets: BTreeSet<String> = files.iter().map(|f| field(f, "bucket")).collect();
    if buckets.len() > 1 {
        check.issue("files", "multiple_buckets", json!(buckets));
    }

    let record_bucket = record.pointer("/_buckets/record").and_then(Value::as_str);
    let mismatch: Vec<&Value> = files
        .iter()
        .filter(|f| f.get("bucket").and_then(Value::as_str) != record_bucket)
        .collect();
    if !mismatch.is_empty() {
        check.issue("files", "bucket_mismatch", json!(mismatch));
    }
}

fn check_grants(record: &Value, check: &mut CheckResult) {
    let ids: Vec<String> = record
        .get("grants")
        .and_then(Value::as_array)
        .map(|grants| {
            grants
                .iter()
                .filter_map(|g| {
                    g.as_str()
                        .or_else(|| g.get("identifier").and_then(Value::as_str))
                        .map(String::from)
                })
                .collect()
        })
        .unwrap_or_default();
    let dups = duplicates(ids);
    if !dups.is_empty() {
        check.issue("grants", "duplicates", json!(dups));
    }
}

fn check_oai(record: &Value, ctx: &AuditContext, check: &mut CheckResult) {
    let id = record.pointer("/_oai/id").and_then(Value::as_str);
    match id {
        None => check.issue("oai", "missing_id", json!(true)),
        Some(id) if !ctx.oai_pids.contains(id) => check.issue("oai", "non_minted_pid", json!(id)),
        Some(_) => {}
    }
    if record.pointer("/_oai/updated").and_then(Value::as_str).is_none() {
        check.issue("oai", "missing_updated", json!(true));
    }

    let sets = strings(record, "/_oai/sets");
    let dups = duplicates(sets.iter().cloned());
    if !dups.is_empty() {
        check.issue("oai", "duplicate_oai_sets", json!(dups));
    }

    let community_sets: BTreeSet<String> = sets
        .into_iter()
        .filter(|s| s.starts_with(COMMUNITY_SET_PREFIX) && !ctx.pattern_sets.contains(s))
        .collect();
    let expected: BTreeSet<String> = strings(record, "/communities")
        .iter()
        .map(|c| community_spec(c))
        .collect();

    let missing: Vec<&String> = expected.difference(&community_sets).collect();
    if !missing.is_empty() {
        check.issue("oai", "missing_oai_sets", json!(missing));
    }
    let redundant: Vec<&String> = community_sets.difference(&expected).collect();
    if !redundant.is_empty() {
        check.issue("oai", "redundant_oai_sets", json!(redundant));
    }
}

/// Run every record check
pub fn check_record(record: &Record, ctx: &AuditContext) -> CheckResult {
    let mut check = CheckResult::new(json!({
        "recid": record.json.get("recid"),
        "object_uuid": record.id.to_string(),
    }));

    check_communities(&record.json, ctx, &mut check);
    check_files(&record.json, &mut check);
    check_owners(&record.json, ctx, &mut check);
    check_grants(&record.json, &mut check);
    check_oai(&record.json, ctx, &mut check);
    check
}

/// Audit the given records, or every record when `ids` is empty
#[instrument(skip(db, ids), fields(requested = ids.len()))]
pub async fn audit_records<C: ConnectionTrait>(db: &C, ids: &[Uuid]) -> Result<AuditReport> {
    let ctx = AuditContext::load(db).await?;
    let mut report = AuditReport::new();

    if ids.is_empty() {
        for record in records::all(db).await? {
            report.push(check_record(&record, &ctx));
        }
    } else {
        for id in ids {
            let record = records::get(db, *id).await?;
            report.push(check_record(&record, &ctx));
        }
    }

    info!(checked = report.checked, failed = report.failed.len(), "Record audit finished");
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn ctx() -> AuditContext {
        AuditContext {
            communities: ["c1".to_string()].into(),
            owners: [1].into(),
            pattern_sets: ["user-pattern".to_string()].into(),
            oai_pids: ["oai:zenodo.org:1".to_string()].into(),
        }
    }

    fn record(json: Value) -> Record {
        Record {
            id: Uuid::nil(),
            json,
            version_id: 1,
            created: Utc::now().into(),
            updated: Utc::now().into(),
        }
    }

    #[test]
    fn test_clean_record() {
        let r = record(json!({
            "recid": 1,
            "owners": [1],
            "communities": ["c1"],
            "grants": [{"identifier": "g1"}],
            "_buckets": {"record": "b1"},
            "_files": [{"key": "a.txt", "bucket": "b1", "version_id": "v1", "checksum": "sha256:aa"}],
            "_oai": {"id": "oai:zenodo.org:1", "updated": "2020-01-01T00:00:00Z", "sets": ["user-c1", "user-pattern"]}
        }));
        let check = check_record(&r, &ctx());
        assert!(check.is_ok(), "{:?}", check.issues);
    }

    #[test]
    fn test_record_issues() {
        let r = record(json!({
            "recid": 2,
            "owners": [1, 1, 5],
            "communities": ["c1", "c1", "zz"],
            "grants": ["g1", "g1"],
            "_buckets": {"record": "b1"},
            "_files": [
                {"key": "a.txt", "bucket": "b1", "version_id": "v1", "checksum": "sha256:aa"},
                {"key": "a.txt", "bucket": "b2", "version_id": "v2"}
            ],
            "_oai": {"id": "oai:zenodo.org:2", "sets": ["user-c1", "user-c1", "user-gone"]}
        }));
        let check = check_record(&r, &ctx());

        assert_eq!(check.issues["communities"]["unresolvable"], json!(["zz"]));
        assert_eq!(check.issues["communities"]["duplicates"], json!(["c1"]));
        assert_eq!(check.issues["owners"]["duplicates"], json!([1]));
        assert_eq!(check.issues["owners"]["unresolvable"], json!([5]));
        assert_eq!(check.issues["grants"]["duplicates"], json!(["g1"]));
        assert_eq!(check.issues["files"]["duplicates"].as_array().unwrap().len(), 2);
        assert_eq!(check.issues["files"]["missing_checksum"], json!(["a.txt"]));
        assert_eq!(check.issues["files"]["multiple_buckets"], json!(["b1", "b2"]));
        assert_eq!(check.issues["files"]["bucket_mismatch"].as_array().unwrap().len(), 1);
        assert_eq!(check.issues["oai"]["non_minted_pid"], "oai:zenodo.org:2");
        assert_eq!(check.issues["oai"]["missing_updated"], true);
        assert_eq!(check.issues["oai"]["duplicate_oai_sets"], json!(["user-c1"]));
        assert_eq!(check.issues["oai"]["missing_oai_sets"], json!(["user-zz"]));
        assert_eq!(check.issues["oai"]["redundant_oai_sets"], json!(["user-gone"]));
    }

    #[test]
    fn test_missing_files_and_owners() {
        let check = check_record(&record(json!({"recid": 3})), &ctx());
        assert_eq!(check.issues["files"]["missing"], true);
        assert_eq!(check.issues["owners"]["missing"], true);
        assert_eq!(check.issues["oai"]["missing_id"], true);
    }
}
