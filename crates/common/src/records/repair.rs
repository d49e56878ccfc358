//! Repair of `_files` entries pointing at the wrong bucket

use super::{commit, get, revisions};
use crate::db::models::Record;
use crate::errors::Result;
use sea_orm::ConnectionTrait;
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

/// Keys of a file entry that repair may rewrite
const REPAIRABLE_KEYS: &[&str] = &["bucket", "version_id"];

/// Whether some `_files[].bucket` differs from `_buckets.record`
pub fn has_corrupted_files_meta(json: &Value) -> bool {
    let record_bucket = json.get("_buckets").and_then(|b| b.get("record"));
    json.get("_files")
        .and_then(Value::as_array)
        .map(|files| files.iter().any(|f| f.get("bucket") != record_bucket))
        .unwrap_or(false)
}

/// Restore `_files` (and `_internal`) from the newest sound revision.
///
/// The files list is only replaced when the two lists hold the same entries
/// differing at most in `bucket`/`version_id`. Returns the committed record
/// when anything changed.
pub async fn repair_record_metadata<C: ConnectionTrait>(db: &C, id: Uuid) -> Result<Option<Record>> {
    let record = get(db, id).await?;
    if !has_corrupted_files_meta(&record.json) {
        return Ok(None);
    }

    let history = revisions(db, id).await?;
    let Some(good) = history.iter().rev().find(|r| !has_corrupted_files_meta(&r.json)) else {
        warn!(record_id = %id, "No sound revision to repair from");
        return Ok(None);
    };

    let mut json = record.json.clone();
    let Some(obj) = json.as_object_mut() else {
        return Ok(None);
    };

    if let Some(internal) = good.json.get("_internal") {
        obj.insert("_internal".into(), internal.clone());
    }

    let current = record.json.get("_files").cloned().unwrap_or(Value::Array(vec![]));
    let reference = good.json.get("_files").cloned().unwrap_or(Value::Array(vec![]));
    if files_diff_safe(&current, &reference) {
        obj.insert("_files".into(), reference);
    } else {
        warn!(record_id = %id, "Files differ beyond bucket pointers, leaving _files untouched");
    }

    if json == record.json {
        return Ok(None);
    }

    let record = commit(db, record, json).await?;
    info!(record_id = %id, revision = good.version_id, "Record metadata repaired");
    Ok(Some(record))
}

fn files_diff_safe(current: &Value, reference: &Value) -> bool {
    let (Some(current), Some(reference)) = (current.as_array(), reference.as_array()) else {
        return false;
    };
    if current.len() != reference.len() {
        return false;
    }

    current.iter().zip(reference).all(|(a, b)| {
        let (Some(a), Some(b)) = (a.as_object(), b.as_object()) else {
            return false;
        };
        let same_keys = a.len() == b.len() && a.keys().all(|k| b.contains_key(k));
        same_keys
            && a.iter()
                .all(|(k, v)| REPAIRABLE_KEYS.contains(&k.as_str()) || b.get(k) == Some(v))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DbPool;
    use crate::records::create;
    use serde_json::json;

    fn sound() -> Value {
        json!({
            "_buckets": {"record": "b1"},
            "_files": [{"key": "a.txt", "bucket": "b1", "version_id": "v1", "checksum": "sha256:aa"}],
            "_internal": {"preservation_score": 100}
        })
    }

    #[test]
    fn test_corruption_detection() {
        assert!(!has_corrupted_files_meta(&sound()));

        let mut broken = sound();
        broken["_files"][0]["bucket"] = json!("b2");
        assert!(has_corrupted_files_meta(&broken));
    }

    #[tokio::test]
    async fn test_repair_restores_bucket_pointers() {
        let pool = DbPool::in_memory().await.unwrap();
        let db = pool.write();
        let id = Uuid::new_v4();

        let record = create(db, id, sound()).await.unwrap();
        let mut broken = sound();
        broken["_files"][0]["bucket"] = json!("b2");
        broken["_files"][0]["version_id"] = json!("v2");
        broken["_internal"] = json!({});
        crate::records::commit(db, record, broken).await.unwrap();

        let repaired = repair_record_metadata(db, id).await.unwrap().unwrap();
        assert_eq!(repaired.json, sound());
        assert!(repair_record_metadata(db, id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_repair_refuses_unsafe_diff() {
        let pool = DbPool::in_memory().await.unwrap();
        let db = pool.write();
        let id = Uuid::new_v4();

        let record = create(db, id, sound()).await.unwrap();
        let mut broken = sound();
        broken["_files"][0]["bucket"] = json!("b2");
        broken["_files"][0]["checksum"] = json!("sha256:bb");
        crate::records::commit(db, record, broken.clone()).await.unwrap();

        let repaired = repair_record_metadata(db, id).await.unwrap();
        assert!(repaired.is_none());
    }
}
