//! Preservation meter
//!
//! Scores how well the file formats of a record lend themselves to long-term
//! preservation. The score is the mean of per-file quality values and is
//! stored under `_internal.preservation_score`.

use crate::db::models::Record;
use crate::errors::Result;
use crate::records;
use sea_orm::ConnectionTrait;
use serde_json::{json, Map, Value};
use tracing::{debug, instrument};
use uuid::Uuid;

/// Quality of a single file, by extension
pub fn file_quality(key: &str) -> u32 {
    let extension = key
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "csv" | "pdf" => 100,
        "txt" | "odt" => 95,
        "xlsx" | "docx" => 60,
        "xls" | "doc" => 40,
        _ => 0,
    }
}

/// Mean quality of the given file keys; `None` without files
pub fn score<'a>(keys: impl IntoIterator<Item = &'a str>) -> Option<u32> {
    let qualities: Vec<u32> = keys.into_iter().map(file_quality).collect();
    if qualities.is_empty() {
        return None;
    }
    Some(qualities.iter().sum::<u32>() / qualities.len() as u32)
}

fn file_keys(record: &Value) -> Vec<&str> {
    record
        .get("_files")
        .and_then(Value::as_array)
        .map(|files| files.iter().filter_map(|f| f.get("key").and_then(Value::as_str)).collect())
        .unwrap_or_default()
}

/// Compute and store the score of a record; unchanged scores are not committed
#[instrument(skip(db))]
pub async fn update_record_score<C: ConnectionTrait>(db: &C, record_id: Uuid) -> Result<Option<Record>> {
    let record = records::get(db, record_id).await?;
    let Some(score) = score(file_keys(&record.json)) else {
        debug!("Record has no files, skipping preservation score");
        return Ok(None);
    };

    if record.json.pointer("/_internal/preservation_score") == Some(&json!(score)) {
        return Ok(None);
    }

    let mut json = record.json.clone();
    if let Some(obj) = json.as_object_mut() {
        let internal = obj
            .entry("_internal")
            .or_insert_with(|| Value::Object(Map::new()));
        if let Some(internal) = internal.as_object_mut() {
            internal.insert("preservation_score".into(), json!(score));
        }
    }
    debug!(score, "Preservation score updated");
    records::commit(db, record, json).await.map(Some)
}
