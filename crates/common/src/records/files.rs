//! Operator edits to the files of a published record
//!
//! The record bucket is unlocked for one edit and locked again inside the
//! same transaction. `_files` is rebuilt from the bucket, keeping the access
//! rule already stored on the record.

use super::{commit, get_by_recid};
use crate::db::models::Record;
use crate::deposit::firerole::Firerole;
use crate::errors::{AppError, Result};
use crate::pipeline::postprocess::file_entries;
use crate::services::Services;
use crate::storage::ObjectInfo;
use crate::tasks::Task;
use chrono::NaiveDate;
use sea_orm::TransactionTrait;
use serde_json::Value;
use tracing::{info, instrument};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileEdit {
    Add { key: String, data: Vec<u8> },
    Remove { key: String },
    Rename { key: String, new_key: String },
}

impl FileEdit {
    fn name(&self) -> &'static str {
        match self {
            FileEdit::Add { .. } => "add",
            FileEdit::Remove { .. } => "remove",
            FileEdit::Rename { .. } => "rename",
        }
    }
}

fn bucket_of(record: &Record) -> Result<Uuid> {
    record.record_bucket().ok_or_else(|| AppError::Integrity {
        message: format!("Record {} has no record bucket", record.id),
    })
}

/// The rule stored on the first file, or one derived from the access right
fn restriction_of(json: &Value) -> Result<Firerole> {
    let stored = json
        .get("_files")
        .and_then(Value::as_array)
        .and_then(|files| files.first())
        .and_then(|f| f.get("restriction"))
        .and_then(Value::as_str);
    if let Some(text) = stored {
        return Firerole::parse(text);
    }

    let access = json.get("access_right").and_then(Value::as_str).unwrap_or("open");
    let embargo = json
        .get("embargo_date")
        .and_then(Value::as_str)
        .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok());
    Ok(Firerole::for_access(access, "", embargo))
}

pub async fn list_files(services: &Services, recid: &str) -> Result<Vec<ObjectInfo>> {
    let db = services.db.read();
    let record = get_by_recid(db, &services.pids, recid).await?;
    services.storage.list(db, bucket_of(&record)?).await
}

/// Apply one edit and commit a new record revision
#[instrument(skip(services, edit), fields(edit = edit.name()))]
pub async fn edit_files(services: &Services, recid: &str, edit: FileEdit) -> Result<Record> {
    let storage = &services.storage;
    let txn = services.db.write().begin().await?;

    let record = get_by_recid(&txn, &services.pids, recid).await?;
    let bucket = bucket_of(&record)?;

    if let FileEdit::Remove { key } = &edit {
        let remaining = storage.list(&txn, bucket).await?;
        if remaining.len() == 1 && remaining[0].key == *key {
            return Err(AppError::precondition("A published record must keep at least one file."));
        }
    }

    storage.set_locked(&txn, bucket, false).await?;
    match &edit {
        FileEdit::Add { key, data } => {
            storage.add_object(&txn, bucket, key, data).await?;
        }
        FileEdit::Remove { key } => storage.remove_object(&txn, bucket, key).await?,
        FileEdit::Rename { key, new_key } => {
            storage.rename_object(&txn, bucket, key, new_key).await?;
        }
    }
    storage.set_locked(&txn, bucket, true).await?;

    let files = storage.list(&txn, bucket).await?;
    let restriction = restriction_of(&record.json)?;
    let mut json = record.json.clone();
    if let Some(obj) = json.as_object_mut() {
        obj.insert("_files".into(), Value::Array(file_entries(&files, &restriction)));
    }
    let record = commit(&txn, record, json).await?;
    txn.commit().await?;

    info!(recid = %recid, files = files.len(), "Record files updated");
    services.queue.push(Task::IndexRecord { record_id: record.id }).await?;
    Ok(record)
}
