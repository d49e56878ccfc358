//! File integrity verification
//!
//! `verify_file` recomputes a file instance's checksum from the blob store.
//! `audit_files` is the periodic job: it retries inconclusive checks, then
//! reports every file that is still bad to the site administrators.

use crate::db::models::*;
use crate::errors::{AppError, Result};
use crate::metrics;
use crate::notify::{Email, Mailer};
use crate::records;
use crate::storage::{checksum, FileStorage};
use chrono::Utc;
use sea_orm::{ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, EntityTrait, QueryFilter, Set};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Where a bad file is referenced from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FileOwner {
    Record { recid: String, record_id: Uuid },
    Deposit { depid: i32, deposit_id: Uuid },
}

/// One bad file with every bucket referencing it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BadFile {
    pub file_id: Uuid,
    pub uri: String,
    pub checksum: String,
    pub last_check: Option<bool>,
    pub buckets: BTreeMap<Uuid, Vec<FileOwner>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileAuditReport {
    pub retried: usize,
    pub bad_files: Vec<BadFile>,
}

impl FileAuditReport {
    /// Plain-text mail body
    pub fn render(&self) -> String {
        let mut body = format!("{} file(s) failed the integrity check.\n", self.bad_files.len());
        for file in &self.bad_files {
            let state = match file.last_check {
                Some(false) => "checksum mismatch",
                _ => "not verifiable",
            };
            body.push_str(&format!("\nFile {} ({}): {}\n", file.file_id, file.uri, state));
            for (bucket_id, owners) in &file.buckets {
                body.push_str(&format!("  bucket {}\n", bucket_id));
                for owner in owners {
                    match owner {
                        FileOwner::Record { recid, .. } => body.push_str(&format!("    record {}\n", recid)),
                        FileOwner::Deposit { depid, .. } => {
                            body.push_str(&format!("    deposition {}\n", depid))
                        }
                    }
                }
            }
        }
        body
    }
}

/// Recompute the checksum of a file instance and store the outcome.
///
/// Returns `None` when the content could not be read.
#[instrument(skip(db, storage))]
pub async fn verify_file<C: ConnectionTrait>(db: &C, storage: &FileStorage, file_id: Uuid) -> Result<Option<bool>> {
    let file = FileInstanceEntity::find_by_id(file_id)
        .one(db)
        .await?
        .ok_or_else(|| AppError::not_found("file", file_id))?;

    let outcome = match storage.blobs().get(&file.uri).await {
        Ok(data) => Some(checksum(&data) == file.checksum),
        Err(e) => {
            warn!(file_id = %file_id, uri = %file.uri, error = %e, "File content not readable");
            None
        }
    };

    if outcome == Some(false) {
        error!(file_id = %file_id, uri = %file.uri, "Checksum mismatch");
    }

    let mut active: FileInstanceActiveModel = file.into();
    active.last_check = Set(outcome);
    active.last_check_at = Set(Some(Utc::now().into()));
    active.update(db).await?;

    metrics::record_file_check(outcome);
    Ok(outcome)
}

async fn owners_by_bucket<C: ConnectionTrait>(db: &C) -> Result<HashMap<Uuid, Vec<FileOwner>>> {
    let mut owners: HashMap<Uuid, Vec<FileOwner>> = HashMap::new();

    for record in records::all(db).await? {
        if let Some(bucket_id) = record.record_bucket() {
            owners.entry(bucket_id).or_default().push(FileOwner::Record {
                recid: record.recid().unwrap_or_default(),
                record_id: record.id,
            });
        }
    }
    for deposit in DepositEntity::find().all(db).await? {
        owners.entry(deposit.bucket_id).or_default().push(FileOwner::Deposit {
            depid: deposit.depid,
            deposit_id: deposit.id,
        });
    }
    Ok(owners)
}

/// Collect the files that are still bad after retrying inconclusive checks
#[instrument(skip(db, storage))]
pub async fn collect_bad_files<C: ConnectionTrait>(db: &C, storage: &FileStorage) -> Result<FileAuditReport> {
    let inconclusive = FileInstanceEntity::find()
        .filter(FileInstanceColumn::LastCheck.is_null())
        .all(db)
        .await?;
    let retried = inconclusive.len();
    for file in inconclusive {
        verify_file(db, storage, file.id).await?;
    }

    let bad = FileInstanceEntity::find()
        .filter(
            Condition::any()
                .add(FileInstanceColumn::LastCheck.eq(false))
                .add(FileInstanceColumn::LastCheck.is_null()),
        )
        .all(db)
        .await?;
    if bad.is_empty() {
        return Ok(FileAuditReport {
            retried,
            bad_files: Vec::new(),
        });
    }

    let owners = owners_by_bucket(db).await?;
    let mut bad_files = Vec::with_capacity(bad.len());
    for file in bad {
        let versions = ObjectVersionEntity::find()
            .filter(ObjectVersionColumn::FileId.eq(file.id))
            .all(db)
            .await?;

        let mut buckets = BTreeMap::new();
        for version in versions {
            let referenced = owners.get(&version.bucket_id).cloned().unwrap_or_default();
            buckets.entry(version.bucket_id).or_insert(referenced);
        }

        bad_files.push(BadFile {
            file_id: file.id,
            uri: file.uri,
            checksum: file.checksum,
            last_check: file.last_check,
            buckets,
        });
    }

    Ok(FileAuditReport { retried, bad_files })
}

/// Periodic file audit; mailing the report is best effort
#[instrument(skip(db, storage, mailer))]
pub async fn audit_files<C: ConnectionTrait>(
    db: &C,
    storage: &FileStorage,
    mailer: &dyn Mailer,
    admin_email: &str,
) -> Result<FileAuditReport> {
    let report = collect_bad_files(db, storage).await?;
    info!(retried = report.retried, bad = report.bad_files.len(), "File audit finished");

    if !report.bad_files.is_empty() {
        let email = Email::new(
            admin_email,
            format!("[Zenodo] {} file(s) failed integrity checks", report.bad_files.len()),
            report.render(),
        );
        if let Err(e) = mailer.send(email).await {
            warn!(error = %e, "Failed to send file audit report");
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DbPool;
    use crate::notify::MemoryMailer;
    use crate::storage::MemoryBlobStore;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_verify_and_audit() {
        let pool = DbPool::in_memory().await.unwrap();
        let db = pool.write();
        let blobs = Arc::new(MemoryBlobStore::new());
        let storage = FileStorage::new(blobs.clone());

        let bucket = storage.create_bucket(db, false).await.unwrap();
        let good = storage.add_object(db, bucket.id, "good.txt", b"good").await.unwrap();
        let bad = storage.add_object(db, bucket.id, "bad.txt", b"bad").await.unwrap();

        assert_eq!(verify_file(db, &storage, good.file_id).await.unwrap(), Some(true));

        let uri = FileInstanceEntity::find_by_id(bad.file_id)
            .one(db)
            .await
            .unwrap()
            .unwrap()
            .uri;
        blobs.overwrite(&uri, b"tampered").await;

        let mailer = MemoryMailer::new();
        let report = audit_files(db, &storage, &mailer, "admin@example.org").await.unwrap();

        assert_eq!(report.retried, 1);
        assert_eq!(report.bad_files.len(), 1);
        assert_eq!(report.bad_files[0].file_id, bad.file_id);
        assert_eq!(report.bad_files[0].last_check, Some(false));
        assert!(report.bad_files[0].buckets.contains_key(&bucket.id));

        let sent = mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, vec!["admin@example.org".to_string()]);
        assert!(sent[0].body.contains("checksum mismatch"));
    }

    #[tokio::test]
    async fn test_audit_clean_store_sends_nothing() {
        let pool = DbPool::in_memory().await.unwrap();
        let db = pool.write();
        let storage = FileStorage::memory();
        let bucket = storage.create_bucket(db, false).await.unwrap();
        storage.add_object(db, bucket.id, "a.txt", b"a").await.unwrap();

        let mailer = MemoryMailer::new();
        let report = audit_files(db, &storage, &mailer, "admin@example.org").await.unwrap();

        assert!(report.bad_files.is_empty());
        assert!(mailer.sent().is_empty());
    }
}
