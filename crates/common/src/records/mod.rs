//! Record persistence with revision history
//!
//! Provides:
//! - Create/commit of record JSON, writing a revision on every commit
//! - Lookup by internal id or by recid
//! - Metadata repair from the latest sound revision
//! - Operator edits to record files

pub mod files;
mod repair;

pub use repair::{has_corrupted_files_meta, repair_record_metadata};

use crate::db::models::{
    Record, RecordActiveModel, RecordColumn, RecordEntity, RecordRevision, RecordRevisionActiveModel,
    RecordRevisionColumn, RecordRevisionEntity,
};
use crate::errors::{AppError, Result};
use crate::pidstore::PidStore;
use chrono::Utc;
use sea_orm::{ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, QuerySelect, Set};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

/// Object type stored on PIDs pointing at records
pub const RECORD_OBJECT_TYPE: &str = "rec";

pub async fn create<C: ConnectionTrait>(db: &C, id: Uuid, json: Value) -> Result<Record> {
    let now = Utc::now();
    let record = RecordActiveModel {
        id: Set(id),
        json: Set(json),
        version_id: Set(1),
        created: Set(now.into()),
        updated: Set(now.into()),
    }
    .insert(db)
    .await?;

    write_revision(db, &record).await?;
    debug!(record_id = %record.id, "Record created");
    Ok(record)
}

/// Replace the record JSON, bumping its version
pub async fn commit<C: ConnectionTrait>(db: &C, record: Record, json: Value) -> Result<Record> {
    let version_id = record.version_id + 1;
    let mut active: RecordActiveModel = record.into();
    active.json = Set(json);
    active.version_id = Set(version_id);
    active.updated = Set(Utc::now().into());
    let record = active.update(db).await?;

    write_revision(db, &record).await?;
    debug!(record_id = %record.id, version_id, "Record committed");
    Ok(record)
}

async fn write_revision<C: ConnectionTrait>(db: &C, record: &Record) -> Result<()> {
    RecordRevisionActiveModel {
        record_id: Set(record.id),
        version_id: Set(record.version_id),
        json: Set(record.json.clone()),
        created: Set(Utc::now().into()),
        ..Default::default()
    }
    .insert(db)
    .await?;
    Ok(())
}

pub async fn get<C: ConnectionTrait>(db: &C, id: Uuid) -> Result<Record> {
    RecordEntity::find_by_id(id)
        .one(db)
        .await?
        .ok_or_else(|| AppError::RecordNotFound { id: id.to_string() })
}

pub async fn find<C: ConnectionTrait>(db: &C, id: Uuid) -> Result<Option<Record>> {
    RecordEntity::find_by_id(id).one(db).await.map_err(Into::into)
}

/// Resolve a record through its recid PID
pub async fn get_by_recid<C: ConnectionTrait>(db: &C, pids: &PidStore, recid: &str) -> Result<Record> {
    let pid = pids
        .get(db, "recid", recid)
        .await?
        .filter(|p| p.is_registered() && p.object_type.as_deref() == Some(RECORD_OBJECT_TYPE))
        .ok_or_else(|| AppError::RecordNotFound { id: recid.to_string() })?;

    let id = pid
        .object_uuid
        .ok_or_else(|| AppError::RecordNotFound { id: recid.to_string() })?;
    get(db, id).await
}

/// Revisions, oldest first
pub async fn revisions<C: ConnectionTrait>(db: &C, id: Uuid) -> Result<Vec<RecordRevision>> {
    RecordRevisionEntity::find()
        .filter(RecordRevisionColumn::RecordId.eq(id))
        .order_by_asc(RecordRevisionColumn::VersionId)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Page of record ids ordered by creation
pub async fn ids<C: ConnectionTrait>(db: &C, offset: u64, limit: u64) -> Result<Vec<Uuid>> {
    RecordEntity::find()
        .select_only()
        .column(RecordColumn::Id)
        .order_by_asc(RecordColumn::Created)
        .order_by_asc(RecordColumn::Id)
        .offset(offset)
        .limit(limit)
        .into_tuple()
        .all(db)
        .await
        .map_err(Into::into)
}

/// Every record, ordered by creation
pub async fn all<C: ConnectionTrait>(db: &C) -> Result<Vec<Record>> {
    RecordEntity::find()
        .order_by_asc(RecordColumn::Created)
        .all(db)
        .await
        .map_err(Into::into)
}
