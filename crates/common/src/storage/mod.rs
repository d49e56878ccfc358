//! File buckets over a content-addressed blob store
//!
//! Provides:
//! - Bucket lifecycle (create, lock, unlock, delete)
//! - Object operations (add, remove, rename, reorder, list, open)
//! - Snapshots sharing file instances and bucket signatures
//!
//! Every write checks the bucket's `locked` flag and fails with
//! `BucketLocked` without retry.

mod blob;

pub use blob::{checksum, content_uri, BlobStore, FsBlobStore, MemoryBlobStore};

use crate::config::StorageConfig;
use crate::db::models::{
    Bucket, BucketActiveModel, BucketEntity, FileInstance, FileInstanceActiveModel, FileInstanceColumn,
    FileInstanceEntity, ObjectVersion, ObjectVersionActiveModel, ObjectVersionColumn, ObjectVersionEntity,
};
use crate::errors::{AppError, Result};
use chrono::Utc;
use sea_orm::{ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Set of `(key, checksum)` pairs identifying bucket contents
pub type BucketSignature = BTreeSet<(String, String)>;

/// Visible object of a bucket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectInfo {
    pub bucket_id: Uuid,
    pub version_id: Uuid,
    pub file_id: Uuid,
    pub key: String,
    pub size: i64,
    pub checksum: String,
    pub position: i32,
}

/// Bucket and object operations
#[derive(Clone)]
pub struct FileStorage {
    blobs: Arc<dyn BlobStore>,
}

impl FileStorage {
    pub fn new(blobs: Arc<dyn BlobStore>) -> Self {
        Self { blobs }
    }

    /// Filesystem store under the configured root, memory store otherwise
    pub async fn from_config(config: &StorageConfig) -> Result<Self> {
        let blobs: Arc<dyn BlobStore> = match &config.root {
            Some(root) => {
                info!(root = %root, "Using filesystem blob store");
                Arc::new(FsBlobStore::new(root).await?)
            }
            None => Arc::new(MemoryBlobStore::new()),
        };
        Ok(Self::new(blobs))
    }

    pub fn memory() -> Self {
        Self::new(Arc::new(MemoryBlobStore::new()))
    }

    pub fn blobs(&self) -> &Arc<dyn BlobStore> {
        &self.blobs
    }

    // ========================================================================
    // Buckets
    // ========================================================================

    pub async fn create_bucket<C: ConnectionTrait>(&self, db: &C, locked: bool) -> Result<Bucket> {
        let now = Utc::now();
        let bucket = BucketActiveModel {
            id: Set(Uuid::new_v4()),
            locked: Set(locked),
            created: Set(now.into()),
            updated: Set(now.into()),
        }
        .insert(db)
        .await?;

        debug!(bucket_id = %bucket.id, locked, "Created bucket");
        Ok(bucket)
    }

    pub async fn get_bucket<C: ConnectionTrait>(&self, db: &C, bucket_id: Uuid) -> Result<Bucket> {
        BucketEntity::find_by_id(bucket_id)
            .one(db)
            .await?
            .ok_or_else(|| AppError::not_found("bucket", bucket_id))
    }

    pub async fn set_locked<C: ConnectionTrait>(&self, db: &C, bucket_id: Uuid, locked: bool) -> Result<Bucket> {
        let bucket = self.get_bucket(db, bucket_id).await?;
        if bucket.locked == locked {
            return Ok(bucket);
        }

        let mut active: BucketActiveModel = bucket.into();
        active.locked = Set(locked);
        active.updated = Set(Utc::now().into());
        let bucket = active.update(db).await?;

        debug!(bucket_id = %bucket_id, locked, "Bucket lock changed");
        Ok(bucket)
    }

    /// Remove a bucket and its object versions; file instances are kept
    pub async fn delete_bucket<C: ConnectionTrait>(&self, db: &C, bucket_id: Uuid) -> Result<()> {
        ObjectVersionEntity::delete_many()
            .filter(ObjectVersionColumn::BucketId.eq(bucket_id))
            .exec(db)
            .await?;
        BucketEntity::delete_by_id(bucket_id).exec(db).await?;
        Ok(())
    }

    async fn writable<C: ConnectionTrait>(&self, db: &C, bucket_id: Uuid) -> Result<Bucket> {
        let bucket = self.get_bucket(db, bucket_id).await?;
        if bucket.locked {
            return Err(AppError::BucketLocked { bucket_id });
        }
        Ok(bucket)
    }

    // ========================================================================
    // Objects
    // ========================================================================

    async fn head<C: ConnectionTrait>(&self, db: &C, bucket_id: Uuid, key: &str) -> Result<Option<ObjectVersion>> {
        ObjectVersionEntity::find()
            .filter(ObjectVersionColumn::BucketId.eq(bucket_id))
            .filter(ObjectVersionColumn::Key.eq(key))
            .filter(ObjectVersionColumn::IsHead.eq(true))
            .one(db)
            .await
            .map_err(Into::into)
    }

    async fn heads<C: ConnectionTrait>(&self, db: &C, bucket_id: Uuid) -> Result<Vec<ObjectVersion>> {
        ObjectVersionEntity::find()
            .filter(ObjectVersionColumn::BucketId.eq(bucket_id))
            .filter(ObjectVersionColumn::IsHead.eq(true))
            .filter(ObjectVersionColumn::FileId.is_not_null())
            .order_by_asc(ObjectVersionColumn::Position)
            .order_by_asc(ObjectVersionColumn::Key)
            .all(db)
            .await
            .map_err(Into::into)
    }

    async fn retire<C: ConnectionTrait>(&self, db: &C, version: ObjectVersion) -> Result<()> {
        let mut active: ObjectVersionActiveModel = version.into();
        active.is_head = Set(false);
        active.update(db).await?;
        Ok(())
    }

    async fn insert_version<C: ConnectionTrait>(
        &self,
        db: &C,
        bucket_id: Uuid,
        key: &str,
        file_id: Uuid,
        position: i32,
    ) -> Result<ObjectVersion> {
        ObjectVersionActiveModel {
            version_id: Set(Uuid::new_v4()),
            bucket_id: Set(bucket_id),
            key: Set(key.to_string()),
            file_id: Set(Some(file_id)),
            position: Set(position),
            is_head: Set(true),
            created: Set(Utc::now().into()),
        }
        .insert(db)
        .await
        .map_err(Into::into)
    }

    async fn file_instance<C: ConnectionTrait>(&self, db: &C, file_id: Uuid) -> Result<FileInstance> {
        FileInstanceEntity::find_by_id(file_id)
            .one(db)
            .await?
            .ok_or_else(|| AppError::not_found("file", file_id))
    }

    /// Add (or replace) an object. Re-adding identical content is a no-op.
    pub async fn add_object<C: ConnectionTrait>(
        &self,
        db: &C,
        bucket_id: Uuid,
        key: &str,
        data: &[u8],
    ) -> Result<ObjectInfo> {
        validate_key(key)?;
        self.writable(db, bucket_id).await?;

        let sum = checksum(data);
        let existing = self.head(db, bucket_id, key).await?;

        if let Some(head) = &existing {
            if let Some(file_id) = head.file_id {
                let file = self.file_instance(db, file_id).await?;
                if file.checksum == sum {
                    return Ok(object_info(head, &file));
                }
            }
        }

        let uri = self.blobs.put(data).await?;
        let file = match FileInstanceEntity::find()
            .filter(FileInstanceColumn::Checksum.eq(sum.as_str()))
            .one(db)
            .await?
        {
            Some(file) => file,
            None => {
                FileInstanceActiveModel {
                    id: Set(Uuid::new_v4()),
                    uri: Set(uri),
                    size: Set(data.len() as i64),
                    checksum: Set(sum),
                    last_check: Set(None),
                    last_check_at: Set(None),
                    created: Set(Utc::now().into()),
                }
                .insert(db)
                .await?
            }
        };

        let position = match existing {
            Some(head) => {
                let position = head.position;
                self.retire(db, head).await?;
                position
            }
            None => self.next_position(db, bucket_id).await?,
        };

        let version = self.insert_version(db, bucket_id, key, file.id, position).await?;
        info!(bucket_id = %bucket_id, key = %key, size = file.size, "Object added");
        Ok(object_info(&version, &file))
    }

    async fn next_position<C: ConnectionTrait>(&self, db: &C, bucket_id: Uuid) -> Result<i32> {
        Ok(self
            .heads(db, bucket_id)
            .await?
            .iter()
            .map(|v| v.position + 1)
            .max()
            .unwrap_or(0))
    }

    pub async fn remove_object<C: ConnectionTrait>(&self, db: &C, bucket_id: Uuid, key: &str) -> Result<()> {
        self.writable(db, bucket_id).await?;
        let head = self
            .head(db, bucket_id, key)
            .await?
            .ok_or_else(|| AppError::not_found("object", key))?;
        self.retire(db, head).await?;

        info!(bucket_id = %bucket_id, key = %key, "Object removed");
        Ok(())
    }

    pub async fn rename_object<C: ConnectionTrait>(
        &self,
        db: &C,
        bucket_id: Uuid,
        key: &str,
        new_key: &str,
    ) -> Result<ObjectInfo> {
        validate_key(new_key)?;
        self.writable(db, bucket_id).await?;

        if self.head(db, bucket_id, new_key).await?.is_some() {
            return Err(AppError::Conflict {
                message: format!("Object '{}' already exists", new_key),
            });
        }

        let head = self
            .head(db, bucket_id, key)
            .await?
            .ok_or_else(|| AppError::not_found("object", key))?;
        let file_id = head.file_id.ok_or_else(|| AppError::not_found("object", key))?;
        let position = head.position;
        self.retire(db, head).await?;

        let version = self.insert_version(db, bucket_id, new_key, file_id, position).await?;
        let file = self.file_instance(db, file_id).await?;
        Ok(object_info(&version, &file))
    }

    /// Reorder objects; `keys` must name every visible object exactly once
    pub async fn reorder<C: ConnectionTrait>(&self, db: &C, bucket_id: Uuid, keys: &[String]) -> Result<()> {
        self.writable(db, bucket_id).await?;

        let heads = self.heads(db, bucket_id).await?;
        let current: BTreeSet<&str> = heads.iter().map(|h| h.key.as_str()).collect();
        let requested: BTreeSet<&str> = keys.iter().map(String::as_str).collect();
        if current != requested || requested.len() != keys.len() {
            return Err(AppError::field("files", "Order must list every file exactly once."));
        }

        let positions: HashMap<&str, i32> = keys
            .iter()
            .enumerate()
            .map(|(i, k)| (k.as_str(), i as i32))
            .collect();

        for head in heads {
            let position = positions.get(head.key.as_str()).copied().unwrap_or_default();
            if head.position != position {
                let mut active: ObjectVersionActiveModel = head.into();
                active.position = Set(position);
                active.update(db).await?;
            }
        }
        Ok(())
    }

    /// Visible objects in display order
    pub async fn list<C: ConnectionTrait>(&self, db: &C, bucket_id: Uuid) -> Result<Vec<ObjectInfo>> {
        let heads = self.heads(db, bucket_id).await?;
        let mut objects = Vec::with_capacity(heads.len());
        for head in heads {
            if let Some(file_id) = head.file_id {
                let file = self.file_instance(db, file_id).await?;
                objects.push(object_info(&head, &file));
            }
        }
        Ok(objects)
    }

    pub async fn get_object<C: ConnectionTrait>(&self, db: &C, bucket_id: Uuid, key: &str) -> Result<ObjectInfo> {
        let head = self
            .head(db, bucket_id, key)
            .await?
            .ok_or_else(|| AppError::not_found("object", key))?;
        let file_id = head.file_id.ok_or_else(|| AppError::not_found("object", key))?;
        let file = self.file_instance(db, file_id).await?;
        Ok(object_info(&head, &file))
    }

    /// Object metadata plus its content
    pub async fn open<C: ConnectionTrait>(&self, db: &C, bucket_id: Uuid, key: &str) -> Result<(ObjectInfo, Vec<u8>)> {
        let info = self.get_object(db, bucket_id, key).await?;
        let file = self.file_instance(db, info.file_id).await?;
        let data = self.blobs.get(&file.uri).await?;
        Ok((info, data))
    }

    // ========================================================================
    // Snapshots
    // ========================================================================

    /// Copy the visible objects into a new bucket sharing the file instances
    pub async fn snapshot<C: ConnectionTrait>(&self, db: &C, bucket_id: Uuid, locked: bool) -> Result<Bucket> {
        let heads = self.heads(db, bucket_id).await?;
        let snapshot = self.create_bucket(db, false).await?;

        for head in heads {
            if let Some(file_id) = head.file_id {
                self.insert_version(db, snapshot.id, &head.key, file_id, head.position)
                    .await?;
            }
        }

        info!(source = %bucket_id, snapshot = %snapshot.id, "Bucket snapshot created");
        if locked {
            self.set_locked(db, snapshot.id, true).await
        } else {
            Ok(snapshot)
        }
    }

    pub async fn signature<C: ConnectionTrait>(&self, db: &C, bucket_id: Uuid) -> Result<BucketSignature> {
        Ok(self
            .list(db, bucket_id)
            .await?
            .into_iter()
            .map(|o| (o.key, o.checksum))
            .collect())
    }
}

fn object_info(version: &ObjectVersion, file: &FileInstance) -> ObjectInfo {
    ObjectInfo {
        bucket_id: version.bucket_id,
        version_id: version.version_id,
        file_id: file.id,
        key: version.key.clone(),
        size: file.size,
        checksum: file.checksum.clone(),
        position: version.position,
    }
}

fn validate_key(key: &str) -> Result<()> {
    let key = key.trim();
    if key.is_empty() || key.len() > 255 || key.contains('/') || key == "." || key == ".." {
        return Err(AppError::field("filename", "Invalid file name."));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DbPool;

    async fn setup() -> (DbPool, FileStorage) {
        (DbPool::in_memory().await.unwrap(), FileStorage::memory())
    }

    #[tokio::test]
    async fn test_add_list_and_open() {
        let (pool, storage) = setup().await;
        let db = pool.write();
        let bucket = storage.create_bucket(db, false).await.unwrap();

        storage.add_object(db, bucket.id, "b.txt", b"bbb").await.unwrap();
        storage.add_object(db, bucket.id, "a.txt", b"aa").await.unwrap();

        let objects = storage.list(db, bucket.id).await.unwrap();
        assert_eq!(
            objects.iter().map(|o| o.key.as_str()).collect::<Vec<_>>(),
            vec!["b.txt", "a.txt"]
        );

        let (info, data) = storage.open(db, bucket.id, "a.txt").await.unwrap();
        assert_eq!(data, b"aa");
        assert_eq!(info.size, 2);
        assert_eq!(info.checksum, checksum(b"aa"));
    }

    #[tokio::test]
    async fn test_add_is_idempotent_by_content() {
        let (pool, storage) = setup().await;
        let db = pool.write();
        let bucket = storage.create_bucket(db, false).await.unwrap();

        let first = storage.add_object(db, bucket.id, "f.txt", b"x").await.unwrap();
        let second = storage.add_object(db, bucket.id, "f.txt", b"x").await.unwrap();
        assert_eq!(first.version_id, second.version_id);

        let replaced = storage.add_object(db, bucket.id, "f.txt", b"y").await.unwrap();
        assert_ne!(replaced.version_id, first.version_id);
        assert_eq!(replaced.position, first.position);
        assert_eq!(storage.list(db, bucket.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_locked_bucket_rejects_writes() {
        let (pool, storage) = setup().await;
        let db = pool.write();
        let bucket = storage.create_bucket(db, false).await.unwrap();
        storage.add_object(db, bucket.id, "f.txt", b"x").await.unwrap();
        storage.set_locked(db, bucket.id, true).await.unwrap();

        let err = storage.add_object(db, bucket.id, "g.txt", b"y").await.unwrap_err();
        assert!(matches!(err, AppError::BucketLocked { .. }));
        assert_eq!(err.status_code(), axum::http::StatusCode::FORBIDDEN);
        assert!(matches!(
            storage.remove_object(db, bucket.id, "f.txt").await,
            Err(AppError::BucketLocked { .. })
        ));
    }

    #[tokio::test]
    async fn test_rename_remove_reorder() {
        let (pool, storage) = setup().await;
        let db = pool.write();
        let bucket = storage.create_bucket(db, false).await.unwrap();
        for key in ["a", "b", "c"] {
            storage.add_object(db, bucket.id, key, key.as_bytes()).await.unwrap();
        }

        storage.rename_object(db, bucket.id, "a", "z").await.unwrap();
        assert!(matches!(
            storage.rename_object(db, bucket.id, "b", "c").await,
            Err(AppError::Conflict { .. })
        ));

        storage.remove_object(db, bucket.id, "b").await.unwrap();
        storage
            .reorder(db, bucket.id, &["c".to_string(), "z".to_string()])
            .await
            .unwrap();

        let keys: Vec<_> = storage
            .list(db, bucket.id)
            .await
            .unwrap()
            .into_iter()
            .map(|o| o.key)
            .collect();
        assert_eq!(keys, vec!["c", "z"]);

        assert!(storage.reorder(db, bucket.id, &["c".to_string()]).await.is_err());
    }

    #[tokio::test]
    async fn test_snapshot_and_signature() {
        let (pool, storage) = setup().await;
        let db = pool.write();
        let bucket = storage.create_bucket(db, false).await.unwrap();
        storage.add_object(db, bucket.id, "test-1.txt", b"test-1.txt").await.unwrap();

        let snapshot = storage.snapshot(db, bucket.id, true).await.unwrap();
        assert!(snapshot.locked);
        assert_eq!(
            storage.signature(db, bucket.id).await.unwrap(),
            storage.signature(db, snapshot.id).await.unwrap()
        );

        // Source stays writable and diverges
        storage.add_object(db, bucket.id, "test-2.txt", b"2").await.unwrap();
        assert_ne!(
            storage.signature(db, bucket.id).await.unwrap(),
            storage.signature(db, snapshot.id).await.unwrap()
        );
    }
}
