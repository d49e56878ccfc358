//! Content-addressed blob backends

use crate::errors::{AppError, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::instrument;
use uuid::Uuid;

/// `sha256:<hex>` checksum of a byte slice
pub fn checksum(data: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(data)))
}

/// Storage location derived from the content checksum
pub fn content_uri(checksum: &str) -> String {
    let digest = checksum.trim_start_matches("sha256:");
    let (head, _) = digest.split_at(digest.len().min(2));
    format!("sha256/{}/{}", head, digest)
}

/// Byte storage addressed by content
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store the bytes, returning their URI; storing the same content twice is a no-op
    async fn put(&self, data: &[u8]) -> Result<String>;

    async fn get(&self, uri: &str) -> Result<Vec<u8>>;

    async fn exists(&self, uri: &str) -> Result<bool>;

    async fn delete(&self, uri: &str) -> Result<()>;
}

/// Local filesystem backend
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub async fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await.map_err(storage_error)?;
        Ok(Self { root })
    }

    fn path(&self, uri: &str) -> Result<PathBuf> {
        let relative = Path::new(uri);
        if !relative.components().all(|c| matches!(c, Component::Normal(_))) {
            return Err(AppError::Storage {
                message: format!("Invalid blob location: {}", uri),
            });
        }
        Ok(self.root.join(relative))
    }
}

fn storage_error(e: std::io::Error) -> AppError {
    AppError::Storage { message: e.to_string() }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    #[instrument(skip(self, data), fields(backend = "filesystem", size = data.len()))]
    async fn put(&self, data: &[u8]) -> Result<String> {
        let uri = content_uri(&checksum(data));
        let path = self.path(&uri)?;

        if fs::try_exists(&path).await.map_err(storage_error)? {
            return Ok(uri);
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(storage_error)?;
        }

        // Write to a unique temp file, then rename into place
        let temp = path.with_extension(format!("tmp.{}", Uuid::new_v4()));
        {
            let mut file = fs::File::create(&temp).await.map_err(storage_error)?;
            file.write_all(data).await.map_err(storage_error)?;
            file.sync_all().await.map_err(storage_error)?;
        }
        fs::rename(&temp, &path).await.map_err(storage_error)?;

        Ok(uri)
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn get(&self, uri: &str) -> Result<Vec<u8>> {
        let path = self.path(uri)?;
        fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AppError::not_found("blob", uri)
            } else {
                storage_error(e)
            }
        })
    }

    async fn exists(&self, uri: &str) -> Result<bool> {
        fs::try_exists(self.path(uri)?).await.map_err(storage_error)
    }

    async fn delete(&self, uri: &str) -> Result<()> {
        match fs::remove_file(self.path(uri)?).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(storage_error(e)),
        }
    }
}

/// In-process backend for tests and single-node setups
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite stored bytes in place, bypassing content addressing
    pub async fn overwrite(&self, uri: &str, data: &[u8]) {
        self.blobs.write().await.insert(uri.to_string(), data.to_vec());
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, data: &[u8]) -> Result<String> {
        let uri = content_uri(&checksum(data));
        self.blobs
            .write()
            .await
            .entry(uri.clone())
            .or_insert_with(|| data.to_vec());
        Ok(uri)
    }

    async fn get(&self, uri: &str) -> Result<Vec<u8>> {
        self.blobs
            .read()
            .await
            .get(uri)
            .cloned()
            .ok_or_else(|| AppError::not_found("blob", uri))
    }

    async fn exists(&self, uri: &str) -> Result<bool> {
        Ok(self.blobs.read().await.contains_key(uri))
    }

    async fn delete(&self, uri: &str) -> Result<()> {
        self.blobs.write().await.remove(uri);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_checksum_format() {
        let sum = checksum(b"test-1.txt");
        assert!(sum.starts_with("sha256:"));
        assert_eq!(sum.len(), "sha256:".len() + 64);

        let uri = content_uri(&sum);
        assert!(uri.starts_with("sha256/"));
        assert!(uri.ends_with(sum.trim_start_matches("sha256:")));
    }

    #[tokio::test]
    async fn test_fs_store() {
        let dir = tempdir().unwrap();
        let store = FsBlobStore::new(dir.path().join("blobs")).await.unwrap();

        let uri = store.put(b"hello").await.unwrap();
        assert_eq!(store.put(b"hello").await.unwrap(), uri);
        assert!(store.exists(&uri).await.unwrap());
        assert_eq!(store.get(&uri).await.unwrap(), b"hello");

        store.delete(&uri).await.unwrap();
        assert!(!store.exists(&uri).await.unwrap());
        assert!(matches!(store.get(&uri).await, Err(AppError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_fs_store_rejects_traversal() {
        let dir = tempdir().unwrap();
        let store = FsBlobStore::new(dir.path()).await.unwrap();
        assert!(store.get("../etc/passwd").await.is_err());
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryBlobStore::new();
        let uri = store.put(b"data").await.unwrap();
        assert_eq!(store.get(&uri).await.unwrap(), b"data");

        store.overwrite(&uri, b"corrupted").await;
        assert_eq!(store.get(&uri).await.unwrap(), b"corrupted");
    }
}
