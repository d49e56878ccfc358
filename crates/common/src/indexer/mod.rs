//! Search index abstraction
//!
//! Provides:
//! - The [`SearchIndexer`] trait used by indexing tasks
//! - HTTP indexer writing record documents to an Elasticsearch-compatible engine
//! - No-op and in-memory indexers for deployments without search and for tests

use crate::config::SearchConfig;
use crate::db::models::Record;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, instrument};
use uuid::Uuid;

#[async_trait]
pub trait SearchIndexer: Send + Sync {
    /// Index (or re-index) the current state of a record
    async fn index(&self, record: &Record) -> Result<()>;

    /// Remove a record from the index; missing documents are not an error
    async fn delete(&self, record_id: Uuid) -> Result<()>;
}

/// Build the indexer matching the configuration
pub fn from_config(config: &SearchConfig) -> Result<Arc<dyn SearchIndexer>> {
    match &config.url {
        Some(url) => Ok(Arc::new(HttpIndexer::new(url, &config.index, Duration::from_secs(config.timeout_secs))?)),
        None => Ok(Arc::new(NullIndexer)),
    }
}

/// Indexer for deployments without a search engine
pub struct NullIndexer;

#[async_trait]
impl SearchIndexer for NullIndexer {
    async fn index(&self, record: &Record) -> Result<()> {
        debug!(record_id = %record.id, "Search disabled, skipping index");
        Ok(())
    }

    async fn delete(&self, record_id: Uuid) -> Result<()> {
        debug!(record_id = %record_id, "Search disabled, skipping delete");
        Ok(())
    }
}

/// Document API client
pub struct HttpIndexer {
    client: reqwest::Client,
    base_url: String,
    index: String,
}

impl HttpIndexer {
    pub fn new(base_url: &str, index: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("Failed to build search client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            index: index.to_string(),
        })
    }

    fn document_url(&self, record_id: Uuid) -> String {
        format!("{}/{}/_doc/{}", self.base_url, self.index, record_id)
    }

    fn upstream_error(status: StatusCode, body: String) -> AppError {
        if status.is_server_error() {
            AppError::Transient {
                message: format!("Search engine returned {}: {}", status, body),
            }
        } else {
            AppError::Internal {
                message: format!("Search engine rejected document ({}): {}", status, body),
            }
        }
    }
}

#[async_trait]
impl SearchIndexer for HttpIndexer {
    #[instrument(skip(self, record), fields(record_id = %record.id))]
    async fn index(&self, record: &Record) -> Result<()> {
        // External versioning keeps out-of-order deliveries from overwriting newer state
        let response = self
            .client
            .put(self.document_url(record.id))
            .query(&[("version", record.version_id.to_string()), ("version_type", "external_gte".into())])
            .json(&record.json)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() || status == StatusCode::CONFLICT {
            debug!(version = record.version_id, "Record indexed");
            return Ok(());
        }
        Err(Self::upstream_error(status, response.text().await.unwrap_or_default()))
    }

    #[instrument(skip(self))]
    async fn delete(&self, record_id: Uuid) -> Result<()> {
        let response = self.client.delete(self.document_url(record_id)).send().await?;

        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Err(Self::upstream_error(status, response.text().await.unwrap_or_default()))
    }
}

/// Indexer keeping documents in memory
#[derive(Default)]
pub struct MemoryIndexer {
    documents: RwLock<HashMap<Uuid, (i32, Value)>>,
}

impl MemoryIndexer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Indexed document and its version
    pub async fn get(&self, record_id: Uuid) -> Option<(i32, Value)> {
        self.documents.read().await.get(&record_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }
}

#[async_trait]
impl SearchIndexer for MemoryIndexer {
    async fn index(&self, record: &Record) -> Result<()> {
        let mut documents = self.documents.write().await;
        let stale = documents
            .get(&record.id)
            .is_some_and(|(version, _)| *version > record.version_id);
        if !stale {
            documents.insert(record.id, (record.version_id, record.json.clone()));
        }
        Ok(())
    }

    async fn delete(&self, record_id: Uuid) -> Result<()> {
        self.documents.write().await.remove(&record_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::Path, http::StatusCode as AxumStatus, routing::put, Router};
    use chrono::Utc;
    use serde_json::json;

    fn record(version_id: i32) -> Record {
        Record {
            id: Uuid::nil(),
            json: json!({"recid": 1, "v": version_id}),
            version_id,
            created: Utc::now().into(),
            updated: Utc::now().into(),
        }
    }

    #[tokio::test]
    async fn test_memory_indexer_ignores_stale_versions() {
        let indexer = MemoryIndexer::new();
        indexer.index(&record(3)).await.unwrap();
        indexer.index(&record(2)).await.unwrap();
        assert_eq!(indexer.get(Uuid::nil()).await.unwrap().0, 3);

        indexer.delete(Uuid::nil()).await.unwrap();
        assert_eq!(indexer.len().await, 0);
    }

    #[tokio::test]
    async fn test_http_indexer() {
        let app = Router::new().route(
            "/records/_doc/{id}",
            put(|Path(id): Path<String>| async move {
                if id == Uuid::nil().to_string() {
                    AxumStatus::CREATED
                } else {
                    AxumStatus::SERVICE_UNAVAILABLE
                }
            })
            .delete(|| async { AxumStatus::NOT_FOUND }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let indexer = HttpIndexer::new(&format!("http://{}", addr), "records", Duration::from_secs(5)).unwrap();
        indexer.index(&record(1)).await.unwrap();
        indexer.delete(Uuid::nil()).await.unwrap();

        let mut other = record(1);
        other.id = Uuid::new_v4();
        let err = indexer.index(&other).await.unwrap_err();
        assert!(err.is_retryable());
    }
}
