//! Shared cache integration
//!
//! Provides:
//! - Redis backend over a multiplexed connection
//! - In-process memory backend for tests and single-node deployments
//! - Generic get/set operations with TTL
//! - Draft autosave and sitemap page storage

mod local;

pub use local::LocalCache;

use crate::config::RedisConfig;
use crate::errors::{AppError, Result};
use redis::{aio::MultiplexedConnection, AsyncCommands, Client};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Redis URL (redis://host:port); memory backend when unset
    pub url: Option<String>,
    /// Default TTL in seconds
    pub default_ttl_secs: u64,
    /// Key prefix for namespacing
    pub key_prefix: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            url: None,
            default_ttl_secs: 300,
            key_prefix: "zenodo".to_string(),
        }
    }
}

impl From<&RedisConfig> for CacheConfig {
    fn from(config: &RedisConfig) -> Self {
        Self {
            url: config.url.clone(),
            default_ttl_secs: config.default_ttl_secs,
            ..Default::default()
        }
    }
}

enum Backend {
    Redis {
        connection: RwLock<MultiplexedConnection>,
    },
    Memory {
        entries: RwLock<HashMap<String, (Instant, String)>>,
    },
}

/// Cache client
pub struct Cache {
    backend: Backend,
    config: CacheConfig,
}

impl Cache {
    /// Create a cache client, connecting to Redis when a URL is configured
    pub async fn new(config: CacheConfig) -> Result<Self> {
        let Some(url) = config.url.clone() else {
            info!("No Redis URL configured, using in-process cache");
            return Ok(Self::memory(config));
        };

        let client = Client::open(url.as_str()).map_err(|e| AppError::CacheError {
            message: format!("Failed to create Redis client: {}", e),
        })?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| AppError::CacheError {
                message: format!("Failed to connect to Redis: {}", e),
            })?;

        Ok(Self {
            backend: Backend::Redis {
                connection: RwLock::new(connection),
            },
            config,
        })
    }

    /// Create an in-process cache
    pub fn memory(config: CacheConfig) -> Self {
        Self {
            backend: Backend::Memory {
                entries: RwLock::new(HashMap::new()),
            },
            config,
        }
    }

    /// Build a prefixed key
    fn key(&self, key: &str) -> String {
        format!("{}:{}", self.config.key_prefix, key)
    }

    async fn get_raw(&self, full_key: &str) -> Result<Option<String>> {
        match &self.backend {
            Backend::Redis { connection } => {
                let mut conn = connection.write().await;
                conn.get(full_key).await.map_err(|e| AppError::CacheError {
                    message: format!("Failed to get key '{}': {}", full_key, e),
                })
            }
            Backend::Memory { entries } => {
                let entries = entries.read().await;
                Ok(entries
                    .get(full_key)
                    .filter(|(expires, _)| *expires > Instant::now())
                    .map(|(_, value)| value.clone()))
            }
        }
    }

    /// Get a value from cache
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let full_key = self.key(key);

        match self.get_raw(&full_key).await? {
            Some(json) => {
                let parsed = serde_json::from_str(&json).map_err(|e| AppError::CacheError {
                    message: format!("Failed to parse cached value: {}", e),
                })?;
                debug!(key = %full_key, "Cache hit");
                crate::metrics::record_cache_access(true);
                Ok(Some(parsed))
            }
            None => {
                debug!(key = %full_key, "Cache miss");
                crate::metrics::record_cache_access(false);
                Ok(None)
            }
        }
    }

    /// Set a value in cache with default TTL
    pub async fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        self.set_with_ttl(key, value, self.config.default_ttl_secs).await
    }

    /// Set a value in cache with custom TTL
    pub async fn set_with_ttl<T: Serialize>(&self, key: &str, value: &T, ttl_secs: u64) -> Result<()> {
        let full_key = self.key(key);
        let json = serde_json::to_string(value).map_err(|e| AppError::CacheError {
            message: format!("Failed to serialize value: {}", e),
        })?;

        match &self.backend {
            Backend::Redis { connection } => {
                let mut conn = connection.write().await;
                conn.set_ex::<_, _, ()>(&full_key, &json, ttl_secs)
                    .await
                    .map_err(|e| AppError::CacheError {
                        message: format!("Failed to set key '{}': {}", full_key, e),
                    })?;
            }
            Backend::Memory { entries } => {
                let expires = Instant::now() + Duration::from_secs(ttl_secs);
                entries.write().await.insert(full_key.clone(), (expires, json));
            }
        }

        debug!(key = %full_key, ttl_secs, "Cache set");
        Ok(())
    }

    /// Delete a key from cache
    pub async fn delete(&self, key: &str) -> Result<bool> {
        let full_key = self.key(key);

        let deleted = match &self.backend {
            Backend::Redis { connection } => {
                let mut conn = connection.write().await;
                let deleted: i32 = conn.del(&full_key).await.map_err(|e| AppError::CacheError {
                    message: format!("Failed to delete key '{}': {}", full_key, e),
                })?;
                deleted > 0
            }
            Backend::Memory { entries } => entries.write().await.remove(&full_key).is_some(),
        };

        debug!(key = %full_key, deleted, "Cache delete");
        Ok(deleted)
    }

    /// Check if a key exists
    pub async fn exists(&self, key: &str) -> Result<bool> {
        let full_key = self.key(key);

        match &self.backend {
            Backend::Redis { connection } => {
                let mut conn = connection.write().await;
                conn.exists(&full_key).await.map_err(|e| AppError::CacheError {
                    message: format!("Failed to check key '{}': {}", full_key, e),
                })
            }
            Backend::Memory { .. } => Ok(self.get_raw(&full_key).await?.is_some()),
        }
    }

    /// Get or set with a loader function
    pub async fn get_or_load<T, F, Fut>(&self, key: &str, ttl_secs: u64, loader: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        if let Some(cached) = self.get::<T>(key).await? {
            return Ok(cached);
        }

        let value = loader().await?;

        if let Err(e) = self.set_with_ttl(key, &value, ttl_secs).await {
            warn!(error = %e, "Failed to cache value, continuing without cache");
        }

        Ok(value)
    }

    /// Ping the backend to check connectivity
    pub async fn ping(&self) -> Result<()> {
        if let Backend::Redis { connection } = &self.backend {
            let mut conn = connection.write().await;
            redis::cmd("PING")
                .query_async::<String>(&mut *conn)
                .await
                .map_err(|e| AppError::CacheError {
                    message: format!("Redis ping failed: {}", e),
                })?;
        }
        Ok(())
    }
}

/// Cache key builder helpers
pub mod keys {
    /// Autosaved form state of a deposition
    pub fn draft_autosave(user_id: i32, depid: i32) -> String {
        format!("draft:{}:{}", user_id, depid)
    }

    /// Sitemap page; page 0 is the sitemap index
    pub fn sitemap_page(page: usize) -> String {
        format!("sitemap:{}", page)
    }
}
