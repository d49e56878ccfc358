//! Service bundle shared by the binaries
//!
//! Wires the database pool, identifier store, storage, knowledge base,
//! caches, task queue, search indexer and mailer from one [`AppConfig`].

use crate::cache::{Cache, CacheConfig};
use crate::config::AppConfig;
use crate::db::DbPool;
use crate::errors::Result;
use crate::indexer::{self, NullIndexer, SearchIndexer};
use crate::kb::KnowledgeBase;
use crate::notify::{LogMailer, Mailer};
use crate::pidstore::PidStore;
use crate::providers::ProviderRegistry;
use crate::queue::{MemoryTaskQueue, Queue, QueueConfig, TaskQueue};
use crate::storage::FileStorage;
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub struct Services {
    pub config: Arc<AppConfig>,
    pub db: DbPool,
    pub pids: PidStore,
    pub storage: FileStorage,
    pub kb: KnowledgeBase,
    pub cache: Arc<Cache>,
    pub queue: Arc<dyn TaskQueue>,
    pub indexer: Arc<dyn SearchIndexer>,
    pub mailer: Arc<dyn Mailer>,
}

impl Services {
    /// Connect every backend named in the configuration
    pub async fn from_config(config: AppConfig) -> Result<Self> {
        let db = DbPool::new(&config.database).await?;
        let pids = PidStore::new(ProviderRegistry::from_config(&config)?);
        let storage = FileStorage::from_config(&config.storage).await?;
        let cache = Cache::new(CacheConfig::from(&config.redis)).await?;

        let queue: Arc<dyn TaskQueue> = match QueueConfig::from_app(&config.queue) {
            Some(queue_config) => {
                info!(url = %queue_config.url, "Using SQS task queue");
                Arc::new(Queue::new(queue_config).await?)
            }
            None => {
                info!("No task queue URL configured, using in-process queue");
                Arc::new(MemoryTaskQueue::new())
            }
        };

        Ok(Self {
            kb: KnowledgeBase::new(&config.cache),
            indexer: indexer::from_config(&config.search)?,
            mailer: Arc::new(LogMailer),
            config: Arc::new(config),
            db,
            pids,
            storage,
            cache: Arc::new(cache),
            queue,
        })
    }

    /// Fully in-process services over a fresh in-memory database
    pub async fn in_memory() -> Result<Self> {
        let config = AppConfig::default();
        Ok(Self {
            db: DbPool::in_memory().await?,
            pids: PidStore::new(ProviderRegistry::local()),
            storage: FileStorage::memory(),
            kb: KnowledgeBase::new(&config.cache),
            cache: Arc::new(Cache::memory(CacheConfig::default())),
            queue: Arc::new(MemoryTaskQueue::new()),
            indexer: Arc::new(NullIndexer),
            mailer: Arc::new(LogMailer),
            config: Arc::new(config),
        })
    }

    pub fn with_config(mut self, config: AppConfig) -> Self {
        self.config = Arc::new(config);
        self
    }

    pub fn with_pids(mut self, pids: PidStore) -> Self {
        self.pids = pids;
        self
    }

    pub fn with_queue(mut self, queue: Arc<dyn TaskQueue>) -> Self {
        self.queue = queue;
        self
    }

    pub fn with_indexer(mut self, indexer: Arc<dyn SearchIndexer>) -> Self {
        self.indexer = indexer;
        self
    }

    pub fn with_mailer(mut self, mailer: Arc<dyn Mailer>) -> Self {
        self.mailer = mailer;
        self
    }
}
