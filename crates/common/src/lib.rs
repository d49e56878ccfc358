//! Zenodo deposition engine core
//!
//! Shared code for the gateway, the worker and the operator CLI including:
//! - Database models and schema bootstrap
//! - Persistent identifier store, registrars and record versioning
//! - Deposition lifecycle and the publication pipeline
//! - Metadata validation, translation and serialization
//! - OAI set synchronisation, communities and the mapping reconciler
//! - Integrity auditors, background tasks and the task queue
//! - Error types, configuration, caching and metrics

pub mod auditor;
pub mod auth;
pub mod cache;
pub mod communities;
pub mod config;
pub mod db;
pub mod deposit;
pub mod errors;
pub mod indexer;
pub mod kb;
pub mod metrics;
pub mod notify;
pub mod oaiset;
pub mod peer_review;
pub mod pidstore;
pub mod pipeline;
pub mod preservation;
pub mod providers;
pub mod queue;
pub mod records;
pub mod serializers;
pub mod services;
pub mod sitemap;
pub mod storage;
pub mod tasks;
pub mod translator;
pub mod validators;
pub mod versioning;

// Re-export commonly used types
pub use auth::AuthContext;
pub use config::AppConfig;
pub use deposit::{Actor, DepositService};
pub use errors::{AppError, Result};
pub use pipeline::Publisher;
pub use services::Services;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
