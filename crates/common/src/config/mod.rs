//! Configuration management for the deposition services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default, config/{APP_ENV}, config/local)
//! - Default values

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Redis configuration
    #[serde(default)]
    pub redis: RedisConfig,

    /// Task queue configuration (SQS)
    #[serde(default)]
    pub queue: QueueConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Site identity and curation settings
    #[serde(default)]
    pub site: SiteConfig,

    /// DataCite Metadata Store settings
    #[serde(default)]
    pub datacite: DataCiteConfig,

    /// Blob storage settings
    #[serde(default)]
    pub storage: StorageConfig,

    /// Async task settings
    #[serde(default)]
    pub tasks: TaskConfig,

    /// Process-local knowledge base cache settings
    #[serde(default)]
    pub cache: LocalCacheConfig,

    /// Sitemap generation settings
    #[serde(default)]
    pub sitemap: SitemapConfig,

    /// Search index settings
    #[serde(default)]
    pub search: SearchConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Maximum accepted upload size in bytes
    #[serde(default = "default_max_upload_size")]
    pub max_upload_bytes: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Primary database URL (for writes)
    #[serde(default = "default_database_url")]
    pub url: String,

    /// Read replica URL (optional, falls back to primary)
    pub read_url: Option<String>,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Idle timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RedisConfig {
    /// Redis URL; the in-process cache backend is used when unset
    pub url: Option<String>,

    /// Default TTL in seconds
    #[serde(default = "default_redis_ttl")]
    pub default_ttl_secs: u64,

    /// Lifetime of the per-user draft prefill cache in seconds
    #[serde(default = "default_draft_ttl")]
    pub draft_ttl_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueueConfig {
    /// SQS task queue URL; the in-process queue is used when unset
    pub task_queue_url: Option<String>,

    /// Dead letter queue URL
    pub dlq_url: Option<String>,

    /// Maximum messages to receive per poll
    #[serde(default = "default_queue_batch_size")]
    pub batch_size: u32,

    /// Long polling timeout in seconds
    #[serde(default = "default_queue_poll_timeout")]
    pub poll_timeout_secs: u64,

    /// Visibility timeout in seconds
    #[serde(default = "default_visibility_timeout")]
    pub visibility_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Service name reported in logs
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SiteConfig {
    /// Public host name, used in OAI identifiers (`oai:<host>:<recid>`)
    #[serde(default = "default_site_host")]
    pub host: String,

    /// Public base URL for links
    #[serde(default = "default_site_url")]
    pub url: String,

    /// DOI prefix administrated by this site
    #[serde(default = "default_doi_prefix")]
    pub doi_prefix: String,

    /// DataCite test prefix, refused as user input unless it is the local prefix
    #[serde(default = "default_test_prefix")]
    pub test_prefix: String,

    /// Community every new upload is proposed to
    #[serde(default = "default_curation_community")]
    pub curation_community: String,

    /// Community proposed for uploads carrying grants
    #[serde(default = "default_ec_community")]
    pub ec_funded_community: String,

    /// Recipient of audit reports
    #[serde(default = "default_admin_email")]
    pub admin_email: String,

    /// Access right prefilled into new drafts
    #[serde(default = "default_access_right")]
    pub default_access_right: String,

    /// License prefilled into new drafts
    #[serde(default = "default_license")]
    pub default_license: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DataCiteConfig {
    /// Metadata Store base URL
    #[serde(default = "default_datacite_url")]
    pub url: String,

    /// MDS username
    pub username: Option<String>,

    /// MDS password
    pub password: Option<String>,

    /// Per-request timeout in seconds
    #[serde(default = "default_datacite_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Root directory of the content-addressed blob store; memory when unset
    pub root: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TaskConfig {
    /// Maximum attempts for retryable tasks
    #[serde(default = "default_task_max_attempts")]
    pub max_attempts: u32,

    /// Initial retry delay in seconds
    #[serde(default = "default_task_initial_delay")]
    pub initial_delay_secs: u64,

    /// Upper bound of a single retry delay in seconds
    #[serde(default = "default_task_max_delay")]
    pub max_delay_secs: u64,

    /// Interval between file integrity audits in seconds
    #[serde(default = "default_audit_interval")]
    pub audit_interval_secs: u64,

    /// Interval between pattern-based OAI set synchronisations in seconds
    #[serde(default = "default_pattern_sync_interval")]
    pub pattern_sync_interval_secs: u64,

    /// Interval between sitemap rebuilds in seconds
    #[serde(default = "default_sitemap_interval")]
    pub sitemap_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LocalCacheConfig {
    /// Time-to-live of knowledge base entries in seconds
    #[serde(default = "default_kb_ttl")]
    pub kb_ttl_secs: u64,

    /// Maximum entries per knowledge base cache
    #[serde(default = "default_kb_capacity")]
    pub kb_capacity: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SitemapConfig {
    /// Maximum URLs per sitemap page
    #[serde(default = "default_sitemap_max_urls")]
    pub max_url_count: usize,

    /// URL scheme used for sitemap links
    #[serde(default = "default_sitemap_scheme")]
    pub url_scheme: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SearchConfig {
    /// Search engine base URL; indexing is skipped when unset
    pub url: Option<String>,

    /// Index receiving record documents
    #[serde(default = "default_search_index")]
    pub index: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_search_timeout")]
    pub timeout_secs: u64,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_request_timeout() -> u64 { 30 }
fn default_max_upload_size() -> usize { 100 * 1024 * 1024 }
fn default_database_url() -> String { "postgres://localhost/zenodo".to_string() }
fn default_max_connections() -> u32 { 50 }
fn default_min_connections() -> u32 { 5 }
fn default_connect_timeout() -> u64 { 10 }
fn default_idle_timeout() -> u64 { 300 }
fn default_redis_ttl() -> u64 { 300 }
fn default_draft_ttl() -> u64 { 86_400 }
fn default_queue_batch_size() -> u32 { 10 }
fn default_queue_poll_timeout() -> u64 { 20 }
fn default_visibility_timeout() -> u64 { 300 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "zenodo".to_string() }
fn default_site_host() -> String { "zenodo.org".to_string() }
fn default_site_url() -> String { "https://zenodo.org".to_string() }
fn default_doi_prefix() -> String { "10.5281".to_string() }
fn default_test_prefix() -> String { "10.5072".to_string() }
fn default_curation_community() -> String { "zenodo".to_string() }
fn default_ec_community() -> String { "ecfunded".to_string() }
fn default_admin_email() -> String { "info@zenodo.org".to_string() }
fn default_access_right() -> String { "open".to_string() }
fn default_license() -> String { "cc-by".to_string() }
fn default_datacite_url() -> String { "https://mds.datacite.org".to_string() }
fn default_datacite_timeout() -> u64 { 30 }
fn default_task_max_attempts() -> u32 { 6 }
fn default_task_initial_delay() -> u64 { 5 }
fn default_task_max_delay() -> u64 { 600 }
fn default_audit_interval() -> u64 { 86_400 }
fn default_pattern_sync_interval() -> u64 { 3_600 }
fn default_sitemap_interval() -> u64 { 86_400 }
fn default_kb_ttl() -> u64 { 600 }
fn default_kb_capacity() -> usize { 10_000 }
fn default_sitemap_max_urls() -> usize { 10_000 }
fn default_sitemap_scheme() -> String { "https".to_string() }
fn default_search_index() -> String { "records".to_string() }
fn default_search_timeout() -> u64 { 10 }

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))
            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            // Load local overrides
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables with APP__ prefix
            // e.g., APP__SITE__DOI_PREFIX=10.5281
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    /// Get the read database URL (falls back to primary)
    pub fn read_database_url(&self) -> &str {
        self.database.read_url.as_deref().unwrap_or(&self.database.url)
    }
}

impl SiteConfig {
    /// Build the local DOI for a record id
    pub fn local_doi(&self, recid: &str) -> String {
        format!("{}/zenodo.{}", self.doi_prefix, recid)
    }

    /// Whether a DOI belongs to the locally administrated prefix
    pub fn is_local_doi(&self, doi: &str) -> bool {
        doi.starts_with(&format!("{}/", self.doi_prefix))
    }

    /// Build the OAI identifier for a record id
    pub fn oai_identifier(&self, recid: &str) -> String {
        format!("oai:{}:{}", self.host, recid)
    }

    /// Public landing page of a record
    pub fn record_url(&self, recid: &str) -> String {
        format!("{}/record/{}", self.url.trim_end_matches('/'), recid)
    }
}

impl DataCiteConfig {
    /// Get the request timeout as Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
            max_upload_bytes: default_max_upload_size(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            read_url: None,
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout_secs: default_connect_timeout(),
            idle_timeout_secs: default_idle_timeout(),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: None,
            default_ttl_secs: default_redis_ttl(),
            draft_ttl_secs: default_draft_ttl(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            task_queue_url: None,
            dlq_url: None,
            batch_size: default_queue_batch_size(),
            poll_timeout_secs: default_queue_poll_timeout(),
            visibility_timeout_secs: default_visibility_timeout(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_port: default_metrics_port(),
            service_name: default_service_name(),
        }
    }
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            host: default_site_host(),
            url: default_site_url(),
            doi_prefix: default_doi_prefix(),
            test_prefix: default_test_prefix(),
            curation_community: default_curation_community(),
            ec_funded_community: default_ec_community(),
            admin_email: default_admin_email(),
            default_access_right: default_access_right(),
            default_license: default_license(),
        }
    }
}

impl Default for DataCiteConfig {
    fn default() -> Self {
        Self {
            url: default_datacite_url(),
            username: None,
            password: None,
            timeout_secs: default_datacite_timeout(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { root: None }
    }
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_task_max_attempts(),
            initial_delay_secs: default_task_initial_delay(),
            max_delay_secs: default_task_max_delay(),
            audit_interval_secs: default_audit_interval(),
            pattern_sync_interval_secs: default_pattern_sync_interval(),
            sitemap_interval_secs: default_sitemap_interval(),
        }
    }
}

impl Default for LocalCacheConfig {
    fn default() -> Self {
        Self {
            kb_ttl_secs: default_kb_ttl(),
            kb_capacity: default_kb_capacity(),
        }
    }
}

impl Default for SitemapConfig {
    fn default() -> Self {
        Self {
            max_url_count: default_sitemap_max_urls(),
            url_scheme: default_sitemap_scheme(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            url: None,
            index: default_search_index(),
            timeout_secs: default_search_timeout(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            redis: RedisConfig::default(),
            queue: QueueConfig::default(),
            observability: ObservabilityConfig::default(),
            site: SiteConfig::default(),
            datacite: DataCiteConfig::default(),
            storage: StorageConfig::default(),
            tasks: TaskConfig::default(),
            cache: LocalCacheConfig::default(),
            sitemap: SitemapConfig::default(),
            search: SearchConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.site.doi_prefix, "10.5281");
        assert_eq!(config.tasks.max_attempts, 6);
    }

    #[test]
    fn test_read_database_fallback() {
        let config = AppConfig::default();
        assert_eq!(config.read_database_url(), "postgres://localhost/zenodo");
    }

    #[test]
    fn test_site_identifiers() {
        let site = SiteConfig::default();
        assert_eq!(site.local_doi("123"), "10.5281/zenodo.123");
        assert!(site.is_local_doi("10.5281/zenodo.123"));
        assert!(!site.is_local_doi("10.52810/zenodo.123"));
        assert_eq!(site.oai_identifier("123"), "oai:zenodo.org:123");
        assert_eq!(site.record_url("7"), "https://zenodo.org/record/7");
    }
}
