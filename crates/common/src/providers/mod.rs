//! External registrar adapters
//!
//! Provides:
//! - The [`PidProvider`] contract (reserve/register/update/delete)
//! - A registry populated explicitly at startup and resolved by scheme and value
//! - DataCite MDS adapter for the local DOI prefix
//! - No-op adapters for external DOIs and locally minted identifiers
//!
//! Adapters return `Ok(false)` for a soft failure (the PID store leaves the
//! identifier untouched) and `Err` for transport failures.

mod datacite;
mod local;

pub use datacite::DataCiteProvider;
pub use local::{ExternalDoiProvider, LocalProvider};

use crate::config::AppConfig;
use crate::db::models::Pid;
use crate::errors::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Contract of an identifier authority
#[async_trait]
pub trait PidProvider: Send + Sync {
    /// Name stored in `pid_provider`
    fn name(&self) -> &'static str;

    /// Whether this adapter manages the given identifier
    fn accepts(&self, pid_type: &str, pid_value: &str) -> bool;

    async fn reserve(&self, pid: &Pid, doc: Option<&str>) -> Result<bool>;

    async fn register(&self, pid: &Pid, url: &str, doc: Option<&str>) -> Result<bool>;

    async fn update(&self, pid: &Pid, url: Option<&str>, doc: Option<&str>) -> Result<bool>;

    async fn delete(&self, pid: &Pid) -> Result<bool>;
}

/// Ordered set of adapters; the first accepting adapter wins
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn PidProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter (builder style)
    pub fn with(mut self, provider: Arc<dyn PidProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    /// Adapters for local identifiers and external DOIs only
    pub fn local() -> Self {
        Self::new()
            .with(Arc::new(LocalProvider::default()))
            .with(Arc::new(ExternalDoiProvider))
    }

    /// Production registry: DataCite for the local prefix, then the no-op adapters
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let datacite = DataCiteProvider::new(&config.datacite, &config.site.doi_prefix)?;

        Ok(Self::new()
            .with(Arc::new(datacite))
            .with(Arc::new(LocalProvider::default()))
            .with(Arc::new(ExternalDoiProvider)))
    }

    /// Resolve the adapter for an identifier
    pub fn resolve(&self, pid_type: &str, pid_value: &str) -> Option<Arc<dyn PidProvider>> {
        self.providers
            .iter()
            .find(|p| p.accepts(pid_type, pid_value))
            .cloned()
    }

    /// Look up an adapter by its stored name
    pub fn by_name(&self, name: &str) -> Option<Arc<dyn PidProvider>> {
        self.providers.iter().find(|p| p.name() == name).cloned()
    }

    /// Adapter for a stored identifier: recorded provider first, then resolution
    pub fn for_pid(&self, pid: &Pid) -> Option<Arc<dyn PidProvider>> {
        pid.pid_provider
            .as_deref()
            .and_then(|name| self.by_name(name))
            .or_else(|| self.resolve(&pid.pid_type, &pid.pid_value))
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    #[test]
    fn test_resolution_order() {
        let config = AppConfig::default();
        let registry = ProviderRegistry::from_config(&config).unwrap();

        let local = registry.resolve("doi", "10.5281/zenodo.12").unwrap();
        assert_eq!(local.name(), "datacite");

        let external = registry.resolve("doi", "10.1234/foo.bar").unwrap();
        assert_eq!(external.name(), "external");

        let recid = registry.resolve("recid", "12").unwrap();
        assert_eq!(recid.name(), "local");

        assert!(registry.resolve("handle", "123/456").is_none());
    }

    #[test]
    fn test_local_registry_handles_every_doi() {
        let registry = ProviderRegistry::local();
        assert_eq!(registry.resolve("doi", "10.5281/zenodo.1").unwrap().name(), "external");
        assert_eq!(registry.by_name("local").unwrap().name(), "local");
    }
}
