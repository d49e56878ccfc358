//! Adapters that need no remote authority

use super::PidProvider;
use crate::db::models::Pid;
use crate::errors::Result;
use async_trait::async_trait;
use tracing::debug;

/// Identifier schemes minted and resolved by this service alone
pub const LOCAL_SCHEMES: &[&str] = &["recid", "conceptrecid", "depid", "oai"];

/// Adapter for locally minted identifiers
#[derive(Debug, Clone)]
pub struct LocalProvider {
    schemes: Vec<String>,
}

impl Default for LocalProvider {
    fn default() -> Self {
        Self {
            schemes: LOCAL_SCHEMES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[async_trait]
impl PidProvider for LocalProvider {
    fn name(&self) -> &'static str {
        "local"
    }

    fn accepts(&self, pid_type: &str, _pid_value: &str) -> bool {
        self.schemes.iter().any(|s| s == pid_type)
    }

    async fn reserve(&self, _pid: &Pid, _doc: Option<&str>) -> Result<bool> {
        Ok(true)
    }

    async fn register(&self, _pid: &Pid, _url: &str, _doc: Option<&str>) -> Result<bool> {
        Ok(true)
    }

    async fn update(&self, _pid: &Pid, _url: Option<&str>, _doc: Option<&str>) -> Result<bool> {
        Ok(true)
    }

    async fn delete(&self, _pid: &Pid) -> Result<bool> {
        Ok(true)
    }
}

/// Adapter for DOIs registered by another authority; only recorded locally
#[derive(Debug, Clone, Copy, Default)]
pub struct ExternalDoiProvider;

#[async_trait]
impl PidProvider for ExternalDoiProvider {
    fn name(&self) -> &'static str {
        "external"
    }

    fn accepts(&self, pid_type: &str, _pid_value: &str) -> bool {
        pid_type == "doi"
    }

    async fn reserve(&self, pid: &Pid, _doc: Option<&str>) -> Result<bool> {
        debug!(pid = %pid.label(), "External DOI reserve is a no-op");
        Ok(true)
    }

    async fn register(&self, pid: &Pid, _url: &str, _doc: Option<&str>) -> Result<bool> {
        debug!(pid = %pid.label(), "External DOI register is a no-op");
        Ok(true)
    }

    async fn update(&self, pid: &Pid, _url: Option<&str>, _doc: Option<&str>) -> Result<bool> {
        debug!(pid = %pid.label(), "External DOI update is a no-op");
        Ok(true)
    }

    async fn delete(&self, pid: &Pid) -> Result<bool> {
        debug!(pid = %pid.label(), "External DOI delete is a no-op");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_schemes() {
        let provider = LocalProvider::default();
        assert!(provider.accepts("recid", "1"));
        assert!(provider.accepts("oai", "oai:zenodo.org:1"));
        assert!(!provider.accepts("doi", "10.5281/zenodo.1"));
    }

    #[test]
    fn test_external_accepts_dois() {
        assert!(ExternalDoiProvider.accepts("doi", "10.1234/x"));
        assert!(!ExternalDoiProvider.accepts("recid", "1"));
    }
}
