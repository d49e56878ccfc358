//! DataCite Metadata Store adapter
//!
//! Speaks the MDS HTTP API:
//! - `POST {url}/metadata` with the DataCite XML document
//! - `POST {url}/doi` with the `doi=`/`url=` pair
//! - `DELETE {url}/metadata/{doi}` to mark the DOI inactive

use super::PidProvider;
use crate::config::DataCiteConfig;
use crate::db::models::Pid;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use tracing::{debug, instrument, warn};

/// DataCite adapter for DOIs under the local prefix
pub struct DataCiteProvider {
    client: Client,
    base_url: String,
    username: Option<String>,
    password: Option<String>,
    prefix: String,
}

impl DataCiteProvider {
    pub fn new(config: &DataCiteConfig, prefix: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("Failed to build DataCite client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
            prefix: format!("{}/", prefix),
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}/{}", self.base_url, path));

        match &self.username {
            Some(user) => builder.basic_auth(user, self.password.as_ref()),
            None => builder,
        }
    }

    fn transport_error(&self, action: &str, e: reqwest::Error) -> AppError {
        AppError::Provider {
            provider: "datacite".to_string(),
            message: format!("{} failed: {}", action, e),
        }
    }

    /// Map an MDS response: 2xx is success, other 4xx a soft failure, 5xx an error
    async fn outcome(&self, action: &str, response: Response) -> Result<bool> {
        let status = response.status();
        if status.is_success() {
            return Ok(true);
        }

        let body = response.text().await.unwrap_or_default();

        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(AppError::Provider {
                provider: "datacite".to_string(),
                message: format!("{} returned {}: {}", action, status, body),
            });
        }

        warn!(action, %status, body = %body, "DataCite rejected request");
        Ok(false)
    }

    async fn post_metadata(&self, doc: &str) -> Result<bool> {
        let response = self
            .request(reqwest::Method::POST, "metadata")
            .header("Content-Type", "application/xml;charset=UTF-8")
            .body(doc.to_string())
            .send()
            .await
            .map_err(|e| self.transport_error("metadata post", e))?;

        self.outcome("metadata post", response).await
    }

    async fn post_doi(&self, doi: &str, url: &str) -> Result<bool> {
        let response = self
            .request(reqwest::Method::POST, "doi")
            .header("Content-Type", "text/plain;charset=UTF-8")
            .body(format!("doi={}\nurl={}", doi, url))
            .send()
            .await
            .map_err(|e| self.transport_error("doi post", e))?;

        self.outcome("doi post", response).await
    }

    fn require_doc<'a>(&self, pid: &Pid, doc: Option<&'a str>) -> Result<&'a str> {
        doc.ok_or_else(|| AppError::Validation {
            message: format!("DataCite metadata document required for {}", pid.pid_value),
            field: None,
        })
    }
}

#[async_trait]
impl PidProvider for DataCiteProvider {
    fn name(&self) -> &'static str {
        "datacite"
    }

    fn accepts(&self, pid_type: &str, pid_value: &str) -> bool {
        pid_type == "doi" && pid_value.starts_with(&self.prefix)
    }

    #[instrument(skip(self, pid, doc), fields(doi = %pid.pid_value))]
    async fn reserve(&self, pid: &Pid, doc: Option<&str>) -> Result<bool> {
        let doc = self.require_doc(pid, doc)?;
        self.post_metadata(doc).await
    }

    #[instrument(skip(self, pid, doc), fields(doi = %pid.pid_value))]
    async fn register(&self, pid: &Pid, url: &str, doc: Option<&str>) -> Result<bool> {
        let doc = self.require_doc(pid, doc)?;
        if !self.post_metadata(doc).await? {
            return Ok(false);
        }
        debug!("Metadata stored, minting DOI");
        self.post_doi(&pid.pid_value, url).await
    }

    #[instrument(skip(self, pid, doc), fields(doi = %pid.pid_value))]
    async fn update(&self, pid: &Pid, url: Option<&str>, doc: Option<&str>) -> Result<bool> {
        if let Some(doc) = doc {
            if !self.post_metadata(doc).await? {
                return Ok(false);
            }
        }
        match url {
            Some(url) => self.post_doi(&pid.pid_value, url).await,
            None => Ok(true),
        }
    }

    #[instrument(skip(self, pid), fields(doi = %pid.pid_value))]
    async fn delete(&self, pid: &Pid) -> Result<bool> {
        let response = self
            .request(reqwest::Method::DELETE, &format!("metadata/{}", pid.pid_value))
            .send()
            .await
            .map_err(|e| self.transport_error("metadata delete", e))?;

        // Never posted or already inactive
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(true);
        }

        self.outcome("metadata delete", response).await
    }
}
