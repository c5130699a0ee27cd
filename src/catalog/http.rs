//! HTTP catalog client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info};

use super::{parse_catalog, CatalogRecord, CatalogSource};
use crate::config::CatalogConfig;
use crate::error::{Error, Result};

/// Fetches the catalog with a single bounded GET request. No retries.
#[derive(Debug, Clone)]
pub struct HttpCatalogClient {
    client: Client,
    url: String,
}

impl HttpCatalogClient {
    /// Build a client for `url` with the given request timeout.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let url = url.into();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(Error::Config(format!(
                "catalog url must be http(s): {}",
                url
            )));
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Transport(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client, url })
    }

    /// Build a client from the catalog section of the configuration.
    pub fn from_config(config: &CatalogConfig) -> Result<Self> {
        Self::new(config.url.clone(), Duration::from_secs(config.timeout_secs))
    }
}

#[async_trait]
impl CatalogSource for HttpCatalogClient {
    async fn fetch_catalog(&self) -> Result<Vec<CatalogRecord>> {
        debug!(url = %self.url, "Fetching catalog");
        let response = self.client.get(&self.url).send().await.map_err(|e| {
            if e.is_timeout() {
                Error::Transport(format!("timed out fetching {}", self.url))
            } else {
                Error::Transport(format!("GET {} failed: {}", self.url, e))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Transport(format!(
                "GET {} returned {}",
                self.url, status
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| Error::Transport(format!("failed to read catalog body: {}", e)))?;
        let records = parse_catalog(&body)?;
        info!(records = records.len(), "Fetched catalog");
        Ok(records)
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}
