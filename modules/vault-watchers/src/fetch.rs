// HTTP access to content sources.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::debug;

use crate::error::{Result, WatcherError};
use crate::traits::{Fetched, PageFetcher};

const DEFAULT_USER_AGENT: &str = "vault-watchers/0.1";

/// Options for building an [`HttpFetcher`].
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    pub user_agent: String,
    /// `None` leaves requests without a client-side deadline.
    pub timeout: Option<Duration>,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout: Some(Duration::from_secs(30)),
        }
    }
}

pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(config: FetcherConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder().user_agent(config.user_agent);
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| WatcherError::Other(anyhow::anyhow!("Failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

fn is_gone(status: StatusCode) -> bool {
    status == StatusCode::NOT_FOUND || status == StatusCode::GONE
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch_text(&self, url: &str) -> Result<Fetched> {
        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        debug!(url, %status, "fetched page");

        if is_gone(status) {
            return Ok(Fetched::NotFound);
        }
        if !status.is_success() {
            return Err(WatcherError::SourceUnreachable(format!(
                "{url} returned {status}"
            )));
        }

        Ok(Fetched::Found(resp.text().await?))
    }

    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(WatcherError::SourceUnreachable(format!(
                "{url} returned {status}"
            )));
        }
        Ok(resp.bytes().await?.to_vec())
    }
}
