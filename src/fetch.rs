//! Artifact byte fetching

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Retrieves the raw bytes behind a download link.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, link: &Url, referer: &Url) -> Result<Vec<u8>>;
}

/// reqwest-backed fetcher. The client keeps a cookie store so the download
/// request carries whatever session the site handed out.
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

/// Build the shared HTTP client used for page loads and downloads.
pub fn build_client(user_agent: &str, timeout: Duration) -> Result<Client> {
    let client = Client::builder()
        .user_agent(user_agent)
        .timeout(timeout)
        .cookie_store(true)
        .build()?;
    Ok(client)
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, link: &Url, referer: &Url) -> Result<Vec<u8>> {
        debug!("Downloading from: {}", link);
        let response = self
            .client
            .get(link.clone())
            .header("Referer", referer.as_str())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("HTTP {}", status));
        }

        let content = response.bytes().await?;
        Ok(content.to_vec())
    }
}
