//! Resource fetching.
//!
//! The engine consumes fetching through the [`Fetcher`] trait so tests can
//! inject deterministic payloads. The production implementation is a thin
//! reqwest wrapper with a mandatory per-fetch timeout. Every transport
//! failure (timeout, DNS, 4xx/5xx) surfaces uniformly; retry policy belongs
//! to the caller, never to the engine.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use log::debug;
#[cfg(test)]
use mockall::automock;
use reqwest::Client;
use std::time::Duration;

/// Default per-fetch timeout. Overridable via [`HttpFetcher::with_timeout`].
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Retrieves the full byte payload for a URL.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// HTTP fetcher backed by reqwest.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        Self::with_timeout(DEFAULT_FETCH_TIMEOUT)
    }

    /// Build a fetcher with an explicit per-fetch timeout.
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent("cellar-cli")
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    #[tracing::instrument(skip(self))]
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        debug!("Fetching {}...", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Request to {} failed", url))?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("Server returned {} for {}", status, url));
        }

        let bytes = response
            .bytes()
            .await
            .with_context(|| format!("Failed to read response body from {}", url))?;

        debug!("Fetched {} bytes from {}", bytes.len(), url);
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fetch_returns_payload_bytes() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/selenium-4.15.0.tar.gz")
            .with_status(200)
            .with_body("resource payload")
            .create_async()
            .await;

        let fetcher = HttpFetcher::new().unwrap();
        let bytes = fetcher
            .fetch(&format!("{}/selenium-4.15.0.tar.gz", server.url()))
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(bytes, b"resource payload");
    }

    #[tokio::test]
    async fn test_fetch_not_found_is_an_error() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/missing.tar.gz")
            .with_status(404)
            .create_async()
            .await;

        let fetcher = HttpFetcher::new().unwrap();
        let result = fetcher
            .fetch(&format!("{}/missing.tar.gz", server.url()))
            .await;

        mock.assert_async().await;
        let err = result.unwrap_err();
        assert!(err.to_string().contains("404"));
    }

    #[tokio::test]
    async fn test_fetch_server_error_is_an_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/flaky.tar.gz")
            .with_status(503)
            .create_async()
            .await;

        let fetcher = HttpFetcher::new().unwrap();
        let result = fetcher.fetch(&format!("{}/flaky.tar.gz", server.url())).await;

        // One attempt, one failure: the engine never retries internally.
        assert!(result.unwrap_err().to_string().contains("503"));
    }

    #[tokio::test]
    async fn test_fetch_connection_refused_is_an_error() {
        // Nothing listens on this port; DNS/connect failures surface the
        // same way as HTTP errors.
        let fetcher = HttpFetcher::with_timeout(Duration::from_millis(500)).unwrap();
        let result = fetcher.fetch("http://127.0.0.1:9/unreachable").await;

        assert!(result.is_err());
    }
}
