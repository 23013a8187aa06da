//! HTTP client for retrieving files from the origin server

use crate::error::{FetchError, ProxyError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::{debug, warn};

/// Source of remote file contents
#[async_trait]
pub trait OriginClient: Send + Sync {
    /// Retrieve the complete body at `url`
    ///
    /// Only a 2xx response whose body was received in full is a success.
    async fn get(&self, url: &str) -> std::result::Result<Bytes, FetchError>;
}

/// reqwest-backed origin client
pub struct HttpOriginClient {
    client: Client,
}

impl HttpOriginClient {
    /// Create a client with default settings (30s timeout, TLS verified)
    pub fn new() -> Result<Self> {
        Self::with_options(Duration::from_secs(30), true)
    }

    /// Create a client with a custom timeout and TLS verification setting
    ///
    /// The timeout covers the whole request including the body, so a slow
    /// origin cannot hold a waiting request open indefinitely.
    pub fn with_options(timeout: Duration, verify_tls: bool) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(!verify_tls)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| ProxyError::HttpError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(HttpOriginClient { client })
    }

    /// Create a client from the proxy configuration
    pub fn from_config(config: &crate::config::ProxyConfig) -> Result<Self> {
        Self::with_options(config.fetch_timeout(), config.verify_tls)
    }
}

#[async_trait]
impl OriginClient for HttpOriginClient {
    async fn get(&self, url: &str) -> std::result::Result<Bytes, FetchError> {
        debug!("Fetching from origin url={}", url);

        let response = self.client.get(url).send().await.map_err(|e| {
            warn!("GET request failed for url={}: {}", url, e);
            FetchError::from_transport(&e)
        })?;

        let status = response.status();
        if !status.is_success() {
            warn!("Origin returned error for url={}: status={}", url, status);
            return Err(FetchError::UpstreamError {
                status: status.as_u16(),
            });
        }

        // No-content statuses never carry the file
        if status == StatusCode::NO_CONTENT || status == StatusCode::RESET_CONTENT {
            warn!("Origin returned no content for url={}: status={}", url, status);
            return Err(FetchError::UpstreamError {
                status: status.as_u16(),
            });
        }

        let expected = response.content_length();
        let body = response.bytes().await.map_err(|e| {
            warn!("Failed to read body for url={}: {}", url, e);
            FetchError::from_transport(&e)
        })?;

        if let Some(expected) = expected {
            let received = body.len() as u64;
            if received != expected {
                warn!(
                    "Incomplete download for url={}: expected {} bytes, received {}",
                    url, expected, received
                );
                return Err(FetchError::IncompleteDownload { expected, received });
            }
        }

        if body.is_empty() {
            warn!("Origin returned an empty body for url={}: status={}", url, status);
            return Err(FetchError::UpstreamError {
                status: status.as_u16(),
            });
        }

        debug!("Received {} bytes from url={}", body.len(), url);
        Ok(body)
    }
}
