// rust/launch-core/src/download/fetcher.rs

//! Network fetch abstraction.

use std::time::Duration;

use crate::config::DownloadConfig;
use crate::error::{LaunchError, Result};

/// Retrieves the body of a URL as text.
///
/// Implementations must be callable from several threads; the shared
/// downloader only calls `fetch` while holding the target's file lock.
pub trait Fetcher: Send + Sync {
    /// Performs one blocking fetch.
    ///
    /// # Errors
    ///
    /// Returns a download error on transport failure, non-success status,
    /// or a body that is not valid UTF-8.
    fn fetch(&self, url: &str) -> Result<String>;
}

/// Blocking HTTP(S) fetcher.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
}

impl HttpFetcher {
    /// Builds a fetcher from download configuration.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the HTTP client cannot be built
    /// (for example when the TLS backend fails to initialize).
    pub fn new(config: &DownloadConfig) -> Result<Self> {
        let mut builder = reqwest::blocking::Client::builder()
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .user_agent(config.user_agent.clone());

        builder = if config.request_timeout_ms > 0 {
            builder.timeout(Duration::from_millis(config.request_timeout_ms))
        } else {
            builder.timeout(None)
        };

        let client = builder
            .build()
            .map_err(|e| LaunchError::config_with_source("failed to build HTTP client", e))?;

        Ok(Self { client })
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| LaunchError::download_with_source(url, "request failed", e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(LaunchError::download(url, format!("HTTP status {status}")));
        }

        let body = response
            .bytes()
            .map_err(|e| LaunchError::download_with_source(url, "failed to read body", e))?;

        String::from_utf8(body.to_vec())
            .map_err(|e| LaunchError::download_with_source(url, "body is not valid UTF-8", e))
    }
}
