//! Source client
//!
//! Performs the actual transfer for a classified source: a single HTTP GET
//! for URLs, a full file read for paths. No retries, no caching and no size
//! limit; the whole payload is buffered in memory.

use crate::error::FetchError;
use crate::fetcher_trait::SourceFetcher;
use crate::metrics::FetchMetrics;
use crate::source::Source;
use reqwest::{Client, Url};
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info};

/// Fetches source data over HTTP or from the local filesystem.
#[derive(Debug, Clone)]
pub struct SourceClient {
    client: Client,
    metrics: Option<FetchMetrics>,
}

impl SourceClient {
    /// Create a new source client using the transport's default timeouts.
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = Client::builder().build()?;

        Ok(Self {
            client,
            metrics: None,
        })
    }

    /// Record request counts and latencies on `metrics`.
    #[must_use]
    pub fn with_metrics(mut self, metrics: FetchMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    async fn get(&self, raw: &str, url: Url) -> Result<Vec<u8>, FetchError> {
        info!("Making GET request to {}", raw);
        if let Some(metrics) = &self.metrics {
            metrics.http_attempt(raw);
        }
        let start = Instant::now();

        let network = |source| FetchError::Network {
            url: raw.to_string(),
            source,
        };
        let response = self.client.get(url).send().await.map_err(network)?;
        debug!("GET {} returned {}", raw, response.status());
        let body = response.bytes().await.map_err(network)?;

        if let Some(metrics) = &self.metrics {
            metrics.http_completed(raw, start.elapsed());
        }
        Ok(body.to_vec())
    }

    async fn read(&self, raw: &str, path: &Path) -> Result<Vec<u8>, FetchError> {
        info!("Source is not a URL, reading file {}", raw);
        if let Some(metrics) = &self.metrics {
            metrics.file_attempt(raw);
        }
        let start = Instant::now();

        let data = tokio::fs::read(path).await.map_err(|source| FetchError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        if let Some(metrics) = &self.metrics {
            metrics.file_completed(raw, start.elapsed());
        }
        Ok(data)
    }
}

#[async_trait::async_trait]
impl SourceFetcher for SourceClient {
    async fn fetch(&self, source: &str) -> Result<Vec<u8>, FetchError> {
        let classified = Source::classify(source);
        debug!("Fetching {} source {}", classified.kind(), source);
        match classified {
            Source::Url(url) => self.get(source, url).await,
            Source::File(path) => self.read(source, &path).await,
        }
    }
}
