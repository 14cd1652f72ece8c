//! Fetch metrics
//!
//! Counters are incremented on every attempt, latency is observed only for
//! fetches that returned data.

use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};
use std::time::Duration;

/// Per-source request counters and latency histograms.
#[derive(Debug, Clone)]
pub struct FetchMetrics {
    /// HTTP GET requests, labelled by `domain` (the full source URL)
    pub http_requests: IntCounterVec,
    /// HTTP GET latency in seconds, labelled by `domain`
    pub http_latency: HistogramVec,
    /// File reads, labelled by `filepath`
    pub file_reads: IntCounterVec,
    /// File read latency in seconds, labelled by `filepath`
    pub file_latency: HistogramVec,
}

impl FetchMetrics {
    /// Creates the metrics and registers them on `registry`.
    pub fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let http_requests = IntCounterVec::new(
            Opts::new(
                "configmap_operator_http_requests_total",
                "The total number of HTTP GET requests for fetching ConfigMap source data.",
            ),
            &["domain"],
        )?;
        let http_latency = HistogramVec::new(
            HistogramOpts::new(
                "configmap_operator_per_http_request_latency",
                "Latency for HTTP GET requests.",
            ),
            &["domain"],
        )?;
        let file_reads = IntCounterVec::new(
            Opts::new(
                "configmap_operator_file_read_total",
                "The total number of file reads for fetching ConfigMap source data.",
            ),
            &["filepath"],
        )?;
        let file_latency = HistogramVec::new(
            HistogramOpts::new(
                "configmap_operator_per_file_read_latency",
                "Latency for file reads.",
            ),
            &["filepath"],
        )?;

        registry.register(Box::new(http_requests.clone()))?;
        registry.register(Box::new(http_latency.clone()))?;
        registry.register(Box::new(file_reads.clone()))?;
        registry.register(Box::new(file_latency.clone()))?;

        Ok(Self {
            http_requests,
            http_latency,
            file_reads,
            file_latency,
        })
    }

    pub(crate) fn http_attempt(&self, source: &str) {
        self.http_requests.with_label_values(&[source]).inc();
    }

    pub(crate) fn http_completed(&self, source: &str, elapsed: Duration) {
        self.http_latency
            .with_label_values(&[source])
            .observe(elapsed.as_secs_f64());
    }

    pub(crate) fn file_attempt(&self, source: &str) {
        self.file_reads.with_label_values(&[source]).inc();
    }

    pub(crate) fn file_completed(&self, source: &str, elapsed: Duration) {
        self.file_latency
            .with_label_values(&[source])
            .observe(elapsed.as_secs_f64());
    }
}
