//! Prometheus metrics and the `/metrics` endpoint.

use crate::error::ControllerError;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};
use source_client::FetchMetrics;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Result of one refresh tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The ConfigMap was written with fresh data
    Updated,
    /// The source could not be fetched; nothing was written
    FetchError,
    /// The store rejected a stale resourceVersion
    Conflict,
    /// Any other store failure
    UpdateError,
}

impl RefreshOutcome {
    /// Label value for the `outcome` label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Updated => "updated",
            Self::FetchError => "fetch_error",
            Self::Conflict => "conflict",
            Self::UpdateError => "update_error",
        }
    }
}

/// All controller metrics, registered on one registry.
#[derive(Debug, Clone)]
pub struct ControllerMetrics {
    registry: Registry,
    /// ConfigMaps currently kept fresh, labelled by `name` and `namespace`
    pub managed: IntGaugeVec,
    /// Refresh ticks by `name`, `namespace` and `outcome`
    pub refreshes: IntCounterVec,
    /// Source fetch counters and latencies
    pub fetch: FetchMetrics,
}

impl ControllerMetrics {
    /// Creates a fresh registry with every controller metric on it.
    pub fn new() -> Result<Self, ControllerError> {
        let registry = Registry::new();

        let managed = IntGaugeVec::new(
            Opts::new(
                "configmap_operator_current_configmaps",
                "The total number of ConfigMaps that are being updated at a time.",
            ),
            &["name", "namespace"],
        )?;
        let refreshes = IntCounterVec::new(
            Opts::new(
                "configmap_operator_refresh_total",
                "Refresh attempts per ConfigMap, by outcome.",
            ),
            &["name", "namespace", "outcome"],
        )?;
        registry.register(Box::new(managed.clone()))?;
        registry.register(Box::new(refreshes.clone()))?;
        let fetch = FetchMetrics::register(&registry)?;

        Ok(Self {
            registry,
            managed,
            refreshes,
            fetch,
        })
    }

    /// The registry backing `/metrics`.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_refresh(&self, name: &str, namespace: &str, outcome: RefreshOutcome) {
        self.refreshes
            .with_label_values(&[name, namespace, outcome.as_str()])
            .inc();
    }

    /// Renders the registry in the Prometheus text format.
    #[cfg(test)]
    pub fn render(&self) -> Result<String, ControllerError> {
        render_registry(&self.registry)
    }
}

fn render_registry(registry: &Registry) -> Result<String, ControllerError> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| ControllerError::InvalidConfig(format!("metrics are not UTF-8: {e}")))
}

async fn metrics_handler(State(registry): State<Registry>) -> Result<String, (StatusCode, String)> {
    render_registry(&registry).map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

/// Builds the metrics router.
pub fn router(registry: Registry) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(registry)
}

/// Binds the metrics listener.
pub async fn bind(addr: SocketAddr) -> Result<TcpListener, ControllerError> {
    let listener = TcpListener::bind(addr).await?;
    info!("Serving metrics on {}", listener.local_addr()?);
    Ok(listener)
}

/// Serves `/metrics` on `listener` until `cancel` fires.
pub async fn serve(
    listener: TcpListener,
    registry: Registry,
    cancel: CancellationToken,
) -> Result<(), ControllerError> {
    axum::serve(listener, router(registry))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;

    info!("Metrics server stopped");
    Ok(())
}
