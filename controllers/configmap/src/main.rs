//! ConfigMap Controller
//!
//! Keeps annotated ConfigMaps fresh. A ConfigMap carrying both
//! `configmap-operator-src` and `configmap-operator-key` gets its
//! `data[<key>]` rewritten on a fixed interval with the contents of the
//! source, which is either an HTTP(S) URL or a local file path.
//!
//! Refresh counters and latencies are exposed on `/metrics`.

mod backoff;
mod config;
mod controller;
mod error;
mod metrics;
mod reconciler;
mod refresh;
mod store;
mod subscription;
mod watcher;

#[cfg(test)]
mod test_utils;

use crate::config::{ControllerConfig, LogFormat};
use crate::error::ControllerError;
use crate::metrics::ControllerMetrics;
use controller::Controller;
use kube::Client;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    let config = ControllerConfig::from_env()?;
    init_tracing(&config);

    info!("Starting ConfigMap Controller");
    info!("Configuration:");
    info!("  Namespace: {}", config.namespace);
    info!("  Refresh interval: {}", humantime::format_duration(config.refresh_interval));
    info!("  Metrics address: {}", config.metrics_addr);

    // kube and reqwest both use rustls; pick the provider once for the process
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        info!("rustls crypto provider already installed");
    }

    let client = kube_client(&config).await?;
    let metrics = ControllerMetrics::new()?;
    let cancel = CancellationToken::new();

    let listener = metrics::bind(config.metrics_addr).await?;

    tokio::spawn(shutdown_on_signal(cancel.clone()));
    let metrics_server = tokio::spawn(metrics::serve(
        listener,
        metrics.registry().clone(),
        cancel.clone(),
    ));

    let controller = Controller::new(client, &config, &metrics, cancel.clone())?;
    let result = controller.run().await;

    cancel.cancel();
    match metrics_server.await {
        Ok(Err(e)) => error!("Metrics server failed: {}", e),
        Err(e) => error!("Metrics server panicked: {}", e),
        Ok(Ok(())) => {}
    }

    info!("ConfigMap Controller stopped");
    result
}

fn init_tracing(config: &ControllerConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

async fn kube_client(config: &ControllerConfig) -> Result<Client, ControllerError> {
    let mut kube_config = kube::Config::infer()
        .await
        .map_err(|e| ControllerError::InvalidConfig(format!("Kubernetes client config: {e}")))?;

    if let Some(api_server) = &config.api_server {
        kube_config.cluster_url = api_server
            .parse()
            .map_err(|e| ControllerError::InvalidConfig(format!("KUBE_API_SERVER {api_server:?}: {e}")))?;
    }

    Ok(Client::try_from(kube_config)?)
}

async fn shutdown_on_signal(cancel: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(e) => {
                error!("Cannot listen for SIGTERM: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    info!("Shutdown signal received");
    cancel.cancel();
}
