//! Controller configuration.
//!
//! Everything is read from environment variables once at startup.

use crate::error::ControllerError;
use std::env;
use std::net::SocketAddr;
use std::time::Duration;

const DEFAULT_NAMESPACE: &str = "default";
const DEFAULT_REFRESH_INTERVAL: &str = "10s";
const DEFAULT_METRICS_ADDR: &str = "0.0.0.0:9091";
const DEFAULT_LOG_LEVEL: &str = "info";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Runtime configuration for the controller.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Namespace whose ConfigMaps are watched
    pub namespace: String,
    /// Period between two refreshes of one ConfigMap
    pub refresh_interval: Duration,
    /// Listen address of the metrics endpoint
    pub metrics_addr: SocketAddr,
    /// Filter directive used when `RUST_LOG` is unset
    pub log_level: String,
    pub log_format: LogFormat,
    /// Overrides the API server URL from kubeconfig / in-cluster config
    pub api_server: Option<String>,
}

impl ControllerConfig {
    /// Loads the configuration from the process environment.
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Loads the configuration through `lookup`, which maps a variable name to its value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let namespace = lookup("WATCH_NAMESPACE")
            .filter(|ns| !ns.is_empty())
            .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());

        let raw_interval =
            lookup("REFRESH_INTERVAL").unwrap_or_else(|| DEFAULT_REFRESH_INTERVAL.to_string());
        let refresh_interval = humantime::parse_duration(&raw_interval).map_err(|e| {
            ControllerError::InvalidConfig(format!("REFRESH_INTERVAL {raw_interval:?}: {e}"))
        })?;
        if refresh_interval.is_zero() {
            return Err(ControllerError::InvalidConfig(
                "REFRESH_INTERVAL must be greater than zero".to_string(),
            ));
        }

        let raw_addr = lookup("METRICS_ADDR").unwrap_or_else(|| DEFAULT_METRICS_ADDR.to_string());
        let metrics_addr = raw_addr
            .parse::<SocketAddr>()
            .map_err(|e| ControllerError::InvalidConfig(format!("METRICS_ADDR {raw_addr:?}: {e}")))?;

        let log_level = lookup("LOG_LEVEL").unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string());
        if !matches!(log_level.as_str(), "error" | "warn" | "info" | "debug") {
            return Err(ControllerError::InvalidConfig(format!(
                "LOG_LEVEL must be one of error, warn, info, debug (got {log_level:?})"
            )));
        }

        let log_format = match lookup("LOG_FORMAT").as_deref() {
            Some("json") => LogFormat::Json,
            Some("text" | "") | None => LogFormat::Text,
            Some(other) => {
                return Err(ControllerError::InvalidConfig(format!(
                    "LOG_FORMAT must be text or json (got {other:?})"
                )));
            }
        };

        let api_server = lookup("KUBE_API_SERVER").filter(|url| !url.is_empty());

        Ok(Self {
            namespace,
            refresh_interval,
            metrics_addr,
            log_level,
            log_format,
            api_server,
        })
    }
}
