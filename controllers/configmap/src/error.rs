//! Controller-specific error types.
//!
//! This module defines error types specific to the ConfigMap controller
//! that are not covered by upstream library errors.

use kube::Error as KubeError;
use thiserror::Error;

/// Errors that can occur in the ConfigMap controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes client construction or API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Opening a watch failed; the event source never delivers events
    #[error("Subscribe failed for {source_name}: {error}")]
    Subscribe {
        source_name: String,
        #[source]
        error: KubeError,
    },

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),

    /// Event payload is not a usable resource
    #[error("Malformed object: {0}")]
    MalformedObject(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Metrics registry error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Socket or other IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors returned by a [`ConfigMapStore`](crate::store::ConfigMapStore) update.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The update carried a stale resourceVersion
    #[error("conflict updating {0}")]
    Conflict(String),

    /// Any other API failure
    #[error("API error: {0}")]
    Api(#[source] KubeError),
}
