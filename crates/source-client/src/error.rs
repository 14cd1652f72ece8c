//! Source client errors

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur when fetching source data
#[derive(Debug, Error)]
pub enum FetchError {
    /// HTTP transport failure or failure while reading the response body
    #[error("failed to fetch {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The file does not exist or cannot be read
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Coarse classification of a [`FetchError`], used for logs and metrics labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    Network,
    Io,
}

impl FetchError {
    /// Returns the kind of failure.
    #[must_use]
    pub fn kind(&self) -> FetchErrorKind {
        match self {
            Self::Network { .. } => FetchErrorKind::Network,
            Self::Io { .. } => FetchErrorKind::Io,
        }
    }
}

impl FetchErrorKind {
    /// Label value for this kind.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Io => "io",
        }
    }
}
