//! Source identifier classification.

use reqwest::Url;
use std::path::PathBuf;

/// A classified source identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// Absolute URL with a scheme and a host
    Url(Url),
    /// Anything else is read from the filesystem
    File(PathBuf),
}

impl Source {
    /// Classifies a raw source identifier.
    ///
    /// The identifier is a URL only when it parses as an absolute URI with a
    /// non-empty scheme and a non-empty host. Everything else, including
    /// strings that are neither, is treated as a filesystem path.
    #[must_use]
    pub fn classify(raw: &str) -> Self {
        match Url::parse(raw) {
            Ok(url) if !url.scheme().is_empty() && url.host_str().is_some_and(|h| !h.is_empty()) => {
                Self::Url(url)
            }
            _ => Self::File(PathBuf::from(raw)),
        }
    }

    /// Label value for the fetch kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Url(_) => "http",
            Self::File(_) => "file",
        }
    }
}
