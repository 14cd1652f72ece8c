//! Mock SourceFetcher for unit testing
//!
//! Serves payloads from memory so controller tests do not depend on the
//! network or on files lying around.

use crate::error::FetchError;
use crate::fetcher_trait::SourceFetcher;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
enum Response {
    Payload(Vec<u8>),
    Missing,
}

/// Mock SourceFetcher for testing
///
/// Unknown sources fail with an `Io` error, like a missing file would.
#[derive(Debug, Clone, Default)]
pub struct MockSourceFetcher {
    responses: Arc<Mutex<HashMap<String, Response>>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl MockSourceFetcher {
    /// Create a new mock fetcher with no configured sources
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `payload` for `source`
    pub fn set_payload(&self, source: &str, payload: impl Into<Vec<u8>>) {
        self.responses
            .lock()
            .unwrap()
            .insert(source.to_string(), Response::Payload(payload.into()));
    }

    /// Make `source` fail with an `Io` error
    pub fn set_missing(&self, source: &str) {
        self.responses
            .lock()
            .unwrap()
            .insert(source.to_string(), Response::Missing);
    }

    /// Sources fetched so far, in call order
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl SourceFetcher for MockSourceFetcher {
    async fn fetch(&self, source: &str) -> Result<Vec<u8>, FetchError> {
        self.calls.lock().unwrap().push(source.to_string());

        let response = self.responses.lock().unwrap().get(source).cloned();
        match response {
            Some(Response::Payload(payload)) => Ok(payload),
            Some(Response::Missing) | None => Err(FetchError::Io {
                path: PathBuf::from(source),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "mock source not found"),
            }),
        }
    }
}
