//! SourceFetcher trait for mocking
//!
//! The concrete `SourceClient` implements this trait, and tests can use
//! `MockSourceFetcher` instead of touching the network or the filesystem.

use crate::error::FetchError;

/// Resolves a source identifier to its raw bytes.
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Fetches the whole payload behind `source`.
    async fn fetch(&self, source: &str) -> Result<Vec<u8>, FetchError>;
}
