//! Source data client
//!
//! Resolves a source identifier to raw bytes. An identifier is either an
//! absolute URL (fetched with a single HTTP GET) or a filesystem path (read
//! from disk in one go).
//!
//! # Example
//!
//! ```no_run
//! use source_client::{SourceClient, SourceFetcher};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = SourceClient::new()?;
//!
//! let remote = client.fetch("https://example.com/data.json").await?;
//! let local = client.fetch("/etc/myapp/data.json").await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - **Classification**: see [`Source::classify`]
//! - **Metrics**: optional per-source request counters and latency histograms
//! - **Mocking**: `MockSourceFetcher` behind the `test-util` feature

pub mod client;
pub mod error;
pub mod metrics;
pub mod source;
#[path = "trait.rs"]
pub mod fetcher_trait;
#[cfg(feature = "test-util")]
pub mod mock;

pub use client::SourceClient;
pub use error::{FetchError, FetchErrorKind};
pub use fetcher_trait::SourceFetcher;
pub use metrics::FetchMetrics;
pub use source::Source;
#[cfg(feature = "test-util")]
pub use mock::MockSourceFetcher;
