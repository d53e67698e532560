//! Upstream source access
//!
//! Schedulers never talk to reqwest directly. They go through the
//! [`SourceFetcher`] trait so tests can substitute scripted fetchers, and
//! through [`fetch_expanded`] so that "link files" (plain text lists of the
//! real feed URLs) are transparently followed.
//!
//! # Usage
//!
//! ```rust,no_run
//! use m3u_epg_cache::config::HttpConfig;
//! use m3u_epg_cache::sources::{fetch_expanded, HttpFetcher};
//! use m3u_epg_cache::utils::RetryPolicy;
//! use std::time::Duration;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let fetcher = HttpFetcher::new(&HttpConfig::default())?;
//!     let policy = RetryPolicy {
//!         max_attempts: 3,
//!         delay: Duration::from_secs(5),
//!         attempt_timeout: Duration::from_secs(30),
//!     };
//!     let url = "https://example.com/link.epg";
//!     for (source_id, body) in fetch_expanded(&fetcher, &policy, "epg", url).await? {
//!         println!("{source_id}: {} bytes", body.len());
//!     }
//!     Ok(())
//! }
//! ```

use async_trait::async_trait;

use crate::errors::SourceResult;

pub mod http;
pub mod source_list;

pub use http::HttpFetcher;
pub use source_list::{fetch_expanded, fetch_listed, source_list_entries};

/// Retrieves the text body of a playlist or guide source
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Fetch `location` (http(s) URL, `file://` URL or local path) and return
    /// the decompressed text body.
    async fn fetch_text(&self, location: &str) -> SourceResult<String>;
}
