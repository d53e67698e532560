//! Centralized error handling for the catalog cache
//!
//! This module unifies the error types produced while fetching, parsing and
//! refreshing playlist and guide sources.
//!
//! # Error Categories
//!
//! - **Source Errors**: upstream connectivity, HTTP status, payload parsing and
//!   exhausted retry loops. These are `Clone` so that every caller joined onto a
//!   single in-flight refresh observes the same failure.
//! - **Application Errors**: configuration, local I/O and anything else that
//!   reaches the binary.
//!
//! # Usage
//!
//! ```rust
//! use m3u_epg_cache::errors::{SourceError, SourceResult};
//!
//! fn example_function(payload: &str) -> SourceResult<usize> {
//!     if payload.is_empty() {
//!         return Err(SourceError::parse_error("m3u", "empty payload"));
//!     }
//!     Ok(payload.len())
//! }
//! ```

pub mod types;

pub use types::*;

/// Convenience type alias for Results using AppError
pub type AppResult<T> = Result<T, AppError>;

/// Convenience type alias for Source Results
pub type SourceResult<T> = Result<T, SourceError>;
