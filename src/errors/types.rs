//! Error type definitions for the catalog cache
//!
//! `AppError` is the top-level error surfaced to the binary. `SourceError`
//! describes everything that can go wrong while refreshing a single upstream
//! resource and is cheap to clone.

use thiserror::Error;

/// Top-level application error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Source handling errors
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Local filesystem errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Source handling specific errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// A fetch attempt did not complete within the configured timeout
    #[error("Connection timeout: {url}")]
    Timeout { url: String },

    /// Upstream answered with a non-success status
    #[error("HTTP error: {status} - {url}")]
    Http { url: String, status: u16 },

    /// Transport level failure (DNS, TLS, reset, body read)
    #[error("Connection failed: {url} - {message}")]
    Connection { url: String, message: String },

    /// Local file source could not be read
    #[error("I/O error: {path} - {message}")]
    Io { path: String, message: String },

    /// Parsing errors for source data
    #[error("Parse error: {source_type} - {message}")]
    ParseError { source_type: String, message: String },

    /// Every attempt of a refresh failed
    #[error("{resource} refresh failed after {attempts} attempt(s): {last_error}")]
    ExhaustedRetry {
        resource: String,
        attempts: u32,
        last_error: Box<SourceError>,
    },

    /// Every source of a multi-source refresh failed
    #[error("All {} {resource} source(s) failed: {}", .failures.len(), .failures.join("; "))]
    AllSourcesFailed {
        resource: String,
        failures: Vec<String>,
    },

    /// Invalid source configuration
    #[error("Invalid configuration: {field} - {message}")]
    InvalidConfig { field: String, message: String },
}

/// Convenience methods for creating common error types
impl AppError {
    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }
}

impl SourceError {
    /// Create a timeout error
    pub fn timeout<U: Into<String>>(url: U) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Create an HTTP status error
    pub fn http<U: Into<String>>(url: U, status: u16) -> Self {
        Self::Http {
            url: url.into(),
            status,
        }
    }

    /// Create a connection error
    pub fn connection<U: Into<String>, M: Into<String>>(url: U, message: M) -> Self {
        Self::Connection {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Create a local I/O error
    pub fn io<P: Into<String>, M: Into<String>>(path: P, message: M) -> Self {
        Self::Io {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create an invalid config error
    pub fn invalid_config<F: Into<String>, M: Into<String>>(field: F, message: M) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a parse error
    pub fn parse_error<S: Into<String>, M: Into<String>>(source_type: S, message: M) -> Self {
        Self::ParseError {
            source_type: source_type.into(),
            message: message.into(),
        }
    }

    /// Create an exhausted retry error wrapping the last attempt's failure
    pub fn exhausted<R: Into<String>>(resource: R, attempts: u32, last_error: SourceError) -> Self {
        Self::ExhaustedRetry {
            resource: resource.into(),
            attempts,
            last_error: Box::new(last_error),
        }
    }

    /// Whether another attempt could plausibly succeed.
    ///
    /// Parse failures count as retryable: upstreams occasionally serve a
    /// truncated or placeholder body that is fine on the next request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. }
                | Self::Http { .. }
                | Self::Connection { .. }
                | Self::Io { .. }
                | Self::ParseError { .. }
        )
    }
}
