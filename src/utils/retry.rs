//! Retry utilities for source refreshes
//!
//! Every attempt is bounded by a timeout so a hung upstream burns exactly one
//! attempt instead of stalling the loop. Attempts are separated by a fixed
//! delay.

use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::config::{CacheConfig, HttpConfig};
use crate::errors::{SourceError, SourceResult};

/// Configuration for refresh retry behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one; values below 1 are treated as 1
    pub max_attempts: u32,
    /// Fixed pause between two attempts
    pub delay: Duration,
    /// Upper bound for a single attempt
    pub attempt_timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(cache: &CacheConfig, http: &HttpConfig) -> Self {
        Self {
            max_attempts: cache.retry_attempts,
            delay: cache.retry_delay,
            attempt_timeout: http.request_timeout,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Execute a source operation with retry logic
///
/// # Arguments
///
/// * `policy` - Retry configuration
/// * `resource` - Human-readable name for logging and the final error
/// * `target` - Location reported when an attempt times out
/// * `operation` - Async closure receiving the 1-based attempt number
///
/// # Returns
///
/// The first successful result, the first non-retryable error, or
/// `SourceError::ExhaustedRetry` carrying the last failure.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    resource: &str,
    target: &str,
    mut operation: F,
) -> SourceResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = SourceResult<T>>,
{
    let max_attempts = policy.attempts();
    let mut last_error = SourceError::timeout(target);

    for attempt in 1..=max_attempts {
        let outcome = match timeout(policy.attempt_timeout, operation(attempt)).await {
            Ok(result) => result,
            Err(_) => Err(SourceError::timeout(target)),
        };

        match outcome {
            Ok(value) => {
                if attempt > 1 {
                    debug!(
                        "{} refresh succeeded on attempt {}/{}",
                        resource, attempt, max_attempts
                    );
                }
                return Ok(value);
            }
            Err(err) if !err.is_retryable() => {
                debug!(
                    "{} refresh failed with non-retryable error: {}",
                    resource, err
                );
                return Err(err);
            }
            Err(err) => {
                if attempt < max_attempts {
                    warn!(
                        "{} refresh failed on attempt {}/{}, retrying in {:?}: {}",
                        resource, attempt, max_attempts, policy.delay, err
                    );
                    last_error = err;
                    sleep(policy.delay).await;
                } else {
                    warn!(
                        "{} refresh failed after {} attempts: {}",
                        resource, max_attempts, err
                    );
                    last_error = err;
                }
            }
        }
    }

    Err(SourceError::exhausted(resource, max_attempts, last_error))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Instant;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            delay: Duration::from_millis(10),
            attempt_timeout: Duration::from_millis(100),
        }
    }

    #[tokio::test]
    async fn test_successful_operation_no_retry() {
        let counter = Arc::new(AtomicU32::new(0));

        let result = with_retry(&policy(3), "playlist", "http://x", |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, SourceError>(42)
            }
        })
        .await;

        assert_eq!(result, Ok(42));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let result = with_retry(&policy(3), "playlist", "http://x", |attempt| async move {
            if attempt < 3 {
                Err(SourceError::http("http://x", 502))
            } else {
                Ok(attempt)
            }
        })
        .await;

        assert_eq!(result, Ok(3));
    }

    #[tokio::test]
    async fn test_exhausted_retry_wraps_last_error() {
        let counter = Arc::new(AtomicU32::new(0));

        let result: SourceResult<()> = with_retry(&policy(3), "playlist", "http://x", |attempt| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(SourceError::http("http://x", 500 + attempt as u16))
            }
        })
        .await;

        assert_eq!(counter.load(Ordering::SeqCst), 3);
        match result {
            Err(SourceError::ExhaustedRetry {
                attempts,
                last_error,
                ..
            }) => {
                assert_eq!(attempts, 3);
                assert_eq!(*last_error, SourceError::http("http://x", 503));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_non_retryable_error_immediate_failure() {
        let counter = Arc::new(AtomicU32::new(0));

        let result: SourceResult<()> = with_retry(&policy(5), "playlist", "http://x", |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(SourceError::invalid_config("playlist.url", "empty"))
            }
        })
        .await;

        assert!(matches!(result, Err(SourceError::InvalidConfig { .. })));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_hung_attempt_consumes_one_slot() {
        let counter = Arc::new(AtomicU32::new(0));
        let started = Instant::now();

        let result: SourceResult<()> = with_retry(&policy(2), "epg", "http://slow", |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                std::future::pending::<()>().await;
                Ok(())
            }
        })
        .await;

        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert!(started.elapsed() < Duration::from_secs(2));
        match result {
            Err(SourceError::ExhaustedRetry { last_error, .. }) => {
                assert_eq!(*last_error, SourceError::timeout("http://slow"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_zero_attempts_still_tries_once() {
        let counter = Arc::new(AtomicU32::new(0));
        let _ = with_retry(&policy(0), "playlist", "http://x", |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(SourceError::timeout("http://x"))
            }
        })
        .await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
