//! Retry helper for persistence operations
//!
//! The iteration and checkpoint stores retry transient write failures a few
//! times before the error becomes fatal to the crawl. The helper is generic
//! over any fallible async operation; [`with_retry_if`] lets callers exempt
//! errors that can never succeed on a second attempt, such as a sealed
//! iteration or a terminal checkpoint.

use anyhow::Result;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry budget and backoff shape
///
/// Delays double per attempt from `base_delay_ms` up to `max_delay_ms`.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the initial attempt
    pub max_retries: u32,

    /// Delay before the first retry, in milliseconds
    pub base_delay_ms: u64,

    /// Ceiling on the doubled delay, in milliseconds
    pub max_delay_ms: u64,
}

impl RetryConfig {
    /// A budget of `max_retries` with moderate delays
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay_ms: 100,
            max_delay_ms: 5_000,
        }
    }

    /// Budget used for fingerprint and checkpoint persistence: three quick
    /// retries, then the failure propagates and fails the crawl
    pub fn storage() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 50,
            max_delay_ms: 1_000,
        }
    }

    /// Delay before retry `attempt` (1-based); attempt 0 never waits
    fn delay_before(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let doubled = self
            .base_delay_ms
            .saturating_mul(1u64 << (attempt - 1).min(32));
        Duration::from_millis(doubled.min(self.max_delay_ms))
    }
}

/// Run `operation` until it succeeds or the budget is spent
pub async fn with_retry<T, F, Fut>(config: &RetryConfig, operation: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    with_retry_if(config, operation, |_| true).await
}

/// Like [`with_retry`], but an error rejected by `should_retry` returns
/// immediately without consuming the remaining budget
pub async fn with_retry_if<T, F, Fut, P>(
    config: &RetryConfig,
    operation: F,
    should_retry: P,
) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
    P: Fn(&anyhow::Error) -> bool,
{
    let mut last = None;

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let wait = config.delay_before(attempt);
            debug!(
                attempt,
                wait_ms = wait.as_millis() as u64,
                "Backing off before retry"
            );
            tokio::time::sleep(wait).await;
        }

        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!(attempt, "Recovered after retry");
                }
                return Ok(value);
            }
            Err(e) if !should_retry(&e) => {
                warn!(error = %e, "Error is not retryable; giving up");
                return Err(e);
            }
            Err(e) => {
                warn!(
                    attempt,
                    remaining = config.max_retries - attempt,
                    error = %e,
                    "Attempt failed"
                );
                last = Some(e);
            }
        }
    }

    Err(last.unwrap_or_else(|| anyhow::anyhow!("retry budget spent with no recorded error")))
}
