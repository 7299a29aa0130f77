//! Bounded retry with multiplicative backoff
//!
//! The blob store is eventually consistent: an object written moments ago may
//! not be listed yet. Reads are retried on a fixed schedule and the caller
//! gets the last error once the attempt budget is spent.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Attempt budget and wait schedule
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total attempts, the first one included
    pub max_attempts: u32,

    /// Wait after the first failed attempt
    pub initial_backoff: Duration,

    /// Cap on a single wait
    pub max_backoff: Duration,

    /// Growth factor between consecutive waits
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::for_blob_store()
    }
}

impl RetryConfig {
    /// Blob read policy: 10 attempts, 2s first wait, x1.5 per attempt, 30s cap
    pub fn for_blob_store() -> Self {
        Self {
            max_attempts: 10,
            initial_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(30),
            multiplier: 1.5,
        }
    }

    /// Millisecond waits, for tests against local servers
    pub fn quick(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            multiplier: 1.5,
        }
    }

    /// Wait that follows failed attempt number `attempt` (zero-based)
    pub fn backoff_duration(&self, attempt: u32) -> Duration {
        let grown = self.initial_backoff.as_secs_f64() * self.multiplier.powi(attempt as i32);
        Duration::from_secs_f64(grown.min(self.max_backoff.as_secs_f64()))
    }

    /// Total time spent waiting when every attempt fails
    pub fn worst_case_wait(&self) -> Duration {
        (0..self.max_attempts.saturating_sub(1))
            .map(|attempt| self.backoff_duration(attempt))
            .sum()
    }
}

/// Errors that know whether trying again could help
pub trait RetryableError {
    fn is_retryable(&self) -> bool;
}

/// Run `operation` until it succeeds, fails permanently, or has been tried
/// `config.max_attempts` times
pub async fn with_retry<F, Fut, T, E>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: RetryableError + Display,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        let error = match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!(operation = operation_name, attempts = attempt + 1, "Succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) => e,
        };
        attempt += 1;

        if attempt >= max_attempts || !error.is_retryable() {
            warn!(
                operation = operation_name,
                attempts = attempt,
                retryable = error.is_retryable(),
                "Giving up: {}",
                error
            );
            return Err(error);
        }

        let backoff = config.backoff_duration(attempt - 1);
        debug!(
            operation = operation_name,
            attempt,
            max_attempts,
            backoff_ms = backoff.as_millis() as u64,
            "Attempt failed, retrying: {}",
            error
        );
        sleep(backoff).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt;

    #[test]
    fn test_blob_store_backoff_schedule() {
        let config = RetryConfig::for_blob_store();

        assert_eq!(config.backoff_duration(0), Duration::from_secs(2));
        assert_eq!(config.backoff_duration(1), Duration::from_secs(3));
        assert_eq!(config.backoff_duration(2), Duration::from_millis(4500));
        // 2 * 1.5^6 = 22.8s; 2 * 1.5^7 = 34.2s is capped
        assert!(config.backoff_duration(6) < Duration::from_secs(30));
        assert_eq!(config.backoff_duration(7), Duration::from_secs(30));
        assert_eq!(config.backoff_duration(20), Duration::from_secs(30));
    }

    #[test]
    fn test_worst_case_wait() {
        let wait = RetryConfig::for_blob_store().worst_case_wait();
        assert!(wait > Duration::from_secs(120));
        assert!(wait < Duration::from_secs(130));
        assert_eq!(RetryConfig::quick(1).worst_case_wait(), Duration::ZERO);
    }

    #[derive(Debug)]
    struct Flaky {
        transient: bool,
    }

    impl fmt::Display for Flaky {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "flaky (transient={})", self.transient)
        }
    }

    impl RetryableError for Flaky {
        fn is_retryable(&self) -> bool {
            self.transient
        }
    }

    #[tokio::test]
    async fn test_succeeds_on_third_attempt() {
        let mut calls = 0;
        let result: Result<u32, Flaky> = with_retry(&RetryConfig::quick(10), "test", || {
            calls += 1;
            let current = calls;
            async move {
                if current < 3 {
                    Err(Flaky { transient: true })
                } else {
                    Ok(current)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn test_makes_exactly_max_attempts() {
        let mut calls = 0;
        let result: Result<(), Flaky> = with_retry(&RetryConfig::quick(10), "test", || {
            calls += 1;
            async { Err(Flaky { transient: true }) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls, 10);
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let mut calls = 0;
        let result: Result<(), Flaky> = with_retry(&RetryConfig::quick(10), "test", || {
            calls += 1;
            async { Err(Flaky { transient: false }) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn test_zero_attempts_still_tries_once() {
        let mut calls = 0;
        let _: Result<(), Flaky> = with_retry(&RetryConfig::quick(0), "test", || {
            calls += 1;
            async { Err(Flaky { transient: true }) }
        })
        .await;

        assert_eq!(calls, 1);
    }
}
