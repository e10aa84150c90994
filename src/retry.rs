//! Bounded retry with exponential backoff for calls made inside a reconcile pass.
//!
//! Used for the test catalog HTTP calls and the `etcdctl` exec channel.
//! Errors that are not [`Error::is_retryable`] return on the first attempt.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::Error;

/// Backoff settings for a single retried call
#[derive(Clone, Debug, PartialEq)]
pub struct RetryConfig {
    /// Total attempts including the first one (minimum 1)
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_delay: Duration,
    /// Upper bound for any delay
    pub max_delay: Duration,
    /// Growth factor between attempts
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Single attempt, no retries
    pub fn once() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Delay before attempt `attempt + 1`, before jitter is applied
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exp = self
            .backoff_multiplier
            .powi(attempt.saturating_sub(1) as i32);
        let secs = (self.initial_delay.as_secs_f64() * exp).min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(secs)
    }
}

/// Run `operation` until it succeeds, fails terminally, or attempts run out.
pub async fn retry_with_backoff<F, Fut, T>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_retryable() => {
                debug!(operation = %operation_name, error = %e, "not retrying terminal error");
                return Err(e);
            }
            Err(e) if attempt >= max_attempts => {
                warn!(
                    operation = %operation_name,
                    attempt,
                    error = %e,
                    "giving up after max attempts"
                );
                return Err(e);
            }
            Err(e) => {
                let jitter = rand::thread_rng().gen_range(0.5..1.5);
                let delay =
                    Duration::from_secs_f64(config.delay_after(attempt).as_secs_f64() * jitter);

                warn!(
                    operation = %operation_name,
                    attempt,
                    error = %e,
                    delay_ms = delay.as_millis() as u64,
                    "call failed, retrying"
                );

                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            backoff_multiplier: 2.0,
        }
    }

    #[test]
    fn test_delay_grows_and_is_capped() {
        let config = RetryConfig {
            max_attempts: 10,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(300),
            backoff_multiplier: 2.0,
        };
        assert_eq!(config.delay_after(1), Duration::from_millis(100));
        assert_eq!(config.delay_after(2), Duration::from_millis(200));
        assert_eq!(config.delay_after(3), Duration::from_millis(300));
        assert_eq!(config.delay_after(8), Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_transient_failure_then_success() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();

        let result = retry_with_backoff(&fast(5), "catalog_probe", || {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(Error::test_catalog("connection reset"))
                } else {
                    Ok("found")
                }
            }
        })
        .await;

        assert_eq!(result.ok(), Some("found"));
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_stops_at_max_attempts() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();

        let result: Result<(), Error> = retry_with_backoff(&fast(3), "catalog_upload", || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(Error::test_catalog("503"))
            }
        })
        .await;

        assert!(matches!(result, Err(Error::TestCatalog(_))));
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_validation_errors_are_not_retried() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();

        let result: Result<(), Error> = retry_with_backoff(&fast(5), "op", || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(Error::validation("bad url"))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_once_means_a_single_attempt() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();

        let _ = retry_with_backoff(&RetryConfig::once(), "op", || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(Error::property_store("exec failed"))
            }
        })
        .await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
