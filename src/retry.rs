//! Retry logic with exponential backoff
//!
//! This module provides bounded retry for transient vendor failures. It
//! implements exponential backoff with jitter to prevent thundering herd, and
//! honors a caller's [`CancellationToken`] between attempts.
//!
//! Only idempotent requests get a retry budget: a retried task-creation call
//! could spawn duplicate remote work, so [`retry_budget`] gives every method
//! other than GET exactly one attempt.
//!
//! # Example
//!
//! ```no_run
//! use faceswap_tasks::retry::with_retry;
//! use faceswap_tasks::config::RetryConfig;
//! use faceswap_tasks::error::Error;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Error> {
//! let config = RetryConfig::default();
//! let cancel = CancellationToken::new();
//! let value = with_retry(&config, config.max_retries, &cancel, || async {
//!     Ok::<_, Error>(42)
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::{Error, Result};
use rand::Rng;
use reqwest::Method;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (transport errors, rate limiting, upstream overload)
/// return `true`. Business errors and client errors return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            // Any transport failure: connect, timeout, reset, body read
            Error::Network(_) => true,
            // Rate limiting and server overload
            Error::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            // Well-formed vendor answer, retrying changes nothing
            Error::Vendor { .. } => false,
            Error::Decode(_) | Error::Serialization(_) => false,
            Error::TaskFailed { .. } | Error::PollTimeout { .. } => false,
            Error::RetriesExhausted { .. } | Error::Cancelled => false,
            Error::Transfer { .. } | Error::Storage(_) | Error::Io(_) => false,
            Error::Config { .. } | Error::NotConfigured(_) => false,
            Error::InvalidInput(_) | Error::TaskNotFound(_) => false,
        }
    }
}

/// Number of retries allowed for a request method
///
/// GET is idempotent and gets the configured budget; everything else is
/// attempted exactly once.
pub fn retry_budget(config: &RetryConfig, method: &Method) -> u32 {
    if *method == Method::GET {
        config.max_retries
    } else {
        0
    }
}

/// Execute an async operation with exponential backoff retry logic
///
/// # Arguments
///
/// * `config` - Backoff shape (base delay, cap, multiplier, jitter)
/// * `max_retries` - Retries allowed after the first attempt
/// * `cancel` - Checked before every attempt and raced against every backoff wait
/// * `operation` - Async closure producing one attempt
///
/// # Returns
///
/// The first successful result. A non-retryable error is returned as-is. A
/// retryable error on the final attempt is wrapped in
/// [`Error::RetriesExhausted`] when at least one retry was allowed, and
/// returned as-is otherwise.
pub async fn with_retry<F, Fut, T>(
    config: &RetryConfig,
    max_retries: u32,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    tracing::info!(attempts = attempt + 1, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if e.is_retryable() && attempt < max_retries => {
                attempt += 1;

                let delay = backoff_delay(config, attempt);
                let delay = if config.jitter {
                    add_jitter(delay)
                } else {
                    delay
                };

                tracing::warn!(
                    error = %e,
                    attempt = attempt,
                    max_retries = max_retries,
                    delay_ms = delay.as_millis() as u64,
                    "Operation failed, retrying"
                );

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => {
                        tracing::debug!(attempt = attempt, "Retry wait cancelled");
                        return Err(Error::Cancelled);
                    }
                }
            }
            Err(e) => {
                if e.is_retryable() && max_retries > 0 {
                    tracing::error!(
                        error = %e,
                        attempts = attempt + 1,
                        "Operation failed after all retry attempts exhausted"
                    );
                    return Err(Error::RetriesExhausted {
                        attempts: attempt + 1,
                        last: Box::new(e),
                    });
                }
                tracing::debug!(error = %e, "Operation failed without retry");
                return Err(e);
            }
        }
    }
}

/// Pre-jitter delay before retry number `retry` (1-based)
///
/// `min(max_delay, base_delay * backoff_multiplier^(retry-1))`
pub fn backoff_delay(config: &RetryConfig, retry: u32) -> Duration {
    let exponent = retry.saturating_sub(1) as i32;
    let secs = config.base_delay.as_secs_f64() * config.backoff_multiplier.powi(exponent);
    if !secs.is_finite() || secs >= config.max_delay.as_secs_f64() {
        return config.max_delay;
    }
    Duration::from_secs_f64(secs.max(0.0)).min(config.max_delay)
}

/// Add random jitter to a delay to prevent thundering herd
///
/// Jitter is uniformly distributed between 0% and 25% of the delay, so the
/// result lies in `[delay, 1.25 * delay]`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=0.25);
    delay + delay.mul_f64(jitter_factor)
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_config() -> RetryConfig {
        RetryConfig {
            max_retries: 3,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    fn server_error() -> Error {
        Error::HttpStatus {
            status: 500,
            body: "internal".into(),
        }
    }

    #[tokio::test]
    async fn test_success_no_retry() {
        let config = RetryConfig::default();
        let cancel = CancellationToken::new();
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = with_retry(&config, config.max_retries, &cancel, || {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, Error>(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 1, "should only call once");
    }

    #[tokio::test]
    async fn test_retry_transient_then_succeed() {
        let config = fast_config();
        let cancel = CancellationToken::new();
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = with_retry(&config, 3, &cancel, || {
            let counter = counter_clone.clone();
            async move {
                let count = counter.fetch_add(1, Ordering::SeqCst);
                if count < 3 { Err(server_error()) } else { Ok(42) }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(
            counter.load(Ordering::SeqCst),
            4,
            "three failures then success uses all four attempts"
        );
    }

    #[tokio::test]
    async fn test_retry_exhausted() {
        let config = fast_config();
        let cancel = CancellationToken::new();
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = with_retry(&config, 3, &cancel, || {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<i32, _>(server_error())
            }
        })
        .await;

        match result {
            Err(Error::RetriesExhausted { attempts, last }) => {
                assert_eq!(attempts, 4);
                assert!(matches!(*last, Error::HttpStatus { status: 500, .. }));
            }
            other => panic!("expected RetriesExhausted, got {other:?}"),
        }
        assert_eq!(counter.load(Ordering::SeqCst), 4, "initial + 3 retries");
    }

    #[tokio::test]
    async fn test_permanent_error_no_retry() {
        let config = fast_config();
        let cancel = CancellationToken::new();
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = with_retry(&config, 3, &cancel, || {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<i32, _>(Error::Vendor {
                    code: 400,
                    message: "bad input".into(),
                })
            }
        })
        .await;

        assert!(matches!(result, Err(Error::Vendor { code: 400, .. })));
        assert_eq!(
            counter.load(Ordering::SeqCst),
            1,
            "should not retry business error"
        );
    }

    #[tokio::test]
    async fn zero_budget_returns_unwrapped_error_after_one_attempt() {
        let config = fast_config();
        let cancel = CancellationToken::new();
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = with_retry(&config, 0, &cancel, || {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<i32, _>(server_error())
            }
        })
        .await;

        assert!(matches!(result, Err(Error::HttpStatus { status: 500, .. })));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exponential_backoff() {
        let config = fast_config();
        let cancel = CancellationToken::new();

        let start = std::time::Instant::now();
        let _result = with_retry(&config, 3, &cancel, || async {
            Err::<i32, _>(server_error())
        })
        .await;
        let elapsed = start.elapsed();

        // 10ms + 20ms + 40ms = 70ms
        assert!(
            elapsed >= Duration::from_millis(70),
            "should wait at least 70ms, waited {:?}",
            elapsed
        );
        assert!(
            elapsed < Duration::from_secs(2),
            "should not wait too long, waited {:?}",
            elapsed
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_during_backoff_returns_promptly() {
        let config = RetryConfig {
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(5),
            jitter: false,
            ..fast_config()
        };
        let cancel = CancellationToken::new();
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            canceller.cancel();
        });

        let start = tokio::time::Instant::now();
        let result = with_retry(&config, 3, &cancel, || {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<i32, _>(server_error())
            }
        })
        .await;

        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(counter.load(Ordering::SeqCst), 1, "no attempt after cancel");
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn already_cancelled_token_skips_the_attempt() {
        let config = fast_config();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();
        let result = with_retry(&config, 3, &cancel, || {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, Error>(1)
            }
        })
        .await;

        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn backoff_delays_double_and_cap() {
        let config = RetryConfig::default();
        assert_eq!(backoff_delay(&config, 1), Duration::from_millis(500));
        assert_eq!(backoff_delay(&config, 2), Duration::from_millis(1000));
        assert_eq!(backoff_delay(&config, 3), Duration::from_millis(2000));
        assert_eq!(backoff_delay(&config, 4), Duration::from_millis(4000));
        assert_eq!(backoff_delay(&config, 5), Duration::from_secs(5));
        assert_eq!(backoff_delay(&config, 60), Duration::from_secs(5));
    }

    #[test]
    fn backoff_delay_never_goes_negative() {
        let config = RetryConfig {
            backoff_multiplier: -2.0,
            ..Default::default()
        };
        assert_eq!(backoff_delay(&config, 2), Duration::ZERO);
        assert_eq!(backoff_delay(&config, 3), Duration::from_secs(2));
    }

    #[test]
    fn add_jitter_stays_within_quarter_of_delay() {
        let delay = Duration::from_millis(400);
        for _ in 0..1000 {
            let jittered = add_jitter(delay);
            assert!(jittered >= delay);
            assert!(jittered <= Duration::from_millis(500));
        }
    }

    #[test]
    fn add_jitter_on_zero_delay_returns_zero() {
        assert_eq!(add_jitter(Duration::ZERO), Duration::ZERO);
    }

    #[test]
    fn only_get_gets_a_retry_budget() {
        let config = RetryConfig::default();
        assert_eq!(retry_budget(&config, &Method::GET), 3);
        assert_eq!(retry_budget(&config, &Method::POST), 0);
        assert_eq!(retry_budget(&config, &Method::PUT), 0);
        assert_eq!(retry_budget(&config, &Method::DELETE), 0);
    }

    #[test]
    fn http_status_classification() {
        let status = |s: u16| Error::HttpStatus {
            status: s,
            body: String::new(),
        };
        assert!(status(500).is_retryable());
        assert!(status(503).is_retryable());
        assert!(status(429).is_retryable());
        assert!(!status(400).is_retryable());
        assert!(!status(404).is_retryable());
        assert!(!status(401).is_retryable());
    }

    #[test]
    fn non_transport_errors_are_not_retryable() {
        assert!(
            !Error::Vendor {
                code: 500,
                message: "x".into()
            }
            .is_retryable()
        );
        assert!(!Error::Cancelled.is_retryable());
        assert!(!Error::Decode("x".into()).is_retryable());
        assert!(
            !Error::PollTimeout {
                task_id: "t".into(),
                timeout: Duration::from_secs(1)
            }
            .is_retryable()
        );
    }
}
