//! Bounded retry with linear backoff.
//!
//! Every retry loop in mocrun has a small fixed bound so that a stage run
//! stays bounded in time. The resolver wraps its whole resolve-then-act
//! sequence in [`with_smart_retry`], which only retries transient failures
//! (detached elements, intercepted clicks, backend hiccups).
//!
//! # Usage
//!
//! ```rust,ignore
//! use mocrun_core::retry::{RetryPolicy, with_smart_retry};
//!
//! let policy = RetryPolicy::interaction();
//! let value = with_smart_retry(&policy, || async { click_submit().await }).await?;
//! ```

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::error::{Error, Result, Severity};

/// Configuration for retry behavior with linear backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay before the first retry (default: 250ms).
    pub initial_delay: Duration,
    /// Amount added to the delay after each retry (default: 250ms, zero = fixed).
    pub step: Duration,
    /// Upper bound for a single delay (default: 2s).
    pub max_delay: Duration,
    /// Random jitter range as percentage (default: 0.0).
    pub jitter_percent: f64,
    /// Maximum number of attempts, inclusive of the first one.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::interaction()
    }
}

impl RetryPolicy {
    /// Create a new retry policy with the specified parameters.
    #[must_use]
    pub fn new(
        initial_delay: Duration,
        step: Duration,
        max_delay: Duration,
        jitter_percent: f64,
        max_attempts: u32,
    ) -> Self {
        Self {
            initial_delay,
            step,
            max_delay,
            jitter_percent: jitter_percent.clamp(0.0, 1.0),
            max_attempts: max_attempts.max(1),
        }
    }

    /// Policy for resolve-then-act sequences: 3 attempts, 250ms + 250ms per retry.
    #[must_use]
    pub fn interaction() -> Self {
        Self {
            initial_delay: Duration::from_millis(250),
            step: Duration::from_millis(250),
            max_delay: Duration::from_secs(2),
            jitter_percent: 0.0,
            max_attempts: 3,
        }
    }

    /// Policy for calendar day scans: 3 attempts, fixed 400ms pause.
    #[must_use]
    pub fn day_scan() -> Self {
        Self {
            initial_delay: Duration::from_millis(400),
            step: Duration::ZERO,
            max_delay: Duration::from_millis(400),
            jitter_percent: 0.0,
            max_attempts: 3,
        }
    }

    /// Policy for page navigation: 2 attempts, 500ms initial.
    #[must_use]
    pub fn navigation() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            step: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            jitter_percent: 0.1,
            max_attempts: 2,
        }
    }

    /// Calculate the delay for a given retry number (0-indexed).
    #[must_use]
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self
            .initial_delay
            .saturating_add(self.step.saturating_mul(attempt))
            .min(self.max_delay);
        let base_ms = base.as_millis().min(u128::from(u64::MAX)) as f64;

        // Apply jitter: ±jitter_percent
        let jitter = if self.jitter_percent > 0.0 {
            let mut rng = rand::rng();
            let jitter_range = base_ms * self.jitter_percent;
            rng.random_range(-jitter_range..=jitter_range)
        } else {
            0.0
        };

        let delay_ms = (base_ms + jitter).max(0.0);
        Duration::from_millis(delay_ms as u64)
    }
}

/// Outcome of a retry operation.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    /// The result (success or final error).
    pub result: Result<T>,
    /// Number of attempts made.
    pub attempts: u32,
    /// Total time spent (including delays).
    pub elapsed: Duration,
}

/// Check if an error is retryable.
#[must_use]
pub fn is_retryable(error: &Error) -> bool {
    error.severity() == Severity::Transient
}

/// Execute an async operation with retry, retrying every failure.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    retry_loop(policy, operation, |_| true).await.result
}

/// Execute an operation with smart retry (only retries transient errors).
pub async fn with_smart_retry<T, F, Fut>(policy: &RetryPolicy, operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    with_smart_retry_outcome(policy, operation).await.result
}

/// Smart retry returning the attempt count alongside the result.
pub async fn with_smart_retry_outcome<T, F, Fut>(
    policy: &RetryPolicy,
    operation: F,
) -> RetryOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    retry_loop(policy, operation, is_retryable).await
}

async fn retry_loop<T, F, Fut, R>(
    policy: &RetryPolicy,
    mut operation: F,
    retryable: R,
) -> RetryOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    R: Fn(&Error) -> bool,
{
    let start = tokio::time::Instant::now();
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!(
                        attempt = attempt + 1,
                        "Operation succeeded after {} retries", attempt
                    );
                }
                return RetryOutcome {
                    result: Ok(value),
                    attempts: attempt + 1,
                    elapsed: start.elapsed(),
                };
            }
            Err(e) => {
                attempt += 1;

                if !retryable(&e) {
                    debug!(attempt, error = %e, "Non-retryable error, giving up");
                    return RetryOutcome {
                        result: Err(e),
                        attempts: attempt,
                        elapsed: start.elapsed(),
                    };
                }

                if attempt >= max_attempts {
                    warn!(
                        attempt,
                        max_attempts,
                        error = %e,
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "Operation failed after all retry attempts"
                    );
                    return RetryOutcome {
                        result: Err(e),
                        attempts: attempt,
                        elapsed: start.elapsed(),
                    };
                }

                let delay = policy.delay_for_attempt(attempt - 1);
                debug!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retrying operation after failure"
                );

                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InteractionError;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            initial_delay: Duration::from_millis(1),
            step: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            jitter_percent: 0.0,
            max_attempts,
        }
    }

    fn detached() -> Error {
        Error::Interaction(InteractionError::Detached {
            descriptor: "row".to_string(),
        })
    }

    #[test]
    fn delay_grows_linearly() {
        let policy = RetryPolicy {
            initial_delay: Duration::from_millis(100),
            step: Duration::from_millis(50),
            max_delay: Duration::from_secs(10),
            jitter_percent: 0.0,
            max_attempts: 5,
        };

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(150));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
    }

    #[test]
    fn delay_capped_at_max() {
        let policy = RetryPolicy {
            initial_delay: Duration::from_millis(100),
            step: Duration::from_millis(300),
            max_delay: Duration::from_millis(500),
            jitter_percent: 0.0,
            max_attempts: 10,
        };

        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(500));
    }

    #[test]
    fn fixed_policy_has_constant_delay() {
        let policy = RetryPolicy::day_scan();
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(400));
    }

    #[test]
    fn jitter_within_range() {
        let policy = RetryPolicy {
            initial_delay: Duration::from_secs(1),
            step: Duration::ZERO,
            max_delay: Duration::from_secs(10),
            jitter_percent: 0.1,
            max_attempts: 5,
        };

        for _ in 0..100 {
            let delay_ms = policy.delay_for_attempt(0).as_millis() as f64;
            assert!(delay_ms >= 900.0, "delay too small: {delay_ms}");
            assert!(delay_ms <= 1100.0, "delay too large: {delay_ms}");
        }
    }

    #[test]
    fn new_never_allows_zero_attempts() {
        let policy = RetryPolicy::new(
            Duration::from_millis(1),
            Duration::ZERO,
            Duration::from_millis(1),
            5.0,
            0,
        );
        assert_eq!(policy.max_attempts, 1);
        assert!((policy.jitter_percent - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn retry_succeeds_immediately() {
        let call_count = Arc::new(AtomicU32::new(0));
        let call_count_clone = Arc::clone(&call_count);

        let result = with_retry(&RetryPolicy::interaction(), || {
            let count = Arc::clone(&call_count_clone);
            async move {
                count.fetch_add(1, Ordering::SeqCst);
                Ok::<_, Error>(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn smart_retry_recovers_from_transient_failures() {
        let call_count = Arc::new(AtomicU32::new(0));
        let call_count_clone = Arc::clone(&call_count);

        let outcome = with_smart_retry_outcome(&fast(3), || {
            let count = Arc::clone(&call_count_clone);
            async move {
                let n = count.fetch_add(1, Ordering::SeqCst);
                if n < 2 { Err(detached()) } else { Ok(7) }
            }
        })
        .await;

        assert_eq!(outcome.result.unwrap(), 7);
        assert_eq!(outcome.attempts, 3);
    }

    #[tokio::test]
    async fn smart_retry_is_bounded() {
        let call_count = Arc::new(AtomicU32::new(0));
        let call_count_clone = Arc::clone(&call_count);

        let result: Result<i32> = with_smart_retry(&fast(3), || {
            let count = Arc::clone(&call_count_clone);
            async move {
                count.fetch_add(1, Ordering::SeqCst);
                Err(detached())
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(call_count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn smart_retry_gives_up_on_fatal_errors() {
        let call_count = Arc::new(AtomicU32::new(0));
        let call_count_clone = Arc::clone(&call_count);

        let result: Result<i32> = with_smart_retry(&fast(3), || {
            let count = Arc::clone(&call_count_clone);
            async move {
                count.fetch_add(1, Ordering::SeqCst);
                Err(Error::Interaction(InteractionError::ElementNotFound {
                    descriptor: "save".to_string(),
                    strategies_tried: Vec::new(),
                }))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn preset_policies_are_bounded() {
        assert_eq!(RetryPolicy::interaction().max_attempts, 3);
        assert_eq!(RetryPolicy::day_scan().max_attempts, 3);
        assert_eq!(RetryPolicy::navigation().max_attempts, 2);
        assert_eq!(
            RetryPolicy::day_scan().initial_delay,
            Duration::from_millis(400)
        );
    }
}
