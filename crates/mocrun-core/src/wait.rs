//! Shared wait-for utilities.
//!
//! Polling with backoff against a deadline. Predicates may borrow the page
//! they observe; nothing here requires `'static` futures.

use std::fmt;
use std::future::Future;

use tokio::time::{Duration, Instant, sleep};

use crate::error::InteractionError;

/// Backoff configuration for wait loops.
#[derive(Debug, Clone)]
pub struct Backoff {
    /// Initial delay before the second poll.
    pub initial: Duration,
    /// Maximum delay between polls.
    pub max: Duration,
    /// Multiplicative factor for backoff growth.
    pub factor: u32,
    /// Optional max poll count (inclusive of the first poll).
    pub max_retries: Option<usize>,
}

impl Backoff {
    /// Compute the next delay given the current delay.
    #[must_use]
    pub fn next_delay(&self, current: Duration) -> Duration {
        let next = current.saturating_mul(self.factor);
        if next > self.max { self.max } else { next }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(50),
            max: Duration::from_millis(500),
            factor: 2,
            max_retries: None,
        }
    }
}

/// Result of a predicate check in a wait loop.
#[derive(Debug, Clone)]
pub enum WaitFor<T> {
    /// Predicate satisfied.
    Ready(T),
    /// Predicate not yet satisfied.
    NotReady { last_observed: Option<String> },
}

impl<T> WaitFor<T> {
    /// Convenience constructor for Ready.
    #[must_use]
    pub fn ready(value: T) -> Self {
        Self::Ready(value)
    }

    /// Convenience constructor for NotReady.
    #[must_use]
    pub fn not_ready(last_observed: impl Into<Option<String>>) -> Self {
        Self::NotReady {
            last_observed: last_observed.into(),
        }
    }
}

/// Timeout error returned by wait helpers.
#[derive(Debug, Clone)]
pub struct WaitError {
    /// Condition that was expected to become true.
    pub expected: String,
    /// Most recent observed state.
    pub last_observed: Option<String>,
    /// Number of polls attempted (including the first).
    pub retries: usize,
    /// Elapsed time while waiting.
    pub elapsed: Duration,
}

impl fmt::Display for WaitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let last = self.last_observed.as_deref().unwrap_or("<none>");
        write!(
            f,
            "timeout waiting for {} after {}ms (retries={}, last_observed={})",
            self.expected,
            self.elapsed.as_millis(),
            self.retries,
            last
        )
    }
}

impl std::error::Error for WaitError {}

impl From<WaitError> for InteractionError {
    fn from(err: WaitError) -> Self {
        Self::Timeout {
            waited_ms: u64::try_from(err.elapsed.as_millis()).unwrap_or(u64::MAX),
            what: match err.last_observed {
                Some(last) => format!("{} (last observed: {last})", err.expected),
                None => err.expected,
            },
        }
    }
}

/// Wait for a predicate to become ready within a timeout using backoff.
///
/// The predicate is polled at least once, even with a zero timeout.
pub async fn wait_for<F, Fut, T>(
    expected: impl Into<String>,
    mut check: F,
    timeout: Duration,
    backoff: &Backoff,
) -> Result<T, WaitError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = WaitFor<T>>,
{
    let start = Instant::now();
    let deadline = start + timeout;
    let mut retries = 0usize;
    let mut delay = backoff.initial;
    let mut last_observed = None;

    loop {
        retries = retries.saturating_add(1);
        match check().await {
            WaitFor::Ready(value) => return Ok(value),
            WaitFor::NotReady { last_observed: obs } => {
                if obs.is_some() {
                    last_observed = obs;
                }
            }
        }

        let now = Instant::now();
        let timeout_reached = now >= deadline;
        let retries_exhausted = backoff.max_retries.is_some_and(|max| retries >= max);
        if timeout_reached || retries_exhausted {
            return Err(WaitError {
                expected: expected.into(),
                last_observed,
                retries,
                elapsed: now.saturating_duration_since(start),
            });
        }

        let remaining = deadline.saturating_duration_since(now);
        let sleep_for = if delay > remaining { remaining } else { delay };
        if !sleep_for.is_zero() {
            sleep(sleep_for).await;
        }
        delay = backoff.next_delay(delay);
    }
}

/// Wait for a boolean condition.
pub async fn wait_until<F, Fut>(
    expected: impl Into<String>,
    mut check: F,
    timeout: Duration,
    backoff: &Backoff,
) -> Result<(), WaitError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    wait_for(
        expected,
        || {
            let fut = check();
            async move {
                if fut.await {
                    WaitFor::Ready(())
                } else {
                    WaitFor::not_ready(None)
                }
            }
        },
        timeout,
        backoff,
    )
    .await
}

/// Fixed pause for re-rendering widgets (cascading dropdowns, calendar repaint).
pub async fn settle(duration: Duration, reason: &str) {
    if duration.is_zero() {
        return;
    }
    tracing::trace!(delay_ms = duration.as_millis() as u64, reason, "Settling");
    sleep(duration).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn backoff_schedule_increases_and_caps() {
        let backoff = Backoff {
            initial: Duration::from_millis(10),
            max: Duration::from_millis(70),
            factor: 2,
            max_retries: None,
        };

        let mut delay = backoff.initial;
        delay = backoff.next_delay(delay);
        assert_eq!(delay, Duration::from_millis(20));
        delay = backoff.next_delay(delay);
        assert_eq!(delay, Duration::from_millis(40));
        delay = backoff.next_delay(delay);
        assert_eq!(delay, Duration::from_millis(70));
        delay = backoff.next_delay(delay);
        assert_eq!(delay, Duration::from_millis(70));
    }

    #[test]
    fn wait_error_display_includes_all_fields() {
        let err = WaitError {
            expected: "alert visible".to_string(),
            last_observed: Some("0 matches".to_string()),
            retries: 5,
            elapsed: Duration::from_millis(3200),
        };
        let msg = err.to_string();
        assert!(msg.contains("alert visible"));
        assert!(msg.contains("3200ms"));
        assert!(msg.contains("retries=5"));
        assert!(msg.contains("0 matches"));
    }

    #[test]
    fn wait_error_converts_to_timeout() {
        let err = WaitError {
            expected: "navigation".to_string(),
            last_observed: None,
            retries: 1,
            elapsed: Duration::from_millis(60),
        };
        match InteractionError::from(err) {
            InteractionError::Timeout { what, waited_ms } => {
                assert_eq!(what, "navigation");
                assert_eq!(waited_ms, 60);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_returns_when_ready() {
        let polls = Cell::new(0);
        let value = wait_for(
            "third poll",
            || {
                polls.set(polls.get() + 1);
                let n = polls.get();
                async move {
                    if n >= 3 {
                        WaitFor::Ready(n)
                    } else {
                        WaitFor::not_ready(format!("poll {n}"))
                    }
                }
            },
            Duration::from_secs(5),
            &Backoff::default(),
        )
        .await
        .unwrap();
        assert_eq!(value, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_times_out_with_last_observation() {
        let err = wait_for(
            "never",
            || async { WaitFor::<()>::not_ready("still nothing".to_string()) },
            Duration::from_millis(300),
            &Backoff::default(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.expected, "never");
        assert_eq!(err.last_observed.as_deref(), Some("still nothing"));
        assert!(err.retries > 1);
        assert!(err.elapsed >= Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_timeout_polls_once() {
        let polls = Cell::new(0);
        let result = wait_until(
            "flag",
            || {
                polls.set(polls.get() + 1);
                async { false }
            },
            Duration::ZERO,
            &Backoff::default(),
        )
        .await;
        assert!(result.is_err());
        assert_eq!(polls.get(), 1);
    }
}
