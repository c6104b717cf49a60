//! Exponential-backoff retry for upstream calls.
//!
//! # Example
//!
//! ```rust,no_run
//! use maktaba::{with_retry_if, RetryPolicy, Error};
//! use std::time::Duration;
//!
//! # async fn example() -> maktaba::Result<()> {
//! let policy = RetryPolicy::exponential(3)
//!     .with_initial_delay(Duration::from_secs(5));
//!
//! let value = with_retry_if(&policy, Error::is_transient, || async {
//!     Ok::<_, Error>(42)
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::{Error, Result};

/// Retry schedule: exponential backoff with a delay cap.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_delay: Duration,
    multiplier: f64,
    max_delay: Duration,
}

impl RetryPolicy {
    /// Exponential backoff starting at 1 s, doubling, capped at 60 s.
    #[must_use]
    pub fn exponential(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
        }
    }

    /// Run at most once; failures surface immediately.
    #[must_use]
    pub fn none() -> Self {
        Self::exponential(1)
    }

    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    #[must_use]
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    #[must_use]
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Total number of attempts (initial call included).
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before retry number `attempt` (0-based: the delay after the
    /// first failure is `delay_for(0)`).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt as i32);
        let delay = self.initial_delay.mul_f64(factor);
        delay.min(self.max_delay)
    }
}

/// Retry `operation` on any error according to `policy`.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, operation: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    with_retry_if(policy, |_| true, operation).await
}

/// Retry `operation` according to `policy`, but only when `retry_if`
/// accepts the error. Non-matching errors and the final failure are
/// returned as-is.
pub async fn with_retry_if<T, F, Fut, P>(
    policy: &RetryPolicy,
    retry_if: P,
    operation: F,
) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
    P: Fn(&Error) -> bool,
{
    let mut attempt = 0u32;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let last = attempt + 1 >= policy.max_attempts();
                if last || !retry_if(&err) {
                    return Err(err);
                }
                let delay = policy.delay_for(attempt);
                warn!(
                    attempt = attempt + 1,
                    max_attempts = policy.max_attempts(),
                    delay_secs = delay.as_secs_f64(),
                    error = %err,
                    "Retrying after transient failure"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_delay_schedule() {
        let policy = RetryPolicy::exponential(3)
            .with_initial_delay(Duration::from_secs(5))
            .with_multiplier(2.0);
        assert_eq!(policy.delay_for(0), Duration::from_secs(5));
        assert_eq!(policy.delay_for(1), Duration::from_secs(10));
        assert_eq!(policy.delay_for(2), Duration::from_secs(20));
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = RetryPolicy::exponential(10)
            .with_initial_delay(Duration::from_secs(4))
            .with_max_delay(Duration::from_secs(10));
        assert_eq!(policy.delay_for(0), Duration::from_secs(4));
        assert_eq!(policy.delay_for(1), Duration::from_secs(8));
        assert_eq!(policy.delay_for(2), Duration::from_secs(10));
        assert_eq!(policy.delay_for(5), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::exponential(3).with_initial_delay(Duration::from_millis(1));

        let result = with_retry(&policy, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(Error::timeout("flaky"))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_returns_last_error() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::exponential(3).with_initial_delay(Duration::from_millis(1));

        let result: Result<()> = with_retry(&policy, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::timeout("always down")) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_predicate_short_circuits() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::exponential(5).with_initial_delay(Duration::from_millis(1));

        let result: Result<()> = with_retry_if(&policy, Error::is_transient, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::api("400 bad request")) }
        })
        .await;

        assert!(result.is_err());
        // Non-transient error must not be retried.
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
