//! Bounded retry with exponential backoff for provider calls.

use std::future::Future;
use std::time::Duration;

use crate::semantic::embeddings::ProviderError;

/// How many times a provider call is attempted and how long each may take.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first (at least 1)
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_backoff: Duration,
    /// Upper bound for any single delay
    pub max_backoff: Duration,
    /// Per-attempt timeout
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Outcome of a call that did not succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryFailure {
    pub attempts: u32,
    pub last_error: ProviderError,
}

impl RetryPolicy {
    /// Delay to wait after `attempt` (1-based) failed.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }

    /// Run `call` until it succeeds, fails with a non-transient error, or the
    /// attempt budget runs out. Each attempt is bounded by `timeout`.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T, RetryFailure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;

            let error = match tokio::time::timeout(self.timeout, call()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => e,
                Err(_) => ProviderError::Timeout,
            };

            if !error.is_transient() || attempt >= max_attempts {
                return Err(RetryFailure {
                    attempts: attempt,
                    last_error: error,
                });
            }

            let delay = self.backoff_for(attempt);
            log::warn!(
                "{} failed (attempt {}/{}): {}; retrying in {}ms",
                operation,
                attempt,
                max_attempts,
                error,
                delay.as_millis()
            );
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
            timeout: Duration::from_millis(200),
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(350),
            ..Default::default()
        };
        assert_eq!(policy.backoff_for(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(350));
        assert_eq!(policy.backoff_for(30), Duration::from_millis(350));
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = fast_policy(3)
            .run("test", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ProviderError::Throttled)
                } else {
                    Ok(7)
                }
            })
            .await;

        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_budget() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = fast_policy(3)
            .run("test", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ProviderError::Unavailable("down".into()))
            })
            .await;

        let failure = result.unwrap_err();
        assert_eq!(failure.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_does_not_retry_rejections() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = fast_policy(5)
            .run("test", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ProviderError::Rejected("bad".into()))
            })
            .await;

        assert_eq!(result.unwrap_err().attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_slow_call_times_out() {
        let policy = RetryPolicy {
            max_attempts: 2,
            timeout: Duration::from_millis(10),
            ..fast_policy(2)
        };
        let result: Result<(), _> = policy
            .run("test", || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;

        let failure = result.unwrap_err();
        assert_eq!(failure.attempts, 2);
        assert_eq!(failure.last_error, ProviderError::Timeout);
    }
}
