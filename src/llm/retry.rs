//! Retry policy for classification calls.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::LlmError;

/// Bounded exponential-backoff retry.
///
/// `max_attempts` counts every call including the first. The delay before
/// retry `n` is `initial_backoff * 2^(n-1)`, or the server's `Retry-After`
/// on a rate limit, capped at `max_backoff`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    retryable: fn(&LlmError) -> bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(2), Duration::from_secs(10))
    }
}

impl RetryPolicy {
    /// A policy retrying transient failures only.
    pub fn new(max_attempts: u32, initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff,
            max_backoff,
            retryable: LlmError::is_transient,
        }
    }

    /// Same attempt budget, no waiting between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO, Duration::ZERO)
    }

    /// Replace the retryable-error predicate.
    pub fn with_predicate(mut self, retryable: fn(&LlmError) -> bool) -> Self {
        self.retryable = retryable;
        self
    }

    /// Delay to wait after failed attempt `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    /// Delay after failed attempt `attempt`. A server-sent `Retry-After`
    /// replaces the computed backoff, still capped at `max_backoff`.
    pub fn delay_for(&self, attempt: u32, err: &LlmError) -> Duration {
        match err {
            LlmError::RateLimited {
                retry_after: Some(wait),
                ..
            } => (*wait).min(self.max_backoff),
            _ => self.backoff(attempt),
        }
    }

    pub fn is_retryable(&self, err: &LlmError) -> bool {
        (self.retryable)(err)
    }

    /// Run `operation` until it succeeds, fails permanently, or the budget runs out.
    ///
    /// The closure receives the 1-based attempt number. The last error is returned.
    pub async fn run<T, F, Fut>(&self, operation_name: &str, mut operation: F) -> Result<T, LlmError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, LlmError>>,
    {
        let mut attempt = 1;
        loop {
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if self.is_retryable(&e) && attempt < self.max_attempts => {
                    let delay = self.delay_for(attempt, &e);
                    warn!(
                        "{} failed (attempt {}/{}): {}. Retrying in {:?}...",
                        operation_name, attempt, self.max_attempts, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn timeout() -> LlmError {
        LlmError::Timeout {
            provider: "test".into(),
            timeout: Duration::from_secs(30),
        }
    }

    fn auth() -> LlmError {
        LlmError::AuthFailed {
            provider: "test".into(),
        }
    }

    #[test]
    fn default_backoff_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.backoff(1), Duration::from_secs(2));
        assert_eq!(policy.backoff(2), Duration::from_secs(4));
        assert_eq!(policy.backoff(3), Duration::from_secs(8));
        assert_eq!(policy.backoff(4), Duration::from_secs(10));
        assert_eq!(policy.backoff(40), Duration::from_secs(10));
    }

    fn rate_limited(retry_after: Option<Duration>) -> LlmError {
        LlmError::RateLimited {
            provider: "test".into(),
            retry_after,
        }
    }

    #[test]
    fn retry_after_overrides_backoff_within_cap() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.delay_for(1, &rate_limited(Some(Duration::from_secs(5)))),
            Duration::from_secs(5)
        );
        assert_eq!(
            policy.delay_for(1, &rate_limited(Some(Duration::from_secs(120)))),
            Duration::from_secs(10)
        );
        assert_eq!(policy.delay_for(2, &rate_limited(None)), Duration::from_secs(4));
        assert_eq!(policy.delay_for(1, &timeout()), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn run_waits_for_retry_after() {
        let policy = RetryPolicy::new(3, Duration::ZERO, Duration::from_millis(500));
        let started = std::time::Instant::now();
        let result = policy
            .run("test op", |attempt| async move {
                if attempt == 1 {
                    Err(rate_limited(Some(Duration::from_millis(40))))
                } else {
                    Ok(attempt)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 2);
        assert!(started.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn zero_attempts_is_clamped_to_one() {
        assert_eq!(RetryPolicy::immediate(0).max_attempts, 1);
    }

    #[tokio::test]
    async fn stops_after_budget_on_transient_errors() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = RetryPolicy::immediate(3)
            .run("test op", |_| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(timeout())
            })
            .await;
        assert!(matches!(result, Err(LlmError::Timeout { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = RetryPolicy::immediate(3)
            .run("test op", |_| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(auth())
            })
            .await;
        assert!(matches!(result, Err(LlmError::AuthFailed { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn recovers_after_transient_failure() {
        let result = RetryPolicy::immediate(3)
            .run("test op", |attempt| async move {
                if attempt < 2 { Err(timeout()) } else { Ok(attempt) }
            })
            .await;
        assert_eq!(result.unwrap(), 2);
    }

    #[tokio::test]
    async fn custom_predicate_overrides_default() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::immediate(3).with_predicate(|_| false);
        let _ = policy
            .run("test op", |_| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(timeout())
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
