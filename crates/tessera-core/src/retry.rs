//! Retry with exponential backoff and jitter
//!
//! Only transient failures are retried. Attempts for one operation are
//! strictly sequential; concurrent operations each own their own loop.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::error::{ProviderError, ProviderResult};

/// Errors that know whether another attempt could succeed.
pub trait Transient {
    fn is_transient(&self) -> bool;
}

impl Transient for ProviderError {
    fn is_transient(&self) -> bool {
        ProviderError::is_transient(self)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first; 0 behaves like 1
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Fraction of the delay added or removed at random, in [0, 1]
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (1-based), before jitter.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(2_u32.pow(exponent))
            .min(self.max_delay)
    }

    fn jittered(&self, delay: Duration) -> Duration {
        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 || delay.is_zero() {
            return delay;
        }
        let factor = rand::thread_rng().gen_range(1.0 - jitter..=1.0 + jitter);
        delay.mul_f64(factor)
    }
}

/// Run `op` until it succeeds, fails permanently, or the attempt budget is
/// spent. The last error is returned unchanged.
pub async fn with_retry<T, E, F, Fut>(policy: &RetryPolicy, operation: &str, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Transient + Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match op().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::debug!(operation = %operation, attempt = %attempt, "Succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if !e.is_transient() => {
                tracing::debug!(operation = %operation, attempt = %attempt, error = %e, "Permanent failure, not retrying");
                return Err(e);
            }
            Err(e) if attempt >= max_attempts => {
                tracing::warn!(
                    operation = %operation,
                    attempts = %attempt,
                    error = %e,
                    "Retry budget exhausted"
                );
                return Err(e);
            }
            Err(e) => {
                let delay = policy.jittered(policy.backoff_delay(attempt));
                tracing::debug!(
                    operation = %operation,
                    attempt = %attempt,
                    delay_ms = %delay.as_millis(),
                    error = %e,
                    "Transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Bound a single provider call; an elapsed deadline becomes a transient
/// `Timeout`.
pub async fn with_deadline<T, Fut>(limit: Duration, operation: &str, fut: Fut) -> ProviderResult<T>
where
    Fut: Future<Output = ProviderResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(ProviderError::Timeout(format!(
            "{} exceeded {}ms",
            operation,
            limit.as_millis()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            jitter: 0.5,
        }
    }

    async fn flaky(calls: &AtomicU32, failures: u32) -> ProviderResult<&'static str> {
        let n = calls.fetch_add(1, Ordering::SeqCst);
        if n < failures {
            Err(ProviderError::Unavailable {
                status: 503,
                message: format!("attempt {}", n + 1),
            })
        } else {
            Ok("ok")
        }
    }

    #[tokio::test]
    async fn test_succeeds_after_k_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&fast_policy(4), "flaky", || flaky(&calls, 3)).await;
        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_exhaustion_propagates_last_error() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&fast_policy(3), "flaky", || flaky(&calls, 3)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            result.unwrap_err(),
            ProviderError::Unavailable {
                status: 503,
                message: "attempt 3".into()
            }
        );
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: ProviderResult<()> = with_retry(&fast_policy(5), "lookup", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ProviderError::BadRequest("malformed hash".into()))
        })
        .await;
        assert!(matches!(result, Err(ProviderError::BadRequest(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_zero_attempts_still_runs_once() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&fast_policy(0), "flaky", || flaky(&calls, 0)).await;
        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1000),
            jitter: 0.0,
        };
        assert_eq!(policy.backoff_delay(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_delay(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_delay(3), Duration::from_millis(400));
        assert_eq!(policy.backoff_delay(8), Duration::from_millis(1000));
    }

    #[test]
    fn test_jitter_stays_within_band() {
        let policy = RetryPolicy {
            jitter: 0.25,
            ..RetryPolicy::default()
        };
        let base = Duration::from_millis(400);
        for _ in 0..100 {
            let delay = policy.jittered(base);
            assert!(delay >= Duration::from_millis(299) && delay <= Duration::from_millis(501));
        }
    }

    #[tokio::test]
    async fn test_deadline_maps_to_transient_timeout() {
        let result: ProviderResult<()> = with_deadline(Duration::from_millis(5), "slow", async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(())
        })
        .await;
        let err = result.unwrap_err();
        assert!(matches!(err, ProviderError::Timeout(_)));
        assert!(err.is_transient());
    }
}
