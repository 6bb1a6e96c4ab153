//! Retry orchestration for remote calls
//!
//! Every backend call goes through [`RetryPolicy::run`]:
//! - each attempt is bounded by the policy timeout (a timeout is retryable)
//! - only errors flagged `retryable` are retried, up to `max_retries`
//! - delay is `base_delay * 2^attempt`, capped at `max_delay`; a server
//!   `retry_after` hint replaces it, under the same cap
//! - cancellation is observed between attempts, never mid-call

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cancel::CancelToken;
use crate::client::AttestError;

/// Retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Upper bound on any single delay
    pub max_delay: Duration,
    /// Double the delay on every retry
    pub exponential: bool,
    /// Per-attempt timeout
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            exponential: true,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Retry tunables as they appear in configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub exponential_backoff: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            exponential_backoff: true,
        }
    }
}

/// A successful value and the retries it took
#[derive(Debug, Clone, PartialEq)]
pub struct Attempted<T> {
    pub value: T,
    pub retries: u32,
}

impl RetryPolicy {
    /// Build a policy from configuration values
    pub fn from_settings(settings: &RetrySettings, timeout: Duration) -> Self {
        Self {
            max_retries: settings.max_retries,
            base_delay: Duration::from_millis(settings.base_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            exponential: settings.exponential_backoff,
            timeout,
        }
    }

    /// Policy that never retries
    pub fn no_retry(timeout: Duration) -> Self {
        Self {
            max_retries: 0,
            timeout,
            ..Self::default()
        }
    }

    /// Delay after failed attempt `attempt` (0-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay = if self.exponential {
            let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
            self.base_delay.checked_mul(factor).unwrap_or(self.max_delay)
        } else {
            self.base_delay
        };
        delay.min(self.max_delay)
    }

    fn delay_after(&self, attempt: u32, err: &AttestError) -> Duration {
        match err.retry_after {
            Some(hint) => hint.min(self.max_delay),
            None => self.delay_for(attempt),
        }
    }

    /// Run `f` under this policy.
    ///
    /// `f` receives the 0-based attempt number. On exhaustion the last error
    /// is returned with `retries` set.
    pub async fn run<T, F, Fut>(
        &self,
        op: &str,
        cancel: &CancelToken,
        mut f: F,
    ) -> Result<Attempted<T>, AttestError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, AttestError>>,
    {
        let mut attempt = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Err(AttestError::cancelled(op).with_retries(attempt));
            }

            let outcome = match tokio::time::timeout(self.timeout, f(attempt)).await {
                Ok(result) => result,
                Err(_) => Err(AttestError::timeout(self.timeout)),
            };

            let err = match outcome {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(op, retries = attempt, "succeeded after retry");
                    }
                    return Ok(Attempted {
                        value,
                        retries: attempt,
                    });
                }
                Err(err) => err,
            };

            if !err.retryable || attempt >= self.max_retries {
                return Err(err.with_retries(attempt));
            }

            let delay = self.delay_after(attempt, &err);
            warn!(
                op,
                attempt = attempt + 1,
                max_attempts = self.max_retries + 1,
                kind = %err.kind,
                code = %err.code,
                delay_ms = delay.as_millis() as u64,
                "retryable failure, backing off"
            );
            if !cancel.sleep(delay).await {
                return Err(AttestError::cancelled_after(op, &err).with_retries(attempt));
            }
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ErrorKind;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            exponential: true,
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_delay_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(4), Duration::from_secs(16));
        assert_eq!(policy.delay_for(5), Duration::from_secs(30));
        assert_eq!(policy.delay_for(60), Duration::from_secs(30));

        let linear = RetryPolicy {
            exponential: false,
            ..RetryPolicy::default()
        };
        assert_eq!(linear.delay_for(3), Duration::from_secs(1));
    }

    #[test]
    fn test_retry_after_hint_is_capped() {
        let policy = RetryPolicy::default();
        let err = AttestError::connection("x").with_retry_after(Duration::from_secs(120));
        assert_eq!(policy.delay_after(0, &err), Duration::from_secs(30));
        let err = AttestError::connection("x").with_retry_after(Duration::from_secs(3));
        assert_eq!(policy.delay_after(2, &err), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exact_attempt_budget() {
        let attempts = AtomicU32::new(0);
        let result: Result<Attempted<()>, _> = fast_policy(3)
            .run("verify", &CancelToken::new(), |_| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(AttestError::connection("refused")) }
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
        assert_eq!(err.retries, 3);
        assert_eq!(err.kind, ErrorKind::Connection);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_fails_immediately() {
        let attempts = AtomicU32::new(0);
        let err = fast_policy(3)
            .run("auth", &CancelToken::new(), |_| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(AttestError::authentication("bad key")) }
            })
            .await
            .unwrap_err();
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(err.retries, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_after_transient_failures() {
        let result = fast_policy(3)
            .run("attest", &CancelToken::new(), |attempt| async move {
                if attempt < 2 {
                    Err(AttestError::server(503, "unavailable", true))
                } else {
                    Ok(attempt)
                }
            })
            .await
            .unwrap();
        assert_eq!(result.value, 2);
        assert_eq!(result.retries, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_retryable() {
        let attempts = AtomicU32::new(0);
        let policy = RetryPolicy {
            timeout: Duration::from_millis(50),
            ..fast_policy(1)
        };
        let err = policy
            .run("slow", &CancelToken::new(), |_| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    Ok::<(), AttestError>(())
                }
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Timeout);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_further_attempts() {
        let token = CancelToken::new();
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);
        let canceller = token.clone();

        let err = fast_policy(5)
            .run("upload", &token, move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                canceller.cancel();
                async { Err::<(), _>(AttestError::connection("reset")) }
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Cancelled);
        assert!(err.message.contains("CONNECTION_FAILED"), "{}", err.message);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
