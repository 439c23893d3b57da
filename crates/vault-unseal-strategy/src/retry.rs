//! Retry Policy and the composable Retry wrapper around an [`UnsealStrategy`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use vault_unseal_client::{SealStatus, VaultClient};
use vault_unseal_core::UnsealError;

use crate::strategy::UnsealStrategy;

const MAX_ATTEMPT_CLAMP: u32 = 30;

/// Consulted by [`RetryStrategy`] to decide whether and how long to wait
/// before retrying a failed unseal attempt.
pub trait RetryPolicy: Send + Sync {
    fn should_retry(&self, err: &UnsealError, attempt: u32) -> bool;
    fn next_delay(&self, attempt: u32) -> Duration;
    fn max_attempts(&self) -> u32;
}

/// `max 3 attempts; delay = min(base * 2^attempt, max_delay)`, attempt
/// clamped to `[0, 30]` to avoid overflow.
#[derive(Debug, Clone, Copy)]
pub struct DefaultRetryPolicy {
    pub max_attempts: u32,
    pub base: Duration,
    pub max_delay: Duration,
}

impl Default for DefaultRetryPolicy {
    fn default() -> Self {
        DefaultRetryPolicy {
            max_attempts: 3,
            base: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy for DefaultRetryPolicy {
    fn should_retry(&self, err: &UnsealError, attempt: u32) -> bool {
        attempt < self.max_attempts.saturating_sub(1) && err.is_retryable()
    }

    fn next_delay(&self, attempt: u32) -> Duration {
        let clamped = attempt.min(MAX_ATTEMPT_CLAMP);
        let factor = 1u32 << clamped;
        self.base.saturating_mul(factor).min(self.max_delay)
    }

    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

/// Decorator that wraps any base [`UnsealStrategy`] with retry-on-failure
/// behavior, consulting a [`RetryPolicy`] for the retry decision and delay.
pub struct RetryStrategy {
    base: Arc<dyn UnsealStrategy>,
    policy: Arc<dyn RetryPolicy>,
}

impl RetryStrategy {
    #[must_use]
    pub fn new(base: Arc<dyn UnsealStrategy>, policy: Arc<dyn RetryPolicy>) -> Self {
        RetryStrategy { base, policy }
    }
}

#[async_trait]
impl UnsealStrategy for RetryStrategy {
    async fn unseal(
        &self,
        client: &dyn VaultClient,
        keys: &[String],
        threshold: u32,
        cancel: &CancellationToken,
    ) -> Result<SealStatus, UnsealError> {
        let mut attempt = 0u32;
        loop {
            match self.base.unseal(client, keys, threshold, cancel).await {
                Ok(status) => return Ok(status),
                Err(err) => {
                    if !err.is_retryable() {
                        return Err(err);
                    }
                    if !self.policy.should_retry(&err, attempt) {
                        return Err(err.annotate_retries_exhausted(attempt + 1));
                    }

                    let delay = self.policy.next_delay(attempt);
                    warn!(attempt, ?delay, endpoint = client.url(), "retrying unseal attempt");
                    tokio::select! {
                        () = tokio::time::sleep(delay) => {}
                        () = cancel.cancelled() => {
                            return Err(UnsealError::cancelled("retry wait cancelled"));
                        }
                    }
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn next_delay_doubles_until_capped() {
        let policy = DefaultRetryPolicy::default();
        assert_eq!(policy.next_delay(0), Duration::from_secs(1));
        assert_eq!(policy.next_delay(1), Duration::from_secs(2));
        assert_eq!(policy.next_delay(2), Duration::from_secs(4));
        assert_eq!(policy.next_delay(10), Duration::from_secs(10));
    }

    #[test]
    fn next_delay_handles_large_attempt_without_overflow() {
        let policy = DefaultRetryPolicy::default();
        assert_eq!(policy.next_delay(1000), Duration::from_secs(10));
    }

    #[test]
    fn should_retry_requires_room_under_max_attempts() {
        let policy = DefaultRetryPolicy::default();
        let retryable = UnsealError::connection("http://v:8200", Duration::from_secs(1), "refused", None);
        assert!(policy.should_retry(&retryable, 0));
        assert!(policy.should_retry(&retryable, 1));
        assert!(!policy.should_retry(&retryable, 2));
    }

    #[test]
    fn should_retry_rejects_non_retryable_errors() {
        let policy = DefaultRetryPolicy::default();
        let err = UnsealError::validation("bad input");
        assert!(!policy.should_retry(&err, 0));
    }
}
