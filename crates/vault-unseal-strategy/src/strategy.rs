//! Unseal Strategy: ordered single-share submission with quorum logic.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};
use vault_unseal_client::{SealStatus, VaultClient};
use vault_unseal_core::{KeyValidator, UnsealError};

const INTER_SHARE_PAUSE: Duration = Duration::from_millis(100);

/// Reports unseal-attempt outcomes. Re-exported from the client crate's
/// narrow trait so strategies can depend on it without a cyclic reference
/// back to a concrete metrics type.
pub use vault_unseal_client::MetricsSink;

/// A single operation: drive `client` from sealed to unsealed using `keys`,
/// submitting at most `threshold` of them.
#[async_trait]
pub trait UnsealStrategy: Send + Sync {
    async fn unseal(
        &self,
        client: &dyn VaultClient,
        keys: &[String],
        threshold: u32,
        cancel: &CancellationToken,
    ) -> Result<SealStatus, UnsealError>;
}

/// Reference implementation: validate, recheck status, submit shares in
/// order with a 100 ms pause between submissions, stop once unsealed.
pub struct DefaultUnsealStrategy {
    validator: Arc<dyn KeyValidator>,
    metrics: Arc<dyn MetricsSink>,
}

impl DefaultUnsealStrategy {
    #[must_use]
    pub fn new(validator: Arc<dyn KeyValidator>, metrics: Arc<dyn MetricsSink>) -> Self {
        DefaultUnsealStrategy { validator, metrics }
    }
}

#[async_trait]
impl UnsealStrategy for DefaultUnsealStrategy {
    #[instrument(skip(self, client, keys, cancel), fields(endpoint = client.url()))]
    async fn unseal(
        &self,
        client: &dyn VaultClient,
        keys: &[String],
        threshold: u32,
        cancel: &CancellationToken,
    ) -> Result<SealStatus, UnsealError> {
        self.validator.validate_set(keys, threshold)?;

        let mut status = client.get_seal_status().await?;
        if !status.sealed {
            self.metrics.record_unseal_attempt(client.url(), true, 0);
            return Ok(status);
        }

        let limit = (threshold as usize).min(keys.len());
        let mut submitted = 0u32;

        for (idx0, share) in keys.iter().take(limit).enumerate() {
            let one_based = idx0 + 1;
            if cancel.is_cancelled() {
                return Err(UnsealError::cancelled(
                    "unseal cancelled before all shares submitted",
                ));
            }

            match client.submit_single_share(share, one_based).await {
                Ok(new_status) => {
                    submitted += 1;
                    status = new_status;
                    if !status.sealed {
                        debug!(shares_submitted = submitted, "vault unsealed");
                        break;
                    }
                }
                Err(cause) => {
                    self.metrics.record_unseal_attempt(client.url(), false, submitted);
                    return Err(UnsealError::unseal(client.url(), idx0, cause, None));
                }
            }

            tokio::select! {
                () = tokio::time::sleep(INTER_SHARE_PAUSE) => {}
                () = cancel.cancelled() => {
                    return Err(UnsealError::cancelled("unseal cancelled during inter-share pause"));
                }
            }
        }

        self.metrics
            .record_unseal_attempt(client.url(), !status.sealed, submitted);
        Ok(status)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::unimplemented)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    use vault_unseal_client::HealthStatus;
    use vault_unseal_core::DefaultKeyValidator;

    #[derive(Debug)]
    struct ScriptedClient {
        url: String,
        statuses: Mutex<Vec<SealStatus>>,
        fail_at: Option<usize>,
        submit_count: AtomicU32,
    }

    fn status(sealed: bool, progress: u32) -> SealStatus {
        SealStatus {
            sealed,
            progress,
            threshold: 3,
            total_shares: 3,
            initialized: true,
            version: "1.15.0".to_owned(),
        }
    }

    #[async_trait]
    impl VaultClient for ScriptedClient {
        async fn is_sealed(&self) -> Result<bool, UnsealError> {
            Ok(self.statuses.lock().unwrap().last().unwrap().sealed)
        }
        async fn get_seal_status(&self) -> Result<SealStatus, UnsealError> {
            Ok(self.statuses.lock().unwrap().first().unwrap().clone())
        }
        async fn unseal(
            &self,
            _keys: &[String],
            _threshold: u32,
            _cancel: &CancellationToken,
        ) -> Result<SealStatus, UnsealError> {
            unimplemented!("strategy tests drive submit_single_share directly")
        }
        async fn submit_single_share(&self, _key: &str, index: usize) -> Result<SealStatus, UnsealError> {
            let call = self.submit_count.fetch_add(1, Ordering::SeqCst) as usize;
            if Some(call) == self.fail_at {
                return Err(UnsealError::unseal(
                    &self.url,
                    index,
                    UnsealError::vault("unseal-key-submit", &self.url, "500", true),
                    None,
                ));
            }
            let statuses = self.statuses.lock().unwrap();
            Ok(statuses[(call + 1).min(statuses.len() - 1)].clone())
        }
        async fn is_initialized(&self) -> Result<bool, UnsealError> {
            Ok(true)
        }
        async fn health_check(&self) -> Result<HealthStatus, UnsealError> {
            unimplemented!()
        }
        async fn close(&self) {}
        fn url(&self) -> &str {
            &self.url
        }
        fn timeout(&self) -> Duration {
            Duration::from_secs(1)
        }
        async fn is_closed(&self) -> bool {
            false
        }
    }

    #[derive(Debug)]
    struct NoopMetrics;
    impl MetricsSink for NoopMetrics {
        fn record_operation(&self, _: &str, _: &str, _: bool, _: Duration) {}
        fn record_unseal_attempt(&self, _: &str, _: bool, _: u32) {}
    }

    fn strategy() -> DefaultUnsealStrategy {
        DefaultUnsealStrategy::new(Arc::new(DefaultKeyValidator), Arc::new(NoopMetrics))
    }

    fn valid_keys() -> Vec<String> {
        use base64::engine::general_purpose::STANDARD;
        use base64::Engine as _;
        vec![
            STANDARD.encode(b"plausible-key-material-111"),
            STANDARD.encode(b"plausible-key-material-222"),
            STANDARD.encode(b"plausible-key-material-333"),
        ]
    }

    #[tokio::test]
    async fn submits_shares_in_order_until_unsealed() {
        let client = ScriptedClient {
            url: "http://v:8200".to_owned(),
            statuses: Mutex::new(vec![status(true, 0), status(true, 1), status(true, 2), status(false, 3)]),
            fail_at: None,
            submit_count: AtomicU32::new(0),
        };
        let cancel = CancellationToken::new();
        let result = strategy()
            .unseal(&client, &valid_keys(), 3, &cancel)
            .await
            .unwrap();
        assert!(!result.sealed);
        assert_eq!(client.submit_count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn already_unsealed_short_circuits() {
        let client = ScriptedClient {
            url: "http://v:8200".to_owned(),
            statuses: Mutex::new(vec![status(false, 0)]),
            fail_at: None,
            submit_count: AtomicU32::new(0),
        };
        let cancel = CancellationToken::new();
        let result = strategy()
            .unseal(&client, &valid_keys(), 3, &cancel)
            .await
            .unwrap();
        assert!(!result.sealed);
        assert_eq!(client.submit_count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn mid_sequence_failure_reports_zero_based_key_index() {
        let client = ScriptedClient {
            url: "http://v:8200".to_owned(),
            statuses: Mutex::new(vec![status(true, 0), status(true, 1)]),
            fail_at: Some(1),
            submit_count: AtomicU32::new(0),
        };
        let cancel = CancellationToken::new();
        let err = strategy()
            .unseal(&client, &valid_keys(), 3, &cancel)
            .await
            .unwrap_err();
        match err {
            UnsealError::Unseal { key_index, .. } => assert_eq!(key_index, 1),
            other => panic!("expected Unseal error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn threshold_exceeding_keys_is_rejected_before_any_submit() {
        let client = ScriptedClient {
            url: "http://v:8200".to_owned(),
            statuses: Mutex::new(vec![status(true, 0)]),
            fail_at: None,
            submit_count: AtomicU32::new(0),
        };
        let cancel = CancellationToken::new();
        let err = strategy()
            .unseal(&client, &valid_keys()[..1], 5, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, UnsealError::Validation { .. }));
        assert_eq!(client.submit_count.load(Ordering::SeqCst), 0);
    }
}
