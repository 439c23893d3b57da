//! Parallel wrapper for multi-instance orchestration outside a single
//! strategy call. The single-instance [`UnsealStrategy::unseal`] entry
//! point degenerates to direct delegation; [`ParallelStrategy::unseal_many`]
//! is the batched entry point for callers (the Reconciler, the Unseal
//! Processor) that need to drive several instances with bounded fan-out.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use vault_unseal_client::{SealStatus, VaultClient};
use vault_unseal_core::UnsealError;

use crate::strategy::UnsealStrategy;

const DEFAULT_CONCURRENCY: usize = 5;

/// One instance's unseal inputs, bundled for [`ParallelStrategy::unseal_many`].
pub struct ParallelTarget {
    pub client: Arc<dyn VaultClient>,
    pub keys: Vec<String>,
    pub threshold: u32,
}

pub struct ParallelStrategy {
    base: Arc<dyn UnsealStrategy>,
    concurrency: usize,
}

impl ParallelStrategy {
    #[must_use]
    pub fn new(base: Arc<dyn UnsealStrategy>) -> Self {
        Self::with_concurrency(base, DEFAULT_CONCURRENCY)
    }

    #[must_use]
    pub fn with_concurrency(base: Arc<dyn UnsealStrategy>, concurrency: usize) -> Self {
        ParallelStrategy {
            base,
            concurrency: concurrency.max(1),
        }
    }

    /// Drives every target's `unseal` concurrently, bounded by this
    /// strategy's concurrency limit. Results are returned in the same order
    /// as `targets`.
    pub async fn unseal_many(
        &self,
        targets: Vec<ParallelTarget>,
        cancel: &CancellationToken,
    ) -> Vec<Result<SealStatus, UnsealError>> {
        let indexed = targets.into_iter().enumerate();
        let mut results: Vec<(usize, Result<SealStatus, UnsealError>)> = stream::iter(indexed)
            .map(|(index, target)| {
                let base = self.base.clone();
                let cancel = cancel.clone();
                async move {
                    let outcome = base
                        .unseal(target.client.as_ref(), &target.keys, target.threshold, &cancel)
                        .await;
                    (index, outcome)
                }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        results.sort_by_key(|(index, _)| *index);
        results.into_iter().map(|(_, outcome)| outcome).collect()
    }
}

#[async_trait]
impl UnsealStrategy for ParallelStrategy {
    async fn unseal(
        &self,
        client: &dyn VaultClient,
        keys: &[String],
        threshold: u32,
        cancel: &CancellationToken,
    ) -> Result<SealStatus, UnsealError> {
        self.base.unseal(client, keys, threshold, cancel).await
    }
}
