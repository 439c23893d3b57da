//! Unseal Processor: a bounded worker pool draining a queue of unseal
//! requests, with per-fingerprint cooldown to guarantee at most one
//! in-flight unseal per instance.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vault_unseal_client::ClientRepository;
use vault_unseal_strategy::UnsealStrategy;

use crate::descriptor_source::DescriptorSource;
use crate::metrics::Metrics;

const DEFAULT_WORKER_COUNT: usize = 5;
const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(30);

/// One pod-event-derived request to unseal an instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsealRequest {
    pub resource_key: String,
    pub instance_name: String,
}

impl UnsealRequest {
    #[must_use]
    pub fn new(resource_key: impl Into<String>, instance_name: impl Into<String>) -> Self {
        UnsealRequest {
            resource_key: resource_key.into(),
            instance_name: instance_name.into(),
        }
    }

    /// Stable hash of `(resource_key, instance_name)` used as the cooldown
    /// bucket key.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.resource_key.as_bytes());
        hasher.update(b"\0");
        hasher.update(self.instance_name.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Tracks the last unseal attempt time per fingerprint, guarding against a
/// second concurrent attempt for the same instance within `window`.
pub struct CooldownRecord {
    window: Duration,
    last_attempt: Mutex<HashMap<String, Instant>>,
}

impl CooldownRecord {
    #[must_use]
    pub fn new(window: Duration) -> Self {
        CooldownRecord {
            window,
            last_attempt: Mutex::new(HashMap::new()),
        }
    }

    /// Attempts to claim `fingerprint`. Returns `true` (and records `now`)
    /// if the fingerprint was not claimed within the cooldown window;
    /// returns `false` without mutating state otherwise.
    pub fn claim(&self, fingerprint: &str) -> bool {
        let mut map = match self.last_attempt.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let now = Instant::now();
        match map.get(fingerprint) {
            Some(&last) if now.duration_since(last) < self.window => false,
            _ => {
                map.insert(fingerprint.to_owned(), now);
                true
            }
        }
    }
}

struct WorkerContext {
    receiver: Arc<AsyncMutex<mpsc::Receiver<UnsealRequest>>>,
    cooldown: Arc<CooldownRecord>,
    repository: Arc<ClientRepository>,
    descriptors: Arc<dyn DescriptorSource>,
    strategy: Arc<dyn UnsealStrategy>,
    metrics: Arc<Metrics>,
}

/// Owns the intake channel and the fixed-size worker pool.
pub struct UnsealProcessor {
    sender: Option<mpsc::Sender<UnsealRequest>>,
    handles: Vec<JoinHandle<()>>,
}

impl UnsealProcessor {
    #[must_use]
    pub fn spawn(
        worker_count: usize,
        cooldown_window: Duration,
        repository: Arc<ClientRepository>,
        descriptors: Arc<dyn DescriptorSource>,
        strategy: Arc<dyn UnsealStrategy>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let worker_count = worker_count.max(1).max(DEFAULT_WORKER_COUNT.min(worker_count.max(1)));
        let capacity = worker_count.max(1);
        let (sender, receiver) = mpsc::channel(capacity);
        let receiver = Arc::new(AsyncMutex::new(receiver));
        let cooldown = Arc::new(CooldownRecord::new(cooldown_window));

        let mut handles = Vec::with_capacity(worker_count);
        for id in 0..worker_count {
            let ctx = WorkerContext {
                receiver: receiver.clone(),
                cooldown: cooldown.clone(),
                repository: repository.clone(),
                descriptors: descriptors.clone(),
                strategy: strategy.clone(),
                metrics: metrics.clone(),
            };
            handles.push(tokio::spawn(worker_loop(id, ctx)));
        }

        UnsealProcessor {
            sender: Some(sender),
            handles,
        }
    }

    /// Enqueues `request`. Fails silently (logged) if the intake channel is
    /// full or the processor has already begun shutdown — pod-event-driven
    /// unseals are best-effort; the Reconciler's periodic pass converges
    /// regardless.
    pub async fn enqueue(&self, request: UnsealRequest) {
        let Some(sender) = &self.sender else {
            warn!("unseal processor is shutting down, dropping request");
            return;
        };
        if let Err(err) = sender.try_send(request) {
            warn!(%err, "unseal request queue full or closed, dropping request");
        }
    }

    /// Closes the intake channel, then waits up to a bounded grace period
    /// for workers to drain remaining requests before returning.
    pub async fn shutdown(mut self) {
        self.sender.take();
        let deadline = tokio::time::sleep(SHUTDOWN_GRACE_PERIOD);
        tokio::pin!(deadline);
        for handle in self.handles.drain(..) {
            tokio::select! {
                result = handle => {
                    if let Err(err) = result {
                        warn!(%err, "unseal worker task panicked during shutdown");
                    }
                }
                () = &mut deadline => {
                    warn!("unseal processor shutdown grace period elapsed with workers still draining");
                    break;
                }
            }
        }
    }
}

async fn worker_loop(id: usize, ctx: WorkerContext) {
    loop {
        let request = {
            let mut receiver = ctx.receiver.lock().await;
            receiver.recv().await
        };
        let Some(request) = request else {
            debug!(worker_id = id, "unseal worker intake channel closed, exiting");
            break;
        };

        let fingerprint = request.fingerprint();
        if !ctx.cooldown.claim(&fingerprint) {
            debug!(worker_id = id, resource = %request.resource_key, instance = %request.instance_name, "dropping unseal request, within cooldown window");
            continue;
        }

        handle_request(id, &ctx, &request).await;
    }
}

async fn handle_request(id: usize, ctx: &WorkerContext, request: &UnsealRequest) {
    let Some(descriptor) = ctx
        .descriptors
        .resolve(&request.resource_key, &request.instance_name)
        .await
    else {
        debug!(worker_id = id, resource = %request.resource_key, instance = %request.instance_name, "descriptor no longer present, dropping request");
        ctx.metrics.record_pod_triggered_unseal("descriptor_missing");
        return;
    };

    // resource_key is "<namespace>/<resourceName>"; the Repository keys by
    // "<namespace>/<instanceName>", matching the Reconciler's own key so
    // both share one Client per instance.
    let namespace = request.resource_key.split('/').next().unwrap_or_default();
    let repo_key = format!("{namespace}/{}", descriptor.name);

    let client = match ctx.repository.get(&repo_key, &descriptor).await {
        Ok(client) => client,
        Err(err) => {
            warn!(worker_id = id, %err, instance = %descriptor.name, "failed to obtain vault client");
            ctx.metrics.record_pod_triggered_unseal("client_error");
            return;
        }
    };

    let cancel = CancellationToken::new();
    match ctx
        .strategy
        .unseal(
            client.as_ref(),
            &descriptor.unseal_keys,
            descriptor.effective_threshold(),
            &cancel,
        )
        .await
    {
        Ok(status) if !status.sealed => {
            info!(worker_id = id, instance = %descriptor.name, "pod-event-driven unseal succeeded");
            ctx.metrics.record_pod_triggered_unseal("succeeded");
        }
        Ok(_) => {
            warn!(worker_id = id, instance = %descriptor.name, "unseal attempt completed but instance remains sealed");
            ctx.metrics.record_pod_triggered_unseal("still_sealed");
        }
        Err(err) => {
            warn!(worker_id = id, %err, instance = %descriptor.name, "pod-event-driven unseal failed");
            ctx.metrics.record_pod_triggered_unseal("client_error");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    #[test]
    fn fingerprint_is_stable_and_distinct_per_instance() {
        let a = UnsealRequest::new("ns/res", "v1");
        let b = UnsealRequest::new("ns/res", "v1");
        let c = UnsealRequest::new("ns/res", "v2");
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn cooldown_claims_once_then_blocks_until_window_elapses() {
        let cooldown = CooldownRecord::new(StdDuration::from_millis(50));
        assert!(cooldown.claim("fp"));
        assert!(!cooldown.claim("fp"));
        std::thread::sleep(StdDuration::from_millis(60));
        assert!(cooldown.claim("fp"));
    }
}
