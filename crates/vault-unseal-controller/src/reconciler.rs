//! Reconciler: drives each `VaultUnsealConfig` resource's observed seal
//! state toward "unsealed", one instance at a time, in spec order.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::runtime::finalizer::{self, Event as FinalizerEvent};
use kube::{Client, ResourceExt};
use serde_json::json;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use vault_unseal_client::ClientRepository;
use vault_unseal_core::{Condition, InstanceStatus};
use vault_unseal_strategy::UnsealStrategy;

use crate::crd::{VaultUnsealConfig, VaultUnsealConfigStatus};
use crate::metrics::Metrics;

/// Registered on every `VaultUnsealConfig` so deletion round-trips through
/// `Event::Cleanup` before Kubernetes removes the resource, giving the
/// Reconciler a chance to evict that resource's Vault Clients.
const FINALIZER_NAME: &str = "vault.io/unseal-operator";

const REQUEUE_INTERVAL: Duration = Duration::from_secs(30);
const ERROR_REQUEUE_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("failed to patch status: {0}")]
    StatusPatch(#[source] kube::Error),
}

/// Shared dependencies handed to every `reconcile` invocation by the
/// `kube_runtime::Controller`.
pub struct ReconcilerContext {
    pub client: Client,
    pub repository: Arc<ClientRepository>,
    pub strategy: Arc<dyn UnsealStrategy>,
    pub metrics: Arc<Metrics>,
}

/// Entry point handed to `kube_runtime::Controller`. Wraps [`apply`] and
/// [`cleanup`] in a finalizer so a deleted resource's Vault Clients are
/// evicted from the Repository before Kubernetes removes the resource.
pub async fn reconcile(
    resource: Arc<VaultUnsealConfig>,
    ctx: Arc<ReconcilerContext>,
) -> Result<Action, finalizer::Error<ReconcileError>> {
    let namespace = resource.namespace().unwrap_or_default();
    let api: Api<VaultUnsealConfig> = Api::namespaced(ctx.client.clone(), &namespace);

    finalizer::finalizer(&api, FINALIZER_NAME, resource, move |event| async move {
        match event {
            FinalizerEvent::Apply(resource) => apply(&resource, &ctx).await,
            FinalizerEvent::Cleanup(resource) => Ok(cleanup(&resource, &ctx).await),
        }
    })
    .await
}

async fn apply(resource: &VaultUnsealConfig, ctx: &ReconcilerContext) -> Result<Action, ReconcileError> {
    let namespace = resource.namespace().unwrap_or_default();
    let name = resource.name_any();
    let resource_key = format!("{namespace}/{name}");

    let mut statuses = Vec::with_capacity(resource.spec.vault_instances.len());
    for descriptor in &resource.spec.vault_instances {
        let status = reconcile_instance(ctx, resource, descriptor).await;
        statuses.push(status);
    }

    let ready = statuses.iter().all(InstanceStatus::is_healthy);
    ctx.metrics.record_reconciliation(ready);

    let previous = resource.status.as_ref().map(|s| s.conditions.as_slice()).unwrap_or(&[]);
    let previous_ready = previous.iter().find(|c| c.type_ == vault_unseal_core::READY_CONDITION);
    let condition = Condition::ready(&statuses, Utc::now(), previous_ready);

    let api: Api<VaultUnsealConfig> = Api::namespaced(ctx.client.clone(), &namespace);
    let new_status = VaultUnsealConfigStatus {
        vault_statuses: statuses,
        conditions: vec![condition],
    };
    let patch = Patch::Merge(json!({ "status": new_status }));
    api.patch_status(&name, &PatchParams::default(), &patch)
        .await
        .map_err(ReconcileError::StatusPatch)?;

    info!(resource = %resource_key, ready, "reconciled vault unseal config");
    Ok(Action::requeue(REQUEUE_INTERVAL))
}

/// Evicts every instance's Vault Client from the Repository ahead of
/// deletion, then lets the finalizer come off with no further requeue.
async fn cleanup(resource: &VaultUnsealConfig, ctx: &ReconcilerContext) -> Action {
    for descriptor in &resource.spec.vault_instances {
        let repo_key = resource.instance_key(&descriptor.name);
        ctx.repository.evict(&repo_key).await;
    }
    info!(resource = %resource.resource_key(), "evicted vault clients for deleted resource");
    Action::await_change()
}

async fn reconcile_instance(
    ctx: &ReconcilerContext,
    resource: &VaultUnsealConfig,
    descriptor: &vault_unseal_core::InstanceDescriptor,
) -> InstanceStatus {
    let threshold = descriptor.effective_threshold();
    let repo_key = resource.instance_key(&descriptor.name);
    let client = match ctx.repository.get(&repo_key, descriptor).await {
        Ok(client) => client,
        Err(err) => return InstanceStatus::failed(&descriptor.name, err.to_string(), 0, threshold),
    };

    let sealed = match client.is_sealed().await {
        Ok(sealed) => sealed,
        Err(err) => return InstanceStatus::failed(&descriptor.name, err.to_string(), 0, threshold),
    };

    let now = Utc::now();
    if !sealed {
        return InstanceStatus::already_unsealed(&descriptor.name, now, threshold);
    }

    let cancel = CancellationToken::new();
    match ctx
        .strategy
        .unseal(client.as_ref(), &descriptor.unseal_keys, threshold, &cancel)
        .await
    {
        Ok(status) if !status.sealed => InstanceStatus::healthy(&descriptor.name, now, threshold),
        Ok(status) => {
            warn!(instance = %descriptor.name, "unseal strategy returned without unsealing");
            InstanceStatus::failed(
                &descriptor.name,
                "unseal attempt did not clear sealed state",
                status.progress,
                threshold,
            )
        }
        Err(err) => {
            let progress = match &err {
                vault_unseal_core::UnsealError::Unseal { key_index, .. } => *key_index as u32,
                _ => 0,
            };
            InstanceStatus::failed(&descriptor.name, err.to_string(), progress, threshold)
        }
    }
}

/// Called by `kube_runtime::Controller` whenever `reconcile` returns an
/// error that was not already surfaced via a per-instance status entry
/// (i.e. the status patch itself failed, or the finalizer patch failed).
pub fn error_policy(
    resource: Arc<VaultUnsealConfig>,
    error: &finalizer::Error<ReconcileError>,
    _ctx: Arc<ReconcilerContext>,
) -> Action {
    warn!(resource = %resource.name_any(), %error, "reconcile failed");
    Action::requeue(ERROR_REQUEUE_INTERVAL)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn requeue_intervals_match_steady_and_error_cadence() {
        assert_eq!(REQUEUE_INTERVAL, Duration::from_secs(30));
        assert_eq!(ERROR_REQUEUE_INTERVAL, Duration::from_secs(5));
    }
}
