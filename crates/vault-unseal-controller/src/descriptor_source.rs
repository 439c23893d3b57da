//! Lookup capability shared by the Pod Watcher and Unseal Processor: both
//! need to resolve identifiers back to the current [`InstanceDescriptor`]
//! without depending on the Reconciler's ownership of the declarative
//! resource cache.

use std::collections::BTreeMap;

use async_trait::async_trait;
use vault_unseal_core::InstanceDescriptor;

/// Implemented by whatever owns the live set of `VaultUnsealConfig`
/// resources (a `kube_runtime` reflector store, in the operator binary).
#[async_trait]
pub trait DescriptorSource: Send + Sync {
    /// Resolves `(resource_key, instance_name)` to the instance's current
    /// descriptor, or `None` if the resource or instance no longer exists.
    async fn resolve(&self, resource_key: &str, instance_name: &str) -> Option<InstanceDescriptor>;

    /// Resolves a pod's namespace and labels back to the
    /// `(resource_key, instance_name)` pair of the instance it belongs to,
    /// by matching against every known descriptor's `pod_selector`.
    async fn resolve_pod(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Option<(String, String)>;
}

/// Returns true when every key/value in `selector` is present in `labels`.
#[must_use]
pub fn selector_matches(selector: &BTreeMap<String, String>, labels: &BTreeMap<String, String>) -> bool {
    !selector.is_empty()
        && selector
            .iter()
            .all(|(k, v)| labels.get(k).is_some_and(|actual| actual == v))
}
