//! `DescriptorSource` backed by a `kube_runtime` reflector store over
//! `VaultUnsealConfig` resources, kept up to date by a background watch
//! task running alongside the reconcile loop.

use std::collections::BTreeMap;

use async_trait::async_trait;
use futures::StreamExt;
use kube::runtime::reflector::{self, Store};
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Client, ResourceExt};
use tracing::warn;
use vault_unseal_controller::{selector_matches, DescriptorSource, VaultUnsealConfig};
use vault_unseal_core::InstanceDescriptor;

/// Wraps a `reflector::Store` so the Pod Watcher and Unseal Processor can
/// resolve descriptors without depending on `kube` themselves.
#[derive(Clone)]
pub struct ReflectorDescriptorSource {
    store: Store<VaultUnsealConfig>,
}

impl ReflectorDescriptorSource {
    /// Starts the background reflector task and returns a source reading
    /// from it, plus the join handle for the watch task.
    #[must_use]
    pub fn spawn(client: Client, namespace: &str) -> (Self, tokio::task::JoinHandle<()>) {
        let api: Api<VaultUnsealConfig> = if namespace.is_empty() {
            Api::all(client)
        } else {
            Api::namespaced(client, namespace)
        };
        let (store, writer) = reflector::store();
        let stream = reflector::reflector(writer, watcher::watcher(api, watcher::Config::default()))
            .default_backoff()
            .touched_objects();

        let handle = tokio::spawn(async move {
            let mut stream = Box::pin(stream);
            while let Some(result) = stream.next().await {
                if let Err(err) = result {
                    warn!(%err, "vault unseal config watch error");
                }
            }
        });

        (ReflectorDescriptorSource { store }, handle)
    }

    fn find(&self, resource_key: &str) -> Option<std::sync::Arc<VaultUnsealConfig>> {
        self.store.state().into_iter().find(|cr| {
            let namespace = cr.namespace().unwrap_or_default();
            let name = cr.name_any();
            format!("{namespace}/{name}") == resource_key
        })
    }
}

#[async_trait]
impl DescriptorSource for ReflectorDescriptorSource {
    async fn resolve(&self, resource_key: &str, instance_name: &str) -> Option<InstanceDescriptor> {
        let resource = self.find(resource_key)?;
        resource
            .spec
            .vault_instances
            .iter()
            .find(|d| d.name == instance_name)
            .cloned()
    }

    async fn resolve_pod(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Option<(String, String)> {
        for resource in self.store.state() {
            let resource_namespace = resource.namespace().unwrap_or_default();
            let resource_key = format!("{resource_namespace}/{}", resource.name_any());
            for descriptor in &resource.spec.vault_instances {
                let pod_namespace = descriptor.namespace.as_deref().unwrap_or(&resource_namespace);
                if pod_namespace != namespace {
                    continue;
                }
                let Some(selector) = &descriptor.pod_selector else {
                    continue;
                };
                if selector_matches(selector, labels) {
                    return Some((resource_key, descriptor.name.clone()));
                }
            }
        }
        None
    }
}
