//! The `VaultUnsealConfig` custom resource: spec/status shapes matching the
//! declarative resource format, plus the `kube::CustomResource` derive that
//! generates its OpenAPI-schema'd CRD definition.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use vault_unseal_core::{Condition, InstanceDescriptor, InstanceStatus};

/// `vault.io/v1 VaultUnsealConfig`, namespaced.
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "vault.io",
    version = "v1",
    kind = "VaultUnsealConfig",
    namespaced,
    status = "VaultUnsealConfigStatus",
    shortname = "vuc",
    derive = "Default"
)]
#[derive(Default)]
#[serde(rename_all = "camelCase")]
pub struct VaultUnsealConfigSpec {
    pub vault_instances: Vec<InstanceDescriptor>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VaultUnsealConfigStatus {
    #[serde(default)]
    pub vault_statuses: Vec<InstanceStatus>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl VaultUnsealConfig {
    /// The Client Repository / cooldown key for one of this resource's
    /// instances: `"<namespace>/<instanceName>"`.
    #[must_use]
    pub fn instance_key(&self, instance_name: &str) -> String {
        format!(
            "{}/{instance_name}",
            self.metadata.namespace.as_deref().unwrap_or_default()
        )
    }

    /// The resource-level key used to scope pod-watcher lookups and
    /// Repository eviction on deletion: `"<namespace>/<name>"`.
    #[must_use]
    pub fn resource_key(&self) -> String {
        format!(
            "{}/{}",
            self.metadata.namespace.as_deref().unwrap_or_default(),
            self.metadata.name.as_deref().unwrap_or_default()
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn instance_key_joins_namespace_and_name() {
        let mut cr = VaultUnsealConfig::new("vault-prod", VaultUnsealConfigSpec { vault_instances: vec![] });
        cr.metadata.namespace = Some("ns1".to_owned());
        assert_eq!(cr.instance_key("v1"), "ns1/v1");
        assert_eq!(cr.resource_key(), "ns1/vault-prod");
    }
}
