//! Shared data model: instance descriptors, instance status, and conditions.
//!
//! These types are the payload carried inside the `VaultUnsealConfig`
//! custom resource's spec and status. They live in this crate (rather than
//! the controller crate) so the client and strategy crates can depend on
//! the descriptor shape without depending on `kube`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::UnsealError;

/// One Vault endpoint named in a `VaultUnsealConfig` spec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct InstanceDescriptor {
    /// Unique name within the owning resource.
    pub name: String,
    /// Vault base URL, scheme must be `http` or `https`.
    pub endpoint: String,
    /// Ordered base64-encoded unseal key shares.
    pub unseal_keys: Vec<String>,
    /// Minimum shares required to unseal. Defaults to `unseal_keys.len()`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<u32>,
    /// Skip TLS certificate verification when talking to this instance.
    #[serde(default)]
    pub tls_skip_verify: bool,
    /// Whether this instance participates in a Vault HA cluster.
    #[serde(default)]
    pub ha_enabled: bool,
    /// Label selector used to discover member pods for event-driven unseal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_selector: Option<BTreeMap<String, String>>,
    /// Namespace to search for member pods; defaults to the resource's namespace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl InstanceDescriptor {
    /// The effective threshold: the configured value, or all keys if unset.
    #[must_use]
    pub fn effective_threshold(&self) -> u32 {
        self.threshold.unwrap_or(self.unseal_keys.len() as u32)
    }

    /// Structural validation independent of the Key Validator's content
    /// checks: non-empty name, parseable URL with an http(s) scheme,
    /// threshold within `[1, len(unseal_keys)]`.
    ///
    /// # Errors
    ///
    /// Returns [`UnsealError::Validation`] on the first violated invariant.
    pub fn validate_shape(&self) -> Result<(), UnsealError> {
        if self.name.is_empty() {
            return Err(UnsealError::validation("instance name must not be empty"));
        }
        let url = url::Url::parse(&self.endpoint).map_err(|e| {
            UnsealError::validation(format!("endpoint '{}' is not a valid URL: {e}", self.endpoint))
        })?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(UnsealError::validation(format!(
                "endpoint scheme must be http or https, got '{}'",
                url.scheme()
            )));
        }
        let threshold = self.effective_threshold();
        if threshold < 1 {
            return Err(UnsealError::validation("threshold must be at least 1"));
        }
        if threshold as usize > self.unseal_keys.len() {
            return Err(UnsealError::validation(format!(
                "threshold ({}) exceeds number of available keys ({})",
                threshold,
                self.unseal_keys.len()
            )));
        }
        Ok(())
    }
}

/// Observed status of one instance, appended to `VaultUnsealConfig.status`
/// in spec order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct InstanceStatus {
    /// Joins back to the descriptor's `name`.
    pub name: String,
    /// Last observed seal state.
    pub sealed: bool,
    /// Timestamp of the last successful unseal, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_unsealed: Option<DateTime<Utc>>,
    /// Human-readable error, empty string on success.
    #[serde(default)]
    pub error: String,
    /// Shares submitted during the last unseal attempt.
    #[serde(default)]
    pub progress: u32,
    /// Threshold echoed from the spec.
    #[serde(default)]
    pub threshold: u32,
}

impl InstanceStatus {
    #[must_use]
    pub fn healthy(name: impl Into<String>, now: DateTime<Utc>, threshold: u32) -> Self {
        InstanceStatus {
            name: name.into(),
            sealed: false,
            last_unsealed: Some(now),
            error: String::new(),
            progress: threshold,
            threshold,
        }
    }

    #[must_use]
    pub fn already_unsealed(name: impl Into<String>, now: DateTime<Utc>, threshold: u32) -> Self {
        InstanceStatus {
            name: name.into(),
            sealed: false,
            last_unsealed: Some(now),
            error: String::new(),
            progress: 0,
            threshold,
        }
    }

    #[must_use]
    pub fn failed(
        name: impl Into<String>,
        error: impl Into<String>,
        progress: u32,
        threshold: u32,
    ) -> Self {
        InstanceStatus {
            name: name.into(),
            sealed: true,
            last_unsealed: None,
            error: error.into(),
            progress,
            threshold,
        }
    }

    #[must_use]
    pub fn is_healthy(&self) -> bool {
        !self.sealed && self.error.is_empty()
    }
}

/// Condition status as used by the Kubernetes `metav1.Condition` convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// A single summary condition on `VaultUnsealConfig.status.conditions`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: ConditionStatus,
    pub reason: String,
    pub message: String,
    pub last_transition_time: DateTime<Utc>,
}

pub const READY_CONDITION: &str = "Ready";

impl Condition {
    /// Compute the aggregate `Ready` condition from the full set of instance
    /// statuses, preserving `last_transition_time` from `previous` when the
    /// condition's boolean state has not changed.
    #[must_use]
    pub fn ready(statuses: &[InstanceStatus], now: DateTime<Utc>, previous: Option<&Condition>) -> Self {
        let all_healthy = statuses.iter().all(InstanceStatus::is_healthy);
        let status = if all_healthy {
            ConditionStatus::True
        } else {
            ConditionStatus::False
        };

        let (reason, message) = if all_healthy {
            ("AllInstancesUnsealed".to_owned(), "all vault instances are unsealed".to_owned())
        } else {
            let first_failure = statuses.iter().find(|s| !s.is_healthy());
            match first_failure {
                Some(s) if !s.error.is_empty() => {
                    ("UnsealFailed".to_owned(), format!("{}: {}", s.name, s.error))
                }
                Some(s) => ("Sealed".to_owned(), format!("{} is sealed", s.name)),
                None => ("Unknown".to_owned(), String::new()),
            }
        };

        let last_transition_time = match previous {
            Some(prev) if prev.status == status => prev.last_transition_time,
            _ => now,
        };

        Condition {
            type_: READY_CONDITION.to_owned(),
            status,
            reason,
            message,
            last_transition_time,
        }
    }
}
