//! Wire types for the subset of the Vault HTTP API this operator speaks.

use serde::{Deserialize, Serialize};

/// `GET /v1/sys/seal-status` and the response of `POST /v1/sys/unseal`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SealStatus {
    pub sealed: bool,
    #[serde(default)]
    pub progress: u32,
    /// Threshold, named `t` on the wire.
    #[serde(rename = "t", default)]
    pub threshold: u32,
    /// Total shares, named `n` on the wire.
    #[serde(rename = "n", default)]
    pub total_shares: u32,
    #[serde(default)]
    pub initialized: bool,
    #[serde(default)]
    pub version: String,
}

/// Body of `POST /v1/sys/unseal`.
#[derive(Debug, Serialize)]
pub(crate) struct UnsealRequestBody<'a> {
    pub key: &'a str,
}

/// `GET /v1/sys/init` response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitStatus {
    pub initialized: bool,
}

/// Result of `GET /v1/sys/health`, interpreted per status code rather than
/// body, since Vault returns distinct codes (200/429/503) for each state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthStatus {
    pub healthy: bool,
    pub sealed: bool,
    pub standby: bool,
}
