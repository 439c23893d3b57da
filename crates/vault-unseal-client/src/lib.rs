//! The Vault Client and Client Repository: a timeout-bounded, close-aware
//! HTTP wrapper over Vault's seal/health/init/unseal endpoints, pooled by
//! instance identity.

pub mod client;
pub mod metrics;
pub mod repository;
pub mod types;

pub use client::{DefaultVaultClient, VaultClient, VaultClientConfig};
pub use metrics::{MetricsSink, NoopMetricsSink};
pub use repository::{ClientFactory, ClientRepository};
pub use types::{HealthStatus, InitStatus, SealStatus};
