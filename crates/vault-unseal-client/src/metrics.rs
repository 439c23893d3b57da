//! Capability the Vault Client and Unseal Strategy use to report outcomes,
//! without depending on the concrete Prometheus-backed implementation.

use std::time::Duration;

/// Implemented by the operator's process-wide metrics struct. Kept as a
/// narrow trait here (rather than depending on the controller crate's
/// concrete `Metrics` type) so this crate has no dependency on `kube` or
/// `prometheus`.
pub trait MetricsSink: Send + Sync + std::fmt::Debug {
    /// Called once per client operation (`is-sealed`, `get-seal-status`,
    /// `unseal-key-submit`, `is-initialized`, `health-check`).
    fn record_operation(&self, operation: &str, endpoint: &str, success: bool, duration: Duration);

    /// Called once per completed unseal attempt (the outer operation, not
    /// individual share submissions).
    fn record_unseal_attempt(&self, endpoint: &str, success: bool, shares_submitted: u32);
}

/// No-op sink used when no metrics sink is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetricsSink;

impl MetricsSink for NoopMetricsSink {
    fn record_operation(&self, _operation: &str, _endpoint: &str, _success: bool, _duration: Duration) {}

    fn record_unseal_attempt(&self, _endpoint: &str, _success: bool, _shares_submitted: u32) {}
}
