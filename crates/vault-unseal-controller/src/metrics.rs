//! Process-wide Prometheus metrics: counters and histograms for client
//! operations, unseal attempts, and reconciliations.

use std::time::Duration;

use prometheus::{HistogramVec, IntCounterVec, Opts, Registry};
use vault_unseal_client::MetricsSink;

/// Counters/histograms satisfying the `MetricsSink` capability consumed by
/// the Vault Client and Unseal Strategy, plus reconciliation-level counters
/// the Reconciler updates directly.
#[derive(Debug)]
pub struct Metrics {
    registry: Registry,
    operations_total: IntCounterVec,
    operation_duration_seconds: HistogramVec,
    unseal_attempts_total: IntCounterVec,
    unseal_shares_submitted: HistogramVec,
    reconciliations_total: IntCounterVec,
    pod_triggered_unseals_total: IntCounterVec,
}

impl Metrics {
    /// # Errors
    ///
    /// Returns a `prometheus::Error` if a metric with a colliding name is
    /// already registered on the default registry (should not happen for a
    /// single operator process).
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let operations_total = IntCounterVec::new(
            Opts::new(
                "vault_unseal_client_operations_total",
                "Vault Client operations by operation, endpoint, and outcome",
            ),
            &["operation", "endpoint", "result"],
        )?;
        let operation_duration_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "vault_unseal_client_operation_duration_seconds",
                "Vault Client operation latency",
            ),
            &["operation"],
        )?;
        let unseal_attempts_total = IntCounterVec::new(
            Opts::new(
                "vault_unseal_attempts_total",
                "Unseal Strategy invocations by endpoint and outcome",
            ),
            &["endpoint", "result"],
        )?;
        let unseal_shares_submitted = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "vault_unseal_shares_submitted",
                "Shares submitted per unseal attempt",
            )
            .buckets(vec![0.0, 1.0, 2.0, 3.0, 5.0, 8.0, 13.0]),
            &["endpoint"],
        )?;
        let reconciliations_total = IntCounterVec::new(
            Opts::new(
                "vault_unseal_reconciliations_total",
                "Reconciler runs by outcome",
            ),
            &["result"],
        )?;
        let pod_triggered_unseals_total = IntCounterVec::new(
            Opts::new(
                "vault_unseal_pod_triggered_total",
                "Unseal Processor requests handled by pod-event outcome",
            ),
            &["outcome"],
        )?;

        registry.register(Box::new(operations_total.clone()))?;
        registry.register(Box::new(operation_duration_seconds.clone()))?;
        registry.register(Box::new(unseal_attempts_total.clone()))?;
        registry.register(Box::new(unseal_shares_submitted.clone()))?;
        registry.register(Box::new(reconciliations_total.clone()))?;
        registry.register(Box::new(pod_triggered_unseals_total.clone()))?;

        Ok(Metrics {
            registry,
            operations_total,
            operation_duration_seconds,
            unseal_attempts_total,
            unseal_shares_submitted,
            reconciliations_total,
            pod_triggered_unseals_total,
        })
    }

    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_reconciliation(&self, ready: bool) {
        let result = if ready { "ready" } else { "not_ready" };
        self.reconciliations_total.with_label_values(&[result]).inc();
    }

    /// Records the outcome of one pod-event-driven unseal request handled
    /// by the Unseal Processor: `"succeeded"`, `"still_sealed"`,
    /// `"descriptor_missing"`, or `"client_error"`.
    pub fn record_pod_triggered_unseal(&self, outcome: &str) {
        self.pod_triggered_unseals_total.with_label_values(&[outcome]).inc();
    }
}

impl MetricsSink for Metrics {
    fn record_operation(&self, operation: &str, endpoint: &str, success: bool, duration: Duration) {
        let result = if success { "success" } else { "failure" };
        self.operations_total
            .with_label_values(&[operation, endpoint, result])
            .inc();
        self.operation_duration_seconds
            .with_label_values(&[operation])
            .observe(duration.as_secs_f64());
    }

    fn record_unseal_attempt(&self, endpoint: &str, success: bool, shares_submitted: u32) {
        let result = if success { "success" } else { "failure" };
        self.unseal_attempts_total
            .with_label_values(&[endpoint, result])
            .inc();
        self.unseal_shares_submitted
            .with_label_values(&[endpoint])
            .observe(f64::from(shares_submitted));
    }
}
