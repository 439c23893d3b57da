//! Health/metrics HTTP surface, bound on its own port, separate from the
//! Kubernetes API traffic the reconcile loop generates.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, TextEncoder};
use vault_unseal_controller::Metrics;

/// Flips to `true` once the first successful `kube::Client` call succeeds.
#[derive(Clone, Default)]
pub struct ReadinessFlag(Arc<AtomicBool>);

impl ReadinessFlag {
    #[must_use]
    pub fn new() -> Self {
        ReadinessFlag::default()
    }

    pub fn mark_ready(&self) {
        self.0.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Clone)]
struct HealthState {
    readiness: ReadinessFlag,
    metrics: Arc<Metrics>,
}

/// Builds the `/healthz`, `/readyz`, `/metrics` router.
#[must_use]
pub fn router(readiness: ReadinessFlag, metrics: Arc<Metrics>) -> Router {
    let state = HealthState { readiness, metrics };
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

async fn healthz() -> impl IntoResponse {
    StatusCode::OK
}

async fn readyz(State(state): State<HealthState>) -> impl IntoResponse {
    if state.readiness.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn metrics_handler(State(state): State<HealthState>) -> impl IntoResponse {
    let families = state.metrics.registry().gather();
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&families, &mut buffer) {
        tracing::warn!(%err, "failed to encode prometheus metrics");
        return (StatusCode::INTERNAL_SERVER_ERROR, Vec::new());
    }
    (StatusCode::OK, buffer)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn readiness_flag_starts_false_and_latches_true() {
        let flag = ReadinessFlag::new();
        assert!(!flag.is_ready());
        flag.mark_ready();
        assert!(flag.is_ready());
    }
}
