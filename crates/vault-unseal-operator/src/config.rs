//! Operator configuration, loaded entirely from the environment.

use std::net::SocketAddr;
use std::time::Duration;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_RECONCILE_INTERVAL_SECS: u64 = 30;
const DEFAULT_WORKER_COUNT: usize = 5;
const DEFAULT_COOLDOWN_SECS: u64 = 120;
const DEFAULT_CLIENT_TIMEOUT_MS: u64 = 5000;
const DEFAULT_MAX_RETRIES: u32 = 3;

/// Process-wide configuration, resolved once at startup.
#[derive(Debug, Clone)]
pub struct OperatorConfig {
    /// Bind address for the health/metrics HTTP surface.
    pub bind_addr: SocketAddr,
    /// `tracing` env-filter directive applied when `RUST_LOG` is unset.
    pub log_level: String,
    /// Namespace to restrict the watch to; empty string watches all namespaces.
    pub namespace: String,
    /// Interval between steady-state reconciles of a resource.
    pub reconcile_interval: Duration,
    /// Number of workers draining the pod-event-driven unseal queue.
    pub worker_count: usize,
    /// Minimum time between repeated pod-event-driven unseal attempts for
    /// the same instance.
    pub cooldown: Duration,
    /// Per-request timeout applied to every constructed Vault Client.
    pub client_timeout: Duration,
    /// Maximum low-level HTTP retries per Vault Client request.
    pub max_retries: u32,
}

impl OperatorConfig {
    /// Reads configuration from `VAULT_UNSEAL_*` environment variables,
    /// falling back to documented defaults when unset or unparsable.
    #[must_use]
    pub fn from_env() -> Self {
        let bind_addr = std::env::var("VAULT_UNSEAL_BIND_ADDR")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.parse().unwrap_or_else(|_| {
                SocketAddr::from(([0, 0, 0, 0], 8080))
            }));

        let log_level = std::env::var("VAULT_UNSEAL_LOG_LEVEL").unwrap_or_else(|_| DEFAULT_LOG_LEVEL.to_owned());

        let namespace = std::env::var("VAULT_UNSEAL_NAMESPACE").unwrap_or_default();

        let reconcile_interval = std::env::var("VAULT_UNSEAL_RECONCILE_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or_else(|| Duration::from_secs(DEFAULT_RECONCILE_INTERVAL_SECS));

        let worker_count = std::env::var("VAULT_UNSEAL_WORKER_COUNT")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_WORKER_COUNT);

        let cooldown = std::env::var("VAULT_UNSEAL_COOLDOWN_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or_else(|| Duration::from_secs(DEFAULT_COOLDOWN_SECS));

        let client_timeout = std::env::var("VAULT_UNSEAL_CLIENT_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or_else(|| Duration::from_millis(DEFAULT_CLIENT_TIMEOUT_MS));

        let max_retries = std::env::var("VAULT_UNSEAL_MAX_RETRIES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_MAX_RETRIES);

        OperatorConfig {
            bind_addr,
            log_level,
            namespace,
            reconcile_interval,
            worker_count,
            cooldown,
            client_timeout,
            max_retries,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_env_unset() {
        for key in [
            "VAULT_UNSEAL_BIND_ADDR",
            "VAULT_UNSEAL_LOG_LEVEL",
            "VAULT_UNSEAL_NAMESPACE",
            "VAULT_UNSEAL_RECONCILE_INTERVAL_SECS",
            "VAULT_UNSEAL_WORKER_COUNT",
            "VAULT_UNSEAL_COOLDOWN_SECS",
            "VAULT_UNSEAL_CLIENT_TIMEOUT_MS",
            "VAULT_UNSEAL_MAX_RETRIES",
        ] {
            assert!(std::env::var(key).is_err(), "{key} unexpectedly set in test environment");
        }

        let config = OperatorConfig::from_env();
        assert_eq!(config.bind_addr, DEFAULT_BIND_ADDR.parse().unwrap());
        assert_eq!(config.log_level, "info");
        assert_eq!(config.namespace, "");
        assert_eq!(config.reconcile_interval, Duration::from_secs(30));
        assert_eq!(config.worker_count, 5);
        assert_eq!(config.cooldown, Duration::from_secs(120));
        assert_eq!(config.client_timeout, Duration::from_millis(5000));
        assert_eq!(config.max_retries, 3);
    }
}
