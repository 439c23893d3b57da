//! The Vault Client: a timeout-bounded, close-aware wrapper over Vault's
//! `sys/seal-status`, `sys/health`, `sys/init`, and `sys/unseal` endpoints.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use tokio::sync::{RwLock, Semaphore};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use vault_unseal_core::UnsealError;

use crate::metrics::{MetricsSink, NoopMetricsSink};
use crate::types::{HealthStatus, SealStatus, UnsealRequestBody};

const USER_AGENT: &str = concat!("vault-unseal-operator/", env!("CARGO_PKG_VERSION"));
const MAX_URL_LEN: usize = 2048;
const MIN_TIMEOUT: Duration = Duration::from_millis(1);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_MAX_RETRIES: i32 = 3;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);
const INTER_SHARE_PAUSE: Duration = Duration::from_millis(100);

const POOL_MAX_IDLE_PER_HOST: usize = 10;
const POOL_MAX_IDLE_TOTAL: usize = 20;
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(30);
/// reqwest exposes a per-host idle cap but not a hard in-flight cap; a
/// semaphore approximates the "50 per host total" connection ceiling.
const MAX_INFLIGHT_PER_HOST: usize = 50;

/// Capability set exposed by a Vault Client. Defined as a narrow trait
/// (rather than a concrete struct) so the Unseal Strategy can accept any
/// implementer, and so tests can substitute a fake.
#[async_trait]
pub trait VaultClient: Send + Sync + std::fmt::Debug {
    /// True when Vault reports `sealed = true`.
    async fn is_sealed(&self) -> Result<bool, UnsealError>;

    /// The full seal-status response.
    async fn get_seal_status(&self) -> Result<SealStatus, UnsealError>;

    /// Direct unseal path used when no external strategy is injected: fetch
    /// status, return immediately if already unsealed, else submit up to
    /// `threshold` shares in order with a 100 ms pause between submissions,
    /// stopping early on cancellation or once unsealed. Shares beyond
    /// `threshold` are ignored.
    async fn unseal(
        &self,
        keys: &[String],
        threshold: u32,
        cancel: &CancellationToken,
    ) -> Result<SealStatus, UnsealError>;

    /// Submits one base64 share at its 1-based index in the caller's list.
    /// Errors quote `index` but never the share value.
    async fn submit_single_share(&self, key: &str, index: usize) -> Result<SealStatus, UnsealError>;

    /// True once Vault has completed its one-time initialization.
    async fn is_initialized(&self) -> Result<bool, UnsealError>;

    /// `GET /v1/sys/health`; 200 or 429 (standby) count as healthy, 503 as
    /// sealed-but-reachable.
    async fn health_check(&self) -> Result<HealthStatus, UnsealError>;

    /// Marks the client closed; every subsequent call fails fast instead of
    /// reaching the network. Idempotent. The client never retains unseal
    /// key shares past the call that submits them, so there is no secret
    /// material to scrub here.
    async fn close(&self);

    fn url(&self) -> &str;
    fn timeout(&self) -> Duration;
    async fn is_closed(&self) -> bool;
}

/// Construction parameters for [`DefaultVaultClient`].
#[derive(Debug, Clone)]
pub struct VaultClientConfig {
    pub url: String,
    pub tls_skip_verify: bool,
    pub timeout: Duration,
    pub max_retries: i32,
    pub retry_delay: Duration,
}

impl Default for VaultClientConfig {
    fn default() -> Self {
        VaultClientConfig {
            url: String::new(),
            tls_skip_verify: false,
            timeout: DEFAULT_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

/// Default Vault Client implementation backed by `reqwest`.
#[derive(Debug)]
pub struct DefaultVaultClient {
    url: String,
    timeout: Duration,
    max_retries: u32,
    retry_delay: Duration,
    http: reqwest::Client,
    closed: Arc<AtomicBool>,
    state: RwLock<()>,
    inflight: Semaphore,
    metrics: Arc<dyn MetricsSink>,
}

impl DefaultVaultClient {
    /// # Errors
    ///
    /// Returns [`UnsealError::Validation`] when `cfg.url` is empty, has a
    /// scheme other than `http`/`https`, exceeds 2048 characters, when
    /// `cfg.timeout` is below 1 ms, or when `cfg.max_retries` is negative.
    pub fn new(cfg: VaultClientConfig) -> Result<Self, UnsealError> {
        Self::with_metrics(cfg, Arc::new(NoopMetricsSink))
    }

    /// # Errors
    ///
    /// Same as [`DefaultVaultClient::new`].
    pub fn with_metrics(
        cfg: VaultClientConfig,
        metrics: Arc<dyn MetricsSink>,
    ) -> Result<Self, UnsealError> {
        if cfg.url.is_empty() {
            return Err(UnsealError::validation("vault client url must not be empty"));
        }
        if cfg.url.len() > MAX_URL_LEN {
            return Err(UnsealError::validation(format!(
                "vault client url length {} exceeds the {MAX_URL_LEN} character limit",
                cfg.url.len()
            )));
        }
        let parsed = url::Url::parse(&cfg.url)
            .map_err(|e| UnsealError::validation(format!("vault client url is invalid: {e}")))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(UnsealError::validation(format!(
                "vault client url scheme must be http or https, got '{}'",
                parsed.scheme()
            )));
        }
        if cfg.timeout < MIN_TIMEOUT {
            return Err(UnsealError::validation(
                "vault client timeout must be at least 1ms",
            ));
        }
        if cfg.max_retries < 0 {
            return Err(UnsealError::validation(
                "vault client max_retries must not be negative",
            ));
        }

        let http = reqwest::Client::builder()
            .timeout(cfg.timeout)
            .user_agent(USER_AGENT)
            .danger_accept_invalid_certs(cfg.tls_skip_verify)
            .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
            .pool_idle_timeout(POOL_IDLE_TIMEOUT)
            .build()
            .map_err(|e| UnsealError::connection(&cfg.url, cfg.timeout, e.to_string(), Some(Box::new(e))))?;

        let url = cfg.url.trim_end_matches('/').to_owned();

        Ok(DefaultVaultClient {
            url,
            timeout: cfg.timeout,
            max_retries: cfg.max_retries as u32,
            retry_delay: cfg.retry_delay,
            http,
            closed: Arc::new(AtomicBool::new(false)),
            state: RwLock::new(()),
            inflight: Semaphore::new(MAX_INFLIGHT_PER_HOST.min(POOL_MAX_IDLE_TOTAL * 3)),
            metrics,
        })
    }

    async fn ensure_open(&self, operation: &str) -> Result<(), UnsealError> {
        let _guard = self.state.read().await;
        if self.closed.load(Ordering::Acquire) {
            return Err(UnsealError::vault(
                operation,
                &self.url,
                "client is closed",
                false,
            ));
        }
        Ok(())
    }

    fn record(&self, operation: &str, success: bool, started: Instant) {
        self.metrics
            .record_operation(operation, &self.url, success, started.elapsed());
    }

    async fn request_json<T: serde::de::DeserializeOwned>(
        &self,
        operation: &str,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<T, UnsealError> {
        self.ensure_open(operation).await?;
        let url = format!("{}{}", self.url, path);
        let mut last_err: Option<UnsealError> = None;
        let started = Instant::now();

        for attempt in 0..=self.max_retries {
            let _permit = self
                .inflight
                .acquire()
                .await
                .expect("semaphore is never closed");

            let mut req = self
                .http
                .request(method.clone(), &url)
                .header("X-Request-ID", Uuid::new_v4().to_string())
                .header("X-Content-Type-Options", "nosniff")
                .header("X-Frame-Options", "DENY");
            if let Some(ref b) = body {
                req = req.json(b);
            }

            match req.send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let parsed = resp.json::<T>().await.map_err(|e| {
                            UnsealError::vault_with_cause(
                                operation,
                                &self.url,
                                format!("decoding response body: {e}"),
                                false,
                                Box::new(e),
                            )
                        });
                        self.record(operation, parsed.is_ok(), started);
                        return parsed;
                    }

                    let message = resp
                        .text()
                        .await
                        .unwrap_or_else(|_| format!("HTTP {}", status.as_u16()));
                    let retryable = is_retryable_status(status);
                    last_err = Some(UnsealError::vault(operation, &self.url, message, retryable));
                    if attempt < self.max_retries && retryable {
                        sleep_cancellation_unaware(self.retry_delay, attempt).await;
                        continue;
                    }
                }
                Err(e) => {
                    let is_timeout = e.is_timeout();
                    let err = if is_timeout {
                        UnsealError::timeout(operation, self.timeout, started.elapsed())
                    } else {
                        UnsealError::vault_with_cause(
                            operation,
                            &self.url,
                            e.to_string(),
                            true,
                            Box::new(e),
                        )
                    };
                    last_err = Some(err);
                    if attempt < self.max_retries {
                        sleep_cancellation_unaware(self.retry_delay, attempt).await;
                        continue;
                    }
                }
            }
            break;
        }

        self.record(operation, false, started);
        Err(last_err.unwrap_or_else(|| UnsealError::vault(operation, &self.url, "unknown error", true)))
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::TOO_MANY_REQUESTS
            | StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

async fn sleep_cancellation_unaware(base: Duration, attempt: u32) {
    let delay = base.saturating_mul(2u32.saturating_pow(attempt));
    tokio::time::sleep(delay).await;
}

#[async_trait]
impl VaultClient for DefaultVaultClient {
    async fn is_sealed(&self) -> Result<bool, UnsealError> {
        let status: SealStatus = self
            .request_json("is-sealed", Method::GET, "/v1/sys/seal-status", None)
            .await?;
        Ok(status.sealed)
    }

    async fn get_seal_status(&self) -> Result<SealStatus, UnsealError> {
        self.request_json("get-seal-status", Method::GET, "/v1/sys/seal-status", None)
            .await
    }

    async fn unseal(
        &self,
        keys: &[String],
        threshold: u32,
        cancel: &CancellationToken,
    ) -> Result<SealStatus, UnsealError> {
        let mut status = self.get_seal_status().await?;
        if !status.sealed {
            return Ok(status);
        }

        let limit = (threshold as usize).min(keys.len());
        for (offset, key) in keys.iter().take(limit).enumerate() {
            if cancel.is_cancelled() {
                return Err(UnsealError::cancelled("unseal cancelled before all shares submitted"));
            }
            status = self.submit_single_share(key, offset + 1).await?;
            if !status.sealed {
                break;
            }
            tokio::select! {
                () = tokio::time::sleep(INTER_SHARE_PAUSE) => {}
                () = cancel.cancelled() => {
                    return Err(UnsealError::cancelled("unseal cancelled during inter-share pause"));
                }
            }
        }
        Ok(status)
    }

    async fn submit_single_share(&self, key: &str, index: usize) -> Result<SealStatus, UnsealError> {
        let body = serde_json::to_value(UnsealRequestBody { key }).map_err(|e| {
            UnsealError::validation(format!("failed to encode unseal request: {e}"))
        })?;

        self.request_json::<SealStatus>("unseal-key-submit", Method::POST, "/v1/sys/unseal", Some(body))
            .await
            .map_err(|cause| UnsealError::unseal(&self.url, index, cause, None))
    }

    async fn is_initialized(&self) -> Result<bool, UnsealError> {
        #[derive(serde::Deserialize)]
        struct Resp {
            initialized: bool,
        }
        let resp: Resp = self
            .request_json("is-initialized", Method::GET, "/v1/sys/init", None)
            .await?;
        Ok(resp.initialized)
    }

    async fn health_check(&self) -> Result<HealthStatus, UnsealError> {
        self.ensure_open("health-check").await?;
        let url = format!("{}/v1/sys/health", self.url);
        let started = Instant::now();
        let resp = self
            .http
            .get(&url)
            .header("X-Request-ID", Uuid::new_v4().to_string())
            .header("X-Content-Type-Options", "nosniff")
            .header("X-Frame-Options", "DENY")
            .send()
            .await
            .map_err(|e| {
                UnsealError::vault_with_cause("health-check", &self.url, e.to_string(), true, Box::new(e))
            })?;

        let status = resp.status();
        let result = match status {
            StatusCode::OK => Ok(HealthStatus {
                healthy: true,
                sealed: false,
                standby: false,
            }),
            StatusCode::TOO_MANY_REQUESTS => Ok(HealthStatus {
                healthy: true,
                sealed: false,
                standby: true,
            }),
            StatusCode::SERVICE_UNAVAILABLE => Ok(HealthStatus {
                healthy: true,
                sealed: true,
                standby: false,
            }),
            other => Err(UnsealError::vault(
                "health-check",
                &self.url,
                format!("unexpected health status {other}"),
                true,
            )),
        };
        self.record("health-check", result.is_ok(), started);
        result
    }

    async fn close(&self) {
        let _guard = self.state.write().await;
        self.closed.store(true, Ordering::Release);
    }

    fn url(&self) -> &str {
        &self.url
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn is_closed(&self) -> bool {
        let _guard = self.state.read().await;
        self.closed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn cfg(url: String) -> VaultClientConfig {
        VaultClientConfig {
            url,
            timeout: Duration::from_secs(2),
            max_retries: 1,
            retry_delay: Duration::from_millis(1),
            ..VaultClientConfig::default()
        }
    }

    #[test]
    fn rejects_empty_url() {
        let err = DefaultVaultClient::new(cfg(String::new())).unwrap_err();
        assert!(matches!(err, UnsealError::Validation { .. }));
    }

    #[test]
    fn rejects_non_http_scheme() {
        let err = DefaultVaultClient::new(cfg("ftp://vault:8200".to_owned())).unwrap_err();
        assert!(matches!(err, UnsealError::Validation { .. }));
    }

    #[test]
    fn rejects_url_over_length_limit() {
        let long = format!("http://vault:8200/{}", "a".repeat(MAX_URL_LEN));
        let err = DefaultVaultClient::new(cfg(long)).unwrap_err();
        assert!(matches!(err, UnsealError::Validation { .. }));
    }

    #[test]
    fn rejects_sub_millisecond_timeout() {
        let mut c = cfg("http://vault:8200".to_owned());
        c.timeout = Duration::from_micros(1);
        assert!(DefaultVaultClient::new(c).is_err());
    }

    #[test]
    fn rejects_negative_max_retries() {
        let mut c = cfg("http://vault:8200".to_owned());
        c.max_retries = -1;
        assert!(DefaultVaultClient::new(c).is_err());
    }

    #[tokio::test]
    async fn closed_client_fails_every_operation_but_close() {
        let client = DefaultVaultClient::new(cfg("http://vault:8200".to_owned())).unwrap();
        client.close().await;
        assert!(client.is_closed().await);

        let err = client.is_sealed().await.unwrap_err();
        match err {
            UnsealError::Vault { retryable, message, .. } => {
                assert!(!retryable);
                assert!(message.contains("client is closed"));
            }
            other => panic!("expected Vault error, got {other:?}"),
        }

        client.close().await;
        assert!(client.is_closed().await);
    }

    #[tokio::test]
    async fn is_sealed_reflects_seal_status_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/sys/seal-status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "sealed": true, "progress": 0, "t": 3, "n": 5, "initialized": true, "version": "1.15.0"
            })))
            .mount(&server)
            .await;

        let client = DefaultVaultClient::new(cfg(server.uri())).unwrap();
        assert!(client.is_sealed().await.unwrap());
    }

    #[tokio::test]
    async fn submit_single_share_wraps_failure_as_unseal_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/sys/unseal"))
            .respond_with(ResponseTemplate::new(500).set_body_string("internal error"))
            .mount(&server)
            .await;

        let client = DefaultVaultClient::new(cfg(server.uri())).unwrap();
        let err = client.submit_single_share("a2V5MQ==", 2).await.unwrap_err();
        match err {
            UnsealError::Unseal { key_index, .. } => assert_eq!(key_index, 2),
            other => panic!("expected Unseal error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unseal_returns_immediately_when_already_unsealed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/sys/seal-status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "sealed": false, "progress": 0, "t": 3, "n": 5, "initialized": true, "version": "1.15.0"
            })))
            .mount(&server)
            .await;

        let client = DefaultVaultClient::new(cfg(server.uri())).unwrap();
        let cancel = CancellationToken::new();
        let status = client.unseal(&[], 3, &cancel).await.unwrap();
        assert!(!status.sealed);
    }

    #[tokio::test]
    async fn health_check_treats_503_as_healthy_but_sealed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/sys/health"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = DefaultVaultClient::new(cfg(server.uri())).unwrap();
        let health = client.health_check().await.unwrap();
        assert!(health.healthy);
        assert!(health.sealed);
    }
}
