//! `vault-unseal-operator` entry point.
//!
//! Bootstraps the Kubernetes client, the Client Repository, the wrapped
//! Unseal Strategy, the Pod Watcher, and the `kube_runtime` reconcile loop,
//! then serves the health/metrics HTTP surface alongside them until a
//! termination signal arrives.

use std::sync::Arc;

use anyhow::Context;
use futures::StreamExt;
use kube::runtime::{watcher, Controller};
use kube::{Api, Client};
use tokio::net::TcpListener;
use tracing::{info, warn};

use vault_unseal_client::{ClientRepository, DefaultVaultClient, VaultClientConfig};
use vault_unseal_controller::{reconcile as reconcile_fn, Metrics, ReconcilerContext, UnsealProcessor, VaultUnsealConfig};
use vault_unseal_core::DefaultKeyValidator;
use vault_unseal_strategy::{DefaultRetryPolicy, DefaultUnsealStrategy, RetryStrategy, UnsealStrategy};

mod config;
mod health;
mod reflector_source;

use config::OperatorConfig;
use health::ReadinessFlag;
use reflector_source::ReflectorDescriptorSource;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = OperatorConfig::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .json()
        .init();

    info!(namespace = %config.namespace, "vault-unseal-operator starting");

    let client = Client::try_default().await.context("failed to build kube::Client")?;
    let readiness = ReadinessFlag::new();
    readiness.mark_ready();

    let metrics = Arc::new(Metrics::new().context("failed to construct metrics registry")?);

    let client_timeout = config.client_timeout;
    let max_retries = config.max_retries;
    let metrics_for_factory = metrics.clone();
    let repository = Arc::new(ClientRepository::new(Arc::new(move |descriptor| {
        let cfg = VaultClientConfig {
            url: descriptor.endpoint.clone(),
            tls_skip_verify: descriptor.tls_skip_verify,
            timeout: client_timeout,
            max_retries: i32::try_from(max_retries).unwrap_or(3),
            ..VaultClientConfig::default()
        };
        let vault_client = DefaultVaultClient::with_metrics(cfg, metrics_for_factory.clone())?;
        Ok(Arc::new(vault_client) as Arc<dyn vault_unseal_client::VaultClient>)
    })));

    let validator = Arc::new(DefaultKeyValidator);
    let base_strategy = Arc::new(DefaultUnsealStrategy::new(validator, metrics.clone()));
    let strategy: Arc<dyn UnsealStrategy> = Arc::new(RetryStrategy::new(base_strategy, Arc::new(DefaultRetryPolicy::default())));

    let (descriptor_source, watch_handle) = ReflectorDescriptorSource::spawn(client.clone(), &config.namespace);
    let descriptor_source: Arc<dyn vault_unseal_controller::DescriptorSource> = Arc::new(descriptor_source);

    let processor = Arc::new(UnsealProcessor::spawn(
        config.worker_count,
        config.cooldown,
        repository.clone(),
        descriptor_source.clone(),
        strategy.clone(),
        metrics.clone(),
    ));

    let pod_watch_client = client.clone();
    let pod_watch_descriptors = descriptor_source.clone();
    let pod_watch_processor = processor.clone();
    let pod_watch_handle = tokio::spawn(vault_unseal_controller::pod_watcher::run(
        pod_watch_client,
        pod_watch_descriptors,
        pod_watch_processor,
    ));

    let reconciler_ctx = Arc::new(ReconcilerContext {
        client: client.clone(),
        repository: repository.clone(),
        strategy: strategy.clone(),
        metrics: metrics.clone(),
    });

    let api: Api<VaultUnsealConfig> = if config.namespace.is_empty() {
        Api::all(client.clone())
    } else {
        Api::namespaced(client.clone(), &config.namespace)
    };

    let controller_handle = tokio::spawn(
        Controller::new(api, watcher::Config::default())
            .shutdown_on_signal()
            .run(reconcile_fn, vault_unseal_controller::error_policy, reconciler_ctx)
            .for_each(|result| async move {
                match result {
                    Ok((object, action)) => info!(?object, ?action, "reconciled"),
                    Err(err) => warn!(%err, "reconcile failed"),
                }
            }),
    );

    let health_router = health::router(readiness, metrics.clone());
    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind health/metrics listener on {}", config.bind_addr))?;
    info!(addr = %config.bind_addr, "health/metrics listener bound");

    tokio::select! {
        result = axum::serve(listener, health_router).with_graceful_shutdown(shutdown_signal()) => {
            if let Err(err) = result {
                warn!(%err, "health/metrics server error");
            }
        }
        _ = controller_handle => {
            warn!("reconcile loop exited");
        }
    }

    info!("shutting down, closing client repository and draining unseal processor");
    watch_handle.abort();
    pod_watch_handle.abort();
    repository.close().await;
    if let Ok(processor) = Arc::try_unwrap(processor) {
        processor.shutdown().await;
    } else {
        warn!("unseal processor still has outstanding references at shutdown, skipping drain");
    }

    info!("vault-unseal-operator stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        if let Ok(mut sig) = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            sig.recv().await;
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
