//! Client Repository: a keyed pool of Vault Clients, one per instance,
//! created on demand and closed on shutdown.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{OnceCell, RwLock};
use vault_unseal_core::{InstanceDescriptor, UnsealError};

use crate::client::VaultClient;

/// Builds a concrete [`VaultClient`] from an instance descriptor. Boxed so
/// the repository does not need to know about `DefaultVaultClient`
/// construction parameters (timeout, retries) directly — those are closed
/// over by whoever builds the factory (the operator's wiring code).
pub type ClientFactory =
    Arc<dyn Fn(&InstanceDescriptor) -> Result<Arc<dyn VaultClient>, UnsealError> + Send + Sync>;

struct CacheEntry {
    once: Arc<OnceCell<Arc<dyn VaultClient>>>,
    endpoint: String,
    tls_skip_verify: bool,
}

/// Process-wide pool of Vault Clients keyed by instance identity
/// (conventionally `"<namespace>/<instanceName>"`).
pub struct ClientRepository {
    entries: RwLock<HashMap<String, CacheEntry>>,
    closed: AtomicBool,
    factory: ClientFactory,
}

impl ClientRepository {
    #[must_use]
    pub fn new(factory: ClientFactory) -> Self {
        ClientRepository {
            entries: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
            factory,
        }
    }

    /// Returns the existing client for `key`, or creates one from
    /// `descriptor` on first miss. Concurrent calls for the same key
    /// observe the same client and never race to create duplicates.
    ///
    /// When `descriptor`'s endpoint or TLS setting differs from the cached
    /// entry's, the old client is closed and a new one takes its place;
    /// in-flight operations on the old client complete normally.
    ///
    /// # Errors
    ///
    /// Returns [`UnsealError::Vault`] (non-retryable) if the repository has
    /// been closed, or whatever error the factory returns on construction
    /// failure — in which case the miss is not cached and the next `get`
    /// retries creation.
    pub async fn get(
        &self,
        key: &str,
        descriptor: &InstanceDescriptor,
    ) -> Result<Arc<dyn VaultClient>, UnsealError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(closed_error());
        }

        if let Some(client) = self.fresh_cached(key, descriptor).await {
            return Ok(client);
        }

        let (once_cell, stale) = self.claim_slot(key, descriptor).await?;

        if let Some(stale_client) = stale {
            stale_client.close().await;
        }

        let factory = self.factory.clone();
        let descriptor = descriptor.clone();
        once_cell
            .get_or_try_init(|| async move { factory(&descriptor) })
            .await
            .cloned()
    }

    async fn fresh_cached(
        &self,
        key: &str,
        descriptor: &InstanceDescriptor,
    ) -> Option<Arc<dyn VaultClient>> {
        let map = self.entries.read().await;
        let entry = map.get(key)?;
        if entry.endpoint != descriptor.endpoint || entry.tls_skip_verify != descriptor.tls_skip_verify {
            return None;
        }
        entry.once.get().cloned()
    }

    /// Returns the `OnceCell` slot to initialize for `key`, plus any stale
    /// client that must be closed because the descriptor changed.
    async fn claim_slot(
        &self,
        key: &str,
        descriptor: &InstanceDescriptor,
    ) -> Result<(Arc<OnceCell<Arc<dyn VaultClient>>>, Option<Arc<dyn VaultClient>>), UnsealError> {
        let mut map = self.entries.write().await;
        if self.closed.load(Ordering::Acquire) {
            return Err(closed_error());
        }

        match map.get(key) {
            Some(entry)
                if entry.endpoint == descriptor.endpoint
                    && entry.tls_skip_verify == descriptor.tls_skip_verify =>
            {
                Ok((entry.once.clone(), None))
            }
            Some(entry) => {
                let stale = entry.once.get().cloned();
                let fresh = CacheEntry {
                    once: Arc::new(OnceCell::new()),
                    endpoint: descriptor.endpoint.clone(),
                    tls_skip_verify: descriptor.tls_skip_verify,
                };
                let once = fresh.once.clone();
                map.insert(key.to_owned(), fresh);
                Ok((once, stale))
            }
            None => {
                let fresh = CacheEntry {
                    once: Arc::new(OnceCell::new()),
                    endpoint: descriptor.endpoint.clone(),
                    tls_skip_verify: descriptor.tls_skip_verify,
                };
                let once = fresh.once.clone();
                map.insert(key.to_owned(), fresh);
                Ok((once, None))
            }
        }
    }

    /// Closes every client and clears the map. Idempotent.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let mut map = self.entries.write().await;
        for (_, entry) in map.drain() {
            if let Some(client) = entry.once.get() {
                client.close().await;
            }
        }
    }

    /// Evicts and closes the client for `key`, if present. Used by the
    /// Reconciler when a declarative resource is deleted.
    pub async fn evict(&self, key: &str) {
        let removed = {
            let mut map = self.entries.write().await;
            map.remove(key)
        };
        if let Some(entry) = removed {
            if let Some(client) = entry.once.get() {
                client.close().await;
            }
        }
    }
}

fn closed_error() -> UnsealError {
    UnsealError::vault("repository-get", "", "repository closed", false)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::unimplemented)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio_util::sync::CancellationToken;
    use vault_unseal_core::{InstanceDescriptor, UnsealError};

    use crate::types::{HealthStatus, SealStatus};

    #[derive(Debug)]
    struct FakeClient {
        url: String,
        closed: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl VaultClient for FakeClient {
        async fn is_sealed(&self) -> Result<bool, UnsealError> {
            Ok(false)
        }
        async fn get_seal_status(&self) -> Result<SealStatus, UnsealError> {
            unimplemented!()
        }
        async fn unseal(
            &self,
            _keys: &[String],
            _threshold: u32,
            _cancel: &CancellationToken,
        ) -> Result<SealStatus, UnsealError> {
            unimplemented!()
        }
        async fn submit_single_share(&self, _key: &str, _index: usize) -> Result<SealStatus, UnsealError> {
            unimplemented!()
        }
        async fn is_initialized(&self) -> Result<bool, UnsealError> {
            Ok(true)
        }
        async fn health_check(&self) -> Result<HealthStatus, UnsealError> {
            unimplemented!()
        }
        async fn close(&self) {
            self.closed.store(true, Ordering::Release);
        }
        fn url(&self) -> &str {
            &self.url
        }
        fn timeout(&self) -> Duration {
            Duration::from_secs(1)
        }
        async fn is_closed(&self) -> bool {
            self.closed.load(Ordering::Acquire)
        }
    }

    fn descriptor(endpoint: &str, tls_skip_verify: bool) -> InstanceDescriptor {
        InstanceDescriptor {
            name: "v1".to_owned(),
            endpoint: endpoint.to_owned(),
            unseal_keys: vec!["a2V5".to_owned()],
            threshold: None,
            tls_skip_verify,
            ha_enabled: false,
            pod_selector: None,
            namespace: None,
        }
    }

    fn counting_factory() -> (ClientFactory, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        let factory: ClientFactory = Arc::new(move |d: &InstanceDescriptor| {
            count_clone.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(FakeClient {
                url: d.endpoint.clone(),
                closed: std::sync::atomic::AtomicBool::new(false),
            }) as Arc<dyn VaultClient>)
        });
        (factory, count)
    }

    #[tokio::test]
    async fn repeated_get_reuses_same_client() {
        let (factory, count) = counting_factory();
        let repo = ClientRepository::new(factory);
        let d = descriptor("http://v1:8200", false);

        let a = repo.get("default/v1", &d).await.unwrap();
        let b = repo.get("default/v1", &d).await.unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_get_creates_exactly_once() {
        let (factory, count) = counting_factory();
        let repo = Arc::new(ClientRepository::new(factory));
        let d = descriptor("http://v1:8200", false);

        let mut handles = Vec::new();
        for _ in 0..16 {
            let repo = repo.clone();
            let d = d.clone();
            handles.push(tokio::spawn(async move { repo.get("default/v1", &d).await.unwrap() }));
        }
        let mut clients = Vec::new();
        for h in handles {
            clients.push(h.await.unwrap());
        }
        for c in &clients[1..] {
            assert!(Arc::ptr_eq(&clients[0], c));
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn descriptor_change_replaces_and_closes_old_client() {
        let (factory, count) = counting_factory();
        let repo = ClientRepository::new(factory);

        let original = descriptor("http://v1:8200", false);
        let changed = descriptor("http://v1-new:8200", false);

        let first = repo.get("default/v1", &original).await.unwrap();
        let second = repo.get("default/v1", &changed).await.unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert!(first.is_closed().await);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn close_is_idempotent_and_get_fails_afterward() {
        let (factory, _count) = counting_factory();
        let repo = ClientRepository::new(factory);
        let d = descriptor("http://v1:8200", false);

        let client = repo.get("default/v1", &d).await.unwrap();
        repo.close().await;
        repo.close().await;

        assert!(client.is_closed().await);
        let err = repo.get("default/v1", &d).await.unwrap_err();
        assert!(err.to_string().contains("repository closed"));
    }
}
