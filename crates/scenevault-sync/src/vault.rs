//! SceneVault - the startup container
//!
//! Owns one record cache, one catalog client and one reconciler. Nothing in
//! this crate keeps process-wide state; embed a `SceneVault` wherever the
//! application keeps its services.

use scenevault_core::{Registration, RecordKey, VersionedRecordCache};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{ReconcileSettings, SyncConfig};
use crate::reconcile::{CatalogReconciler, ReconcileReport};
use crate::remote::{HttpCatalogClient, RemoteCatalogClient, SharedToken, TokenSource};
use crate::Result;

/// Outcome of [`SceneVault::startup`]
#[derive(Debug)]
pub struct StartupReport {
    pub reconcile: ReconcileReport,
    pub registration: Registration,
}

impl StartupReport {
    pub fn is_clean(&self) -> bool {
        self.reconcile.is_clean() && self.registration.is_clean()
    }
}

/// Record cache plus catalog sync, wired together
pub struct SceneVault {
    cache: VersionedRecordCache,
    client: Arc<dyn RemoteCatalogClient>,
    reconciler: CatalogReconciler,
}

impl std::fmt::Debug for SceneVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SceneVault")
            .field("cache", &self.cache)
            .field("reconciler", &self.reconciler)
            .finish_non_exhaustive()
    }
}

impl SceneVault {
    /// Filesystem store and HTTP catalog client as described by `config`
    pub fn open(config: SyncConfig) -> Result<Self> {
        let tokens = Arc::new(SharedToken::new(config.remote.token.clone()));
        Self::open_with_tokens(config, tokens)
    }

    /// Like [`open`](Self::open), with bearer tokens supplied by the auth layer
    pub fn open_with_tokens(config: SyncConfig, tokens: Arc<dyn TokenSource>) -> Result<Self> {
        config.validate()?;
        let cache = VersionedRecordCache::from_config(&config.store)?;
        let client = HttpCatalogClient::new(
            &config.remote.base_url,
            tokens,
            Duration::from_secs(config.remote.timeout_secs),
        )?;

        tracing::info!(
            "Opening SceneVault at {} (catalog {})",
            config.store.root.display(),
            config.remote.base_url
        );
        Ok(Self::with_parts(cache, Arc::new(client), config.reconcile))
    }

    /// Assemble from existing parts; the reconciler shares the cache's writer
    /// and stamps remote ids through the cache
    pub fn with_parts(
        cache: VersionedRecordCache,
        client: Arc<dyn RemoteCatalogClient>,
        settings: ReconcileSettings,
    ) -> Self {
        let reconciler = CatalogReconciler::new(cache.writer(), Arc::clone(&client), settings)
            .with_cache(cache.clone());
        Self {
            cache,
            client,
            reconciler,
        }
    }

    /// Reconcile with the catalog, then seed the cache with every local record.
    ///
    /// Stamped records are already resident (and flushing) when registration
    /// runs, so they show up as cached rather than seeded.
    pub async fn startup(&self) -> StartupReport {
        let reconcile = self.reconciler.run().await;
        let registration = self
            .cache
            .register_files(reconcile.scanned.iter().cloned())
            .await;

        tracing::info!(
            "SceneVault ready: {} records cached, {} created remotely",
            self.cache.len(),
            reconcile.created.len()
        );
        StartupReport {
            reconcile,
            registration,
        }
    }

    /// Fetch a catalog entry's payload and write it to `key` through the cache
    pub async fn import_remote(&self, remote_id: &str, key: RecordKey) -> Result<()> {
        let payload = self.client.fetch_one(remote_id).await?;
        tracing::debug!("Imported remote entry {} into {}", remote_id, key);
        self.cache.write(key, payload);
        Ok(())
    }

    pub fn cache(&self) -> &VersionedRecordCache {
        &self.cache
    }

    pub fn client(&self) -> Arc<dyn RemoteCatalogClient> {
        Arc::clone(&self.client)
    }

    pub fn reconciler(&self) -> &CatalogReconciler {
        &self.reconciler
    }
}
