//! Startup reconciliation of local records against the remote catalog
//!
//! ```text
//!   DurableWriter::list(dir) ──filter──► candidates
//!            │                                │ read + modified (concurrent)
//!            │                                ▼
//!            │                          LocalItem::parse
//!            │                                │
//!   RemoteCatalogClient::list() ─────────────►├── tracked   (has remoteId) → report only
//!                                             └── untracked → create → stamp remoteId
//! ```
//!
//! The pass is additive: it never deletes or updates remote entries, and it
//! never touches local records other than to stamp the id of an entry it
//! just created. Every per-item failure lands in the report.
//!
//! When a [`VersionedRecordCache`] owns the same storage, attach it with
//! [`CatalogReconciler::with_cache`]: resident values are then the ones
//! uploaded, and stamps go through the cache's flush path instead of racing it.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use futures::stream::{self, StreamExt};
use scenevault_core::{DurableWriter, RecordKey, StoreError, VersionedRecordCache};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use crate::config::ReconcileSettings;
use crate::remote::{remote_id_from_value, CatalogEntry, NewCatalogEntry, RemoteCatalogClient};
use crate::{Result, SyncError};

/// Field of a local record holding its remote id
pub const REMOTE_ID_FIELD: &str = "remoteId";
/// Field of a local record holding its display name
pub const NAME_FIELD: &str = "name";

/// A local record as seen by reconciliation
#[derive(Debug, Clone, PartialEq)]
pub struct LocalItem {
    pub key: RecordKey,
    pub remote_id: Option<String>,
    pub display_name: String,
    pub payload: String,
    pub modified_at: DateTime<Utc>,
}

impl LocalItem {
    /// Interpret `payload` as a JSON object.
    ///
    /// `remoteId` (string or number) marks the item as tracked. The display
    /// name comes from `name`, falling back to the file stem.
    pub fn parse(key: RecordKey, payload: String, modified_at: DateTime<Utc>) -> Result<Self> {
        let value: Value = serde_json::from_str(&payload).map_err(|e| parse_error(&key, e))?;
        let object = match value {
            Value::Object(object) => object,
            _ => return Err(parse_error(&key, "expected a JSON object")),
        };

        let remote_id = object.get(REMOTE_ID_FIELD).and_then(remote_id_from_value);
        let display_name = object
            .get(NAME_FIELD)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(String::from)
            .unwrap_or_else(|| key.file_stem().to_string());

        Ok(Self {
            key,
            remote_id,
            display_name,
            payload,
            modified_at,
        })
    }

    pub fn is_tracked(&self) -> bool {
        self.remote_id.is_some()
    }
}

/// Insert `remoteId` into a JSON object payload, keeping the other fields in order.
///
/// The payload is re-serialized, so its original whitespace is not kept:
/// a multi-line payload comes back pretty-printed, a single-line one compact.
pub fn stamp_remote_id(key: &RecordKey, payload: &str, remote_id: &str) -> Result<String> {
    let mut object: Map<String, Value> =
        serde_json::from_str(payload).map_err(|e| parse_error(key, e))?;
    object.insert(
        REMOTE_ID_FIELD.to_string(),
        Value::String(remote_id.to_string()),
    );
    let object = Value::Object(object);
    if payload.trim().contains('\n') {
        Ok(serde_json::to_string_pretty(&object)?)
    } else {
        Ok(serde_json::to_string(&object)?)
    }
}

fn parse_error(key: &RecordKey, message: impl ToString) -> SyncError {
    SyncError::Parse {
        key: key.to_string(),
        message: message.to_string(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Report
// ─────────────────────────────────────────────────────────────────────────────

/// Step of the pass a failure happened in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    LocalList,
    Read,
    Parse,
    RemoteList,
    Create,
    Stamp,
}

/// A failure isolated to one item (or to one listing)
#[derive(Debug)]
pub struct ReconcileFailure {
    /// The record concerned; `None` for listing failures
    pub key: Option<RecordKey>,
    pub stage: FailureStage,
    pub error: SyncError,
}

impl ReconcileFailure {
    fn new(key: Option<RecordKey>, stage: FailureStage, error: impl Into<SyncError>) -> Self {
        Self {
            key,
            stage,
            error: error.into(),
        }
    }
}

impl std::fmt::Display for ReconcileFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.key {
            Some(key) => write!(f, "{:?} failed for {}: {}", self.stage, key, self.error),
            None => write!(f, "{:?} failed: {}", self.stage, self.error),
        }
    }
}

/// A remote entry created for a local record
#[derive(Debug, Clone)]
pub struct CreatedEntry {
    pub key: RecordKey,
    pub entry: CatalogEntry,
    /// Whether the new id was written back into the local record
    pub stamped: bool,
}

/// Outcome of one reconciliation pass
#[derive(Debug, Default)]
pub struct ReconcileReport {
    /// Every candidate record found locally
    pub scanned: Vec<RecordKey>,
    /// Size of the remote catalog, when the listing succeeded
    pub remote_count: Option<usize>,
    /// Records that already carry a remote id
    pub already_tracked: Vec<RecordKey>,
    pub created: Vec<CreatedEntry>,
    /// Local records whose remote id the catalog does not list
    pub unknown_remote_ids: Vec<(RecordKey, String)>,
    pub errors: Vec<ReconcileFailure>,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    /// Failures recorded at `stage`
    pub fn errors_at(&self, stage: FailureStage) -> impl Iterator<Item = &ReconcileFailure> + '_ {
        self.errors.iter().filter(move |failure| failure.stage == stage)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Reconciler
// ─────────────────────────────────────────────────────────────────────────────

/// One-shot uploader of local records the remote catalog does not track
pub struct CatalogReconciler {
    writer: Arc<dyn DurableWriter>,
    client: Arc<dyn RemoteCatalogClient>,
    settings: ReconcileSettings,
    cache: Option<VersionedRecordCache>,
}

impl std::fmt::Debug for CatalogReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogReconciler")
            .field("settings", &self.settings)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl CatalogReconciler {
    pub fn new(
        writer: Arc<dyn DurableWriter>,
        client: Arc<dyn RemoteCatalogClient>,
        settings: ReconcileSettings,
    ) -> Self {
        Self {
            writer,
            client,
            settings,
            cache: None,
        }
    }

    /// Route record reads and stamps through `cache`, which must persist
    /// through this reconciler's writer
    pub fn with_cache(mut self, cache: VersionedRecordCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn settings(&self) -> &ReconcileSettings {
        &self.settings
    }

    /// Keys of the local records taking part in reconciliation
    pub async fn candidates(&self) -> Result<Vec<RecordKey>> {
        let names = self.writer.list(&self.settings.dir).await?;
        let keys = names
            .iter()
            .filter(|name| self.settings.is_candidate(name))
            .map(|name| RecordKey::join(&self.settings.dir, name))
            .collect::<scenevault_core::Result<Vec<_>>>()?;
        Ok(keys)
    }

    /// Run one pass. Never fails as a whole; see [`ReconcileReport::errors`].
    pub async fn run(&self) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        let (local, remote) = tokio::join!(self.load_local(), self.client.list());

        let items = match local {
            Ok((scanned, loaded)) => {
                report.scanned = scanned;
                let mut items = Vec::with_capacity(loaded.len());
                for outcome in loaded {
                    match outcome {
                        Ok(item) => items.push(item),
                        Err(failure) => report.errors.push(failure),
                    }
                }
                items
            }
            Err(failure) => {
                report.errors.push(failure);
                Vec::new()
            }
        };

        let remote_ids = match remote {
            Ok(entries) => {
                report.remote_count = Some(entries.len());
                Some(
                    entries
                        .into_iter()
                        .map(|entry| entry.remote_id)
                        .collect::<HashSet<_>>(),
                )
            }
            Err(e) => {
                report
                    .errors
                    .push(ReconcileFailure::new(None, FailureStage::RemoteList, e));
                None
            }
        };

        let (tracked, untracked): (Vec<_>, Vec<_>) =
            items.into_iter().partition(LocalItem::is_tracked);

        for item in tracked {
            if let (Some(known), Some(remote_id)) = (&remote_ids, &item.remote_id) {
                if !known.contains(remote_id) {
                    report
                        .unknown_remote_ids
                        .push((item.key.clone(), remote_id.clone()));
                }
            }
            report.already_tracked.push(item.key);
        }

        let uploads = untracked.into_iter().map(|item| self.upload(item)).collect();
        for outcome in self.fan_out(uploads).await {
            match outcome {
                Ok((created, stamp_failure)) => {
                    report.created.push(created);
                    report.errors.extend(stamp_failure);
                }
                Err(failure) => report.errors.push(failure),
            }
        }

        for failure in &report.errors {
            tracing::warn!("Reconciliation: {}", failure);
        }
        tracing::info!(
            "Reconciliation complete: {} scanned, {} tracked, {} created, {} errors",
            report.scanned.len(),
            report.already_tracked.len(),
            report.created.len(),
            report.errors.len()
        );
        report
    }

    #[allow(clippy::type_complexity)]
    async fn load_local(
        &self,
    ) -> std::result::Result<
        (
            Vec<RecordKey>,
            Vec<std::result::Result<LocalItem, ReconcileFailure>>,
        ),
        ReconcileFailure,
    > {
        let keys = self
            .candidates()
            .await
            .map_err(|e| ReconcileFailure::new(None, FailureStage::LocalList, e))?;
        let loads = keys.iter().cloned().map(|key| self.load(key)).collect();
        let loaded = self.fan_out(loads).await;
        Ok((keys, loaded))
    }

    async fn load(&self, key: RecordKey) -> std::result::Result<LocalItem, ReconcileFailure> {
        let (payload, modified) = tokio::join!(self.current(&key), self.writer.modified(&key));
        let read_failure =
            |e| ReconcileFailure::new(Some(key.clone()), FailureStage::Read, SyncError::Store(e));
        let payload = payload.map_err(read_failure)?;
        let modified_at = modified.map_err(read_failure)?;

        LocalItem::parse(key.clone(), payload, modified_at)
            .map_err(|e| ReconcileFailure::new(Some(key.clone()), FailureStage::Parse, e))
    }

    async fn upload(
        &self,
        item: LocalItem,
    ) -> std::result::Result<(CreatedEntry, Option<ReconcileFailure>), ReconcileFailure> {
        let request = NewCatalogEntry {
            name: item.display_name.clone(),
            data: item.payload.clone(),
            last_updated_at: item.modified_at,
        };
        let entry = self
            .client
            .create(request)
            .await
            .map_err(|e| ReconcileFailure::new(Some(item.key.clone()), FailureStage::Create, e))?;
        tracing::debug!("Created remote entry {} for {}", entry.remote_id, item.key);

        let stamp_failure = if self.settings.stamp_remote_id {
            self.stamp(&item, &entry.remote_id)
                .await
                .err()
                .map(|e| ReconcileFailure::new(Some(item.key.clone()), FailureStage::Stamp, e))
        } else {
            None
        };

        let created = CreatedEntry {
            stamped: self.settings.stamp_remote_id && stamp_failure.is_none(),
            key: item.key,
            entry,
        };
        Ok((created, stamp_failure))
    }

    /// Resident value when a cache is attached, durable copy otherwise
    async fn current(&self, key: &RecordKey) -> scenevault_core::Result<String> {
        let resident = self
            .cache
            .as_ref()
            .and_then(|cache| cache.record(key))
            .map(|record| record.data);
        match resident {
            Some(data) => Ok(data),
            None => self.writer.read(key).await,
        }
    }

    async fn stamp(&self, item: &LocalItem, remote_id: &str) -> Result<()> {
        let Some(cache) = &self.cache else {
            let stamped = stamp_remote_id(&item.key, &item.payload, remote_id)?;
            self.writer.write(&item.key, &stamped).await?;
            return Ok(());
        };

        // Stamp the latest value, including writes that landed after the upload
        if !cache.contains(&item.key) {
            cache.register_files([item.key.clone()]).await;
        }
        cache
            .update(&item.key, |current| stamp_remote_id(&item.key, current, remote_id))
            .unwrap_or_else(|| Err(StoreError::NotFound(item.key.clone()).into()))
    }

    async fn fan_out<F>(&self, futures: Vec<F>) -> Vec<F::Output>
    where
        F: Future,
    {
        match self.settings.max_concurrency {
            Some(limit) => {
                stream::iter(futures)
                    .buffered(limit.max(1))
                    .collect()
                    .await
            }
            None => join_all(futures).await,
        }
    }
}
