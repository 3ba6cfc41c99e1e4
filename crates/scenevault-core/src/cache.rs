//! VersionedRecordCache - write-behind cache over a [`DurableWriter`]
//!
//! Callers get read-after-write consistency from memory while persistence runs
//! on background tasks:
//!
//! ```text
//! write(key, data) ──► record.data = data, version += 1
//!                          │
//!                          ├─ state == Flushing ──► done (running worker picks it up)
//!                          │
//!                          └─ state == Idle ──► state = Flushing, spawn worker
//!
//! worker: loop {
//!     (data, V) = snapshot
//!     DurableWriter::write(key, data)
//!       ok  ─► version == V ? state = Idle, stop : loop
//!       err ─► RetryPolicy::next_delay ─► Some(d): sleep(d), loop
//!                                      └► None:    state = Idle, GaveUp
//! }
//! ```
//!
//! The [`FlushState`] of a record is the only mutual exclusion on the durable
//! path: at most one worker, and therefore one durable write, exists per key.
//! The record map lock is never held across an `.await`.

use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};

use crate::config::StoreConfig;
use crate::durable::{DurableWriter, FsDurableWriter};
use crate::key::RecordKey;
use crate::retry::RetryPolicy;
use crate::{Result, StoreError};

/// Durable-path state of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushState {
    /// No flush worker owns the record
    Idle,
    /// A flush worker owns the record and will persist the latest version
    Flushing,
}

/// In-memory, versioned copy of one persisted item
#[derive(Debug, Clone)]
pub struct Record {
    pub key: RecordKey,
    pub data: String,
    /// Bumped exactly once per accepted write; 0 when created or seeded
    pub version: u64,
    pub state: FlushState,
    /// Last version known to match the durable copy
    pub persisted_version: Option<u64>,
}

impl Record {
    fn created(key: RecordKey, data: String) -> Self {
        Self {
            key,
            data,
            version: 0,
            state: FlushState::Idle,
            persisted_version: None,
        }
    }

    fn seeded(key: RecordKey, data: String) -> Self {
        Self {
            persisted_version: Some(0),
            ..Self::created(key, data)
        }
    }

    /// Durable copy matches the in-memory one
    pub fn is_persisted(&self) -> bool {
        self.persisted_version == Some(self.version)
    }
}

/// Progress notifications from flush workers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushEvent {
    /// `version` reached durable storage and nothing newer is pending
    Persisted { key: RecordKey, version: u64 },
    /// A durable write failed; another attempt follows after `delay`
    Retrying {
        key: RecordKey,
        failures: u32,
        delay: Duration,
        error: String,
    },
    /// The retry policy gave up; `version` is not durable
    GaveUp {
        key: RecordKey,
        version: u64,
        failures: u32,
        error: String,
    },
}

/// Outcome of [`VersionedRecordCache::register_files`]
#[derive(Debug, Default)]
pub struct Registration {
    /// Read from durable storage and seeded at version 0
    pub seeded: Vec<RecordKey>,
    /// Already resident, left untouched
    pub cached: Vec<RecordKey>,
    /// No durable copy exists
    pub missing: Vec<RecordKey>,
    /// Existence check or read failed for these keys
    pub failed: Vec<(RecordKey, StoreError)>,
}

impl Registration {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

enum RegisterOutcome {
    Seeded,
    Cached,
    Missing,
    Failed(StoreError),
}

struct CacheInner {
    records: Mutex<HashMap<RecordKey, Record>>,
    writer: Arc<dyn DurableWriter>,
    retry: Arc<dyn RetryPolicy>,
    events: broadcast::Sender<FlushEvent>,
    active_flushes: watch::Sender<usize>,
}

/// Versioned write-behind record cache.
///
/// Cloning is cheap and yields a handle to the same cache. [`write`](Self::write)
/// and [`copy`](Self::copy) spawn Tokio tasks and must run inside a Tokio runtime.
#[derive(Clone)]
pub struct VersionedRecordCache {
    inner: Arc<CacheInner>,
}

impl std::fmt::Debug for VersionedRecordCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionedRecordCache")
            .field("records", &self.len())
            .field("active_flushes", &*self.inner.active_flushes.borrow())
            .field("retry", &self.inner.retry)
            .finish_non_exhaustive()
    }
}

impl VersionedRecordCache {
    /// Create a cache persisting through `writer`
    pub fn new(writer: Arc<dyn DurableWriter>, retry: Arc<dyn RetryPolicy>) -> Self {
        Self::with_event_capacity(writer, retry, crate::config::DEFAULT_EVENT_CAPACITY)
    }

    pub fn with_event_capacity(
        writer: Arc<dyn DurableWriter>,
        retry: Arc<dyn RetryPolicy>,
        event_capacity: usize,
    ) -> Self {
        let (events, _) = broadcast::channel(event_capacity.max(1));
        let (active_flushes, _) = watch::channel(0);
        Self {
            inner: Arc::new(CacheInner {
                records: Mutex::new(HashMap::new()),
                writer,
                retry,
                events,
                active_flushes,
            }),
        }
    }

    /// Filesystem-backed cache described by `config`
    pub fn from_config(config: &StoreConfig) -> Result<Self> {
        config.validate()?;
        let writer = FsDurableWriter::new(config.root.clone())
            .with_atomic_writes(config.atomic_writes);
        Ok(Self::with_event_capacity(
            Arc::new(writer),
            config.retry.build(),
            config.event_capacity,
        ))
    }

    /// The durable writer behind this cache
    pub fn writer(&self) -> Arc<dyn DurableWriter> {
        Arc::clone(&self.inner.writer)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Record operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Seed the cache with the durable copies of `keys`.
    ///
    /// Keys already resident are skipped. Every key is checked independently
    /// and concurrently; a failing key is reported in [`Registration::failed`]
    /// without affecting the others.
    pub async fn register_files<I>(&self, keys: I) -> Registration
    where
        I: IntoIterator<Item = RecordKey>,
    {
        let checks = keys.into_iter().map(|key| async move {
            let outcome = self.register_one(&key).await;
            (key, outcome)
        });

        let mut registration = Registration::default();
        for (key, outcome) in join_all(checks).await {
            match outcome {
                RegisterOutcome::Seeded => registration.seeded.push(key),
                RegisterOutcome::Cached => registration.cached.push(key),
                RegisterOutcome::Missing => registration.missing.push(key),
                RegisterOutcome::Failed(err) => {
                    tracing::warn!("Failed to register {}: {}", key, err);
                    registration.failed.push((key, err));
                }
            }
        }

        tracing::debug!(
            "Registered files: {} seeded, {} cached, {} missing, {} failed",
            registration.seeded.len(),
            registration.cached.len(),
            registration.missing.len(),
            registration.failed.len()
        );
        registration
    }

    async fn register_one(&self, key: &RecordKey) -> RegisterOutcome {
        if self.contains(key) {
            return RegisterOutcome::Cached;
        }
        match self.inner.writer.exists(key).await {
            Ok(false) => RegisterOutcome::Missing,
            Ok(true) => match self.inner.writer.read(key).await {
                Ok(data) => {
                    self.seed(key, data);
                    RegisterOutcome::Seeded
                }
                Err(err) => RegisterOutcome::Failed(err),
            },
            Err(err) => RegisterOutcome::Failed(err),
        }
    }

    /// True if the record is resident or stored durably
    pub async fn exists(&self, key: &RecordKey) -> Result<bool> {
        if self.contains(key) {
            return Ok(true);
        }
        self.inner.writer.exists(key).await
    }

    /// Accept a write and schedule its flush.
    ///
    /// The new value is visible to [`read`](Self::read) immediately. Durability
    /// failures never reach the caller; they are retried per the cache's
    /// [`RetryPolicy`] and reported through [`subscribe`](Self::subscribe).
    pub fn write(&self, key: RecordKey, data: impl Into<String>) {
        let data = data.into();
        let start_worker = {
            let mut records = self.inner.records.lock();
            let record = records
                .entry(key.clone())
                .and_modify(|record| record.version += 1)
                .or_insert_with(|| Record::created(key.clone(), String::new()));
            record.data = data;
            claim_flush(record)
        };

        if start_worker {
            self.spawn_flush(key);
        }
    }

    /// Rewrite a resident value in place and schedule its flush.
    ///
    /// `edit` sees the latest value under the record lock, so no concurrent
    /// [`write`](Self::write) can slip between the read and the replacement.
    /// Returns `None` when `key` is not resident; an `Err` from `edit` leaves
    /// the record untouched.
    pub fn update<F, E>(&self, key: &RecordKey, edit: F) -> Option<std::result::Result<(), E>>
    where
        F: FnOnce(&str) -> std::result::Result<String, E>,
    {
        let start_worker = {
            let mut records = self.inner.records.lock();
            let record = records.get_mut(key)?;
            match edit(&record.data) {
                Ok(data) => {
                    record.data = data;
                    record.version += 1;
                    claim_flush(record)
                }
                Err(err) => return Some(Err(err)),
            }
        };

        if start_worker {
            self.spawn_flush(key.clone());
        }
        Some(Ok(()))
    }

    /// Current value of `key`.
    ///
    /// A key that is not resident costs one durable read, after which it is
    /// seeded at version 0. Keys registered through
    /// [`register_files`](Self::register_files) never take this path.
    pub async fn read(&self, key: &RecordKey) -> Result<String> {
        if let Some(data) = self.cached(key) {
            return Ok(data);
        }

        tracing::debug!("Cache miss for {}, falling back to durable read", key);
        let data = self.inner.writer.read(key).await?;
        Ok(self.seed(key, data))
    }

    /// Copy the current value of `src` to `dest` and schedule `dest`'s flush.
    ///
    /// A resident `dest` takes the copy as a regular write (version bump).
    pub async fn copy(&self, src: &RecordKey, dest: RecordKey) -> Result<()> {
        let data = self.read(src).await?;
        self.write(dest, data);
        Ok(())
    }

    /// Resolve once no flush worker is running
    pub async fn flushed(&self) {
        let mut active = self.inner.active_flushes.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = active.wait_for(|count| *count == 0).await;
    }

    /// Subscribe to flush progress
    pub fn subscribe(&self) -> broadcast::Receiver<FlushEvent> {
        self.inner.events.subscribe()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Observers
    // ─────────────────────────────────────────────────────────────────────────

    pub fn contains(&self, key: &RecordKey) -> bool {
        self.inner.records.lock().contains_key(key)
    }

    /// Snapshot of a resident record
    pub fn record(&self, key: &RecordKey) -> Option<Record> {
        self.inner.records.lock().get(key).cloned()
    }

    pub fn version(&self, key: &RecordKey) -> Option<u64> {
        self.inner.records.lock().get(key).map(|r| r.version)
    }

    pub fn flush_state(&self, key: &RecordKey) -> Option<FlushState> {
        self.inner.records.lock().get(key).map(|r| r.state)
    }

    /// True when the durable copy of a resident key is up to date
    pub fn is_persisted(&self, key: &RecordKey) -> bool {
        self.inner
            .records
            .lock()
            .get(key)
            .map(Record::is_persisted)
            .unwrap_or(false)
    }

    /// Resident keys, sorted
    pub fn keys(&self) -> Vec<RecordKey> {
        let mut keys: Vec<_> = self.inner.records.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.inner.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.records.lock().is_empty()
    }

    fn cached(&self, key: &RecordKey) -> Option<String> {
        self.inner.records.lock().get(key).map(|r| r.data.clone())
    }

    /// Insert a durable copy at version 0 unless a write got there first;
    /// returns whatever value is resident afterwards.
    fn seed(&self, key: &RecordKey, data: String) -> String {
        let mut records = self.inner.records.lock();
        records
            .entry(key.clone())
            .or_insert_with(|| Record::seeded(key.clone(), data))
            .data
            .clone()
    }

    fn spawn_flush(&self, key: RecordKey) {
        self.inner.active_flushes.send_modify(|count| *count += 1);
        tokio::spawn(run_flush(Arc::clone(&self.inner), key));
    }
}

/// Idle → Flushing. Returns true when the caller must start the worker.
fn claim_flush(record: &mut Record) -> bool {
    match record.state {
        FlushState::Flushing => false,
        FlushState::Idle => {
            record.state = FlushState::Flushing;
            true
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Flush worker
// ─────────────────────────────────────────────────────────────────────────────

/// Single consumer for one key: drains versions until the durable copy is
/// current or the retry policy gives up.
async fn run_flush(inner: Arc<CacheInner>, key: RecordKey) {
    let mut failures: u32 = 0;

    loop {
        let Some((data, version)) = inner.snapshot(&key) else {
            break;
        };

        match inner.writer.write(&key, &data).await {
            Ok(()) => {
                failures = 0;
                if inner.complete(&key, version) {
                    tracing::debug!("Flushed {} at version {}", key, version);
                    let _ = inner.events.send(FlushEvent::Persisted {
                        key: key.clone(),
                        version,
                    });
                    break;
                }
                tracing::debug!(
                    "{} changed during flush of version {}, flushing again",
                    key,
                    version
                );
            }
            Err(err) => {
                failures = failures.saturating_add(1);
                match inner.retry.next_delay(failures) {
                    Some(delay) => {
                        tracing::warn!(
                            "Flush of {} failed (attempt {}), retrying in {:?}: {}",
                            key,
                            failures,
                            delay,
                            err
                        );
                        let _ = inner.events.send(FlushEvent::Retrying {
                            key: key.clone(),
                            failures,
                            delay,
                            error: err.to_string(),
                        });
                        if delay.is_zero() {
                            tokio::task::yield_now().await;
                        } else {
                            tokio::time::sleep(delay).await;
                        }
                    }
                    None => {
                        let version = inner.abandon(&key);
                        tracing::warn!(
                            "Giving up flush of {} at version {:?} after {} failures: {}",
                            key,
                            version,
                            failures,
                            err
                        );
                        let _ = inner.events.send(FlushEvent::GaveUp {
                            key: key.clone(),
                            version: version.unwrap_or_default(),
                            failures,
                            error: err.to_string(),
                        });
                        break;
                    }
                }
            }
        }
    }

    inner
        .active_flushes
        .send_modify(|count| *count = count.saturating_sub(1));
}

impl CacheInner {
    fn snapshot(&self, key: &RecordKey) -> Option<(String, u64)> {
        self.records
            .lock()
            .get(key)
            .map(|r| (r.data.clone(), r.version))
    }

    /// Record a successful write of `version`. Flushing → Idle only if no newer
    /// version arrived meanwhile.
    fn complete(&self, key: &RecordKey, version: u64) -> bool {
        let mut records = self.records.lock();
        let Some(record) = records.get_mut(key) else {
            return true;
        };
        record.persisted_version = Some(version);
        if record.version == version {
            record.state = FlushState::Idle;
            true
        } else {
            false
        }
    }

    /// Flushing → Idle without persisting; the next write re-arms the flush.
    fn abandon(&self, key: &RecordKey) -> Option<u64> {
        let mut records = self.records.lock();
        let record = records.get_mut(key)?;
        record.state = FlushState::Idle;
        Some(record.version)
    }
}
