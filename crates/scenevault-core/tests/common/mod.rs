//! Instrumented durable writers shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use scenevault_core::{DurableWriter, MemoryDurableWriter, RecordKey, Result, StoreError};

pub fn key(raw: &str) -> RecordKey {
    RecordKey::parse(raw).expect("test keys are valid")
}

/// Route `tracing` output through the test harness; `RUST_LOG` selects levels
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Wraps a [`MemoryDurableWriter`] and records, delays or fails calls on demand
#[derive(Debug, Default)]
pub struct ScriptedWriter {
    pub store: MemoryDurableWriter,
    /// Fail this many upcoming writes
    fail_next: AtomicU32,
    /// Fail every write while set
    broken: AtomicBool,
    /// Fail every n-th write attempt (0 = never)
    fail_every: AtomicU32,
    /// Sleep inside every write
    write_delay_ms: AtomicU32,
    /// Keys whose durable read fails
    failing_reads: Mutex<HashSet<RecordKey>>,
    pub write_attempts: AtomicUsize,
    pub reads: AtomicUsize,
    in_flight: Mutex<HashMap<RecordKey, usize>>,
    pub max_in_flight: AtomicUsize,
    /// Payloads that reached the store, in order
    pub history: Mutex<Vec<(RecordKey, String)>>,
}

impl ScriptedWriter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_next(&self, count: u32) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    pub fn fail_reads_of(&self, key: RecordKey) {
        self.failing_reads.lock().insert(key);
    }

    pub fn set_broken(&self, broken: bool) {
        self.broken.store(broken, Ordering::SeqCst);
    }

    pub fn fail_every(&self, n: u32) {
        self.fail_every.store(n, Ordering::SeqCst);
    }

    pub fn set_write_delay(&self, delay: Duration) {
        self.write_delay_ms
            .store(delay.as_millis() as u32, Ordering::SeqCst);
    }

    pub fn stored(&self, key: &RecordKey) -> Option<String> {
        self.store.get(key)
    }

    pub fn history_for(&self, key: &RecordKey) -> Vec<String> {
        self.history
            .lock()
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
            .collect()
    }

    fn should_fail(&self, attempt: usize) -> bool {
        if self.broken.load(Ordering::SeqCst) {
            return true;
        }
        let every = self.fail_every.load(Ordering::SeqCst) as usize;
        if every > 0 && attempt % every == 0 {
            return true;
        }
        self.fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn enter(&self, key: &RecordKey) {
        let mut in_flight = self.in_flight.lock();
        let count = in_flight.entry(key.clone()).or_default();
        *count += 1;
        self.max_in_flight.fetch_max(*count, Ordering::SeqCst);
    }

    fn leave(&self, key: &RecordKey) {
        let mut in_flight = self.in_flight.lock();
        if let Some(count) = in_flight.get_mut(key) {
            *count -= 1;
        }
    }
}

#[async_trait]
impl DurableWriter for ScriptedWriter {
    async fn exists(&self, key: &RecordKey) -> Result<bool> {
        self.store.exists(key).await
    }

    async fn read(&self, key: &RecordKey) -> Result<String> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.failing_reads.lock().contains(key) {
            return Err(StoreError::io(
                key,
                std::io::Error::new(std::io::ErrorKind::InvalidData, "stream did not contain valid UTF-8"),
            ));
        }
        self.store.read(key).await
    }

    async fn write(&self, key: &RecordKey, data: &str) -> Result<()> {
        let attempt = self.write_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        self.enter(key);

        let delay = self.write_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay as u64)).await;
        } else {
            tokio::task::yield_now().await;
        }

        let result = if self.should_fail(attempt) {
            Err(StoreError::io(
                key,
                std::io::Error::new(std::io::ErrorKind::Other, "injected write failure"),
            ))
        } else {
            self.history.lock().push((key.clone(), data.to_string()));
            self.store.write(key, data).await
        };

        self.leave(key);
        result
    }

    async fn list(&self, dir: &str) -> Result<Vec<String>> {
        self.store.list(dir).await
    }

    async fn modified(&self, key: &RecordKey) -> Result<DateTime<Utc>> {
        self.store.modified(key).await
    }
}
