//! Durable storage primitives
//!
//! [`DurableWriter`] is the only way the rest of the crate touches storage.
//! Two backends ship with the crate:
//!
//! - [`FsDurableWriter`]: one UTF-8 file per record below a root directory,
//!   optionally written through a hidden temp file and renamed into place
//! - [`MemoryDurableWriter`]: an in-process map, handy for embedding and tests
//!
//! Neither backend promises anything across an OS crash mid-write; the atomic
//! rename only narrows the window in which a reader can observe a torn file.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::key::{normalize_dir, RecordKey};
use crate::{Result, StoreError};

/// Prefix of the temp files written by [`FsDurableWriter`] in atomic mode
pub const TEMP_PREFIX: &str = ".";
/// Suffix of the temp files written by [`FsDurableWriter`] in atomic mode
pub const TEMP_SUFFIX: &str = ".tmp";

/// Filesystem-facing primitives used by the cache and the reconciler
#[async_trait]
pub trait DurableWriter: Send + Sync {
    /// Whether a record is stored for `key`
    async fn exists(&self, key: &RecordKey) -> Result<bool>;

    /// Stored payload; [`StoreError::NotFound`] when absent
    async fn read(&self, key: &RecordKey) -> Result<String>;

    /// Replace the stored payload
    async fn write(&self, key: &RecordKey, data: &str) -> Result<()>;

    /// Names of the records directly inside `dir` (`""` is the root), sorted.
    /// A directory that does not exist lists as empty.
    async fn list(&self, dir: &str) -> Result<Vec<String>>;

    /// Last modification time of a stored record
    async fn modified(&self, key: &RecordKey) -> Result<DateTime<Utc>>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Filesystem backend
// ─────────────────────────────────────────────────────────────────────────────

/// One file per record, named by its normalized key
#[derive(Debug, Clone)]
pub struct FsDurableWriter {
    root: PathBuf,
    atomic_writes: bool,
}

impl FsDurableWriter {
    /// Store records below `root`, writing through temp files
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            atomic_writes: true,
        }
    }

    /// Toggle temp-file-then-rename writes
    pub fn with_atomic_writes(mut self, atomic: bool) -> Self {
        self.atomic_writes = atomic;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn temp_path(&self, key: &RecordKey) -> PathBuf {
        let target = key.to_path(&self.root);
        let name = format!("{}{}{}", TEMP_PREFIX, key.file_name(), TEMP_SUFFIX);
        target.with_file_name(name)
    }
}

#[async_trait]
impl DurableWriter for FsDurableWriter {
    async fn exists(&self, key: &RecordKey) -> Result<bool> {
        let path = key.to_path(&self.root);
        match tokio::fs::metadata(&path).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::io(key, e)),
        }
    }

    async fn read(&self, key: &RecordKey) -> Result<String> {
        let path = key.to_path(&self.root);
        match tokio::fs::read_to_string(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StoreError::NotFound(key.clone())),
            Err(e) => Err(StoreError::io(key, e)),
        }
    }

    async fn write(&self, key: &RecordKey, data: &str) -> Result<()> {
        let path = key.to_path(&self.root);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::io(key, e))?;
        }

        if !self.atomic_writes {
            return tokio::fs::write(&path, data)
                .await
                .map_err(|e| StoreError::io(key, e));
        }

        let temp = self.temp_path(key);
        tokio::fs::write(&temp, data)
            .await
            .map_err(|e| StoreError::io(key, e))?;
        if let Err(e) = tokio::fs::rename(&temp, &path).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(StoreError::io(key, e));
        }
        Ok(())
    }

    async fn list(&self, dir: &str) -> Result<Vec<String>> {
        let dir = normalize_dir(dir)?;
        let path = if dir.is_empty() {
            self.root.clone()
        } else {
            dir.split('/').fold(self.root.clone(), |path, segment| path.join(segment))
        };

        let mut entries = match tokio::fs::read_dir(&path).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(&dir, e)),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::io(&dir, e))?
        {
            let file_type = entry.file_type().await.map_err(|e| StoreError::io(&dir, e))?;
            if !file_type.is_file() {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) => names.push(name),
                Err(raw) => tracing::debug!("Skipping non UTF-8 file name {:?}", raw),
            }
        }
        names.sort();
        Ok(names)
    }

    async fn modified(&self, key: &RecordKey) -> Result<DateTime<Utc>> {
        let path = key.to_path(&self.root);
        let meta = match tokio::fs::metadata(&path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StoreError::NotFound(key.clone()))
            }
            Err(e) => return Err(StoreError::io(key, e)),
        };
        let modified = meta.modified().map_err(|e| StoreError::io(key, e))?;
        Ok(DateTime::<Utc>::from(modified))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// In-memory backend
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct StoredRecord {
    data: String,
    modified: DateTime<Utc>,
}

/// In-process storage keyed by record key
#[derive(Debug, Default)]
pub struct MemoryDurableWriter {
    records: RwLock<BTreeMap<RecordKey, StoredRecord>>,
}

impl MemoryDurableWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a record without going through the async API
    pub fn insert(&self, key: RecordKey, data: impl Into<String>) {
        self.records.write().insert(
            key,
            StoredRecord {
                data: data.into(),
                modified: Utc::now(),
            },
        );
    }

    /// Current payload, if any
    pub fn get(&self, key: &RecordKey) -> Option<String> {
        self.records.read().get(key).map(|r| r.data.clone())
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl DurableWriter for MemoryDurableWriter {
    async fn exists(&self, key: &RecordKey) -> Result<bool> {
        Ok(self.records.read().contains_key(key))
    }

    async fn read(&self, key: &RecordKey) -> Result<String> {
        self.get(key).ok_or_else(|| StoreError::NotFound(key.clone()))
    }

    async fn write(&self, key: &RecordKey, data: &str) -> Result<()> {
        self.insert(key.clone(), data);
        Ok(())
    }

    async fn list(&self, dir: &str) -> Result<Vec<String>> {
        let dir = normalize_dir(dir)?;
        let records = self.records.read();
        let names = records
            .keys()
            .filter_map(|key| {
                let rest = if dir.is_empty() {
                    key.as_str()
                } else {
                    key.as_str().strip_prefix(dir.as_str())?.strip_prefix('/')?
                };
                (!rest.contains('/')).then(|| rest.to_string())
            })
            .collect();
        Ok(names)
    }

    async fn modified(&self, key: &RecordKey) -> Result<DateTime<Utc>> {
        self.records
            .read()
            .get(key)
            .map(|r| r.modified)
            .ok_or_else(|| StoreError::NotFound(key.clone()))
    }
}
