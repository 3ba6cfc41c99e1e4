//! Store configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::retry::RetrySettings;
use crate::{Result, StoreError};

/// Default capacity of the flush event channel
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Configuration of the record store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding one file per record
    pub root: PathBuf,

    /// Write through a temp file and rename it into place
    pub atomic_writes: bool,

    /// Retry policy for failed flushes
    pub retry: RetrySettings,

    /// Buffered flush events per subscriber before lagging
    pub event_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("scenes"),
            atomic_writes: true,
            retry: RetrySettings::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl StoreConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the record directory
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    /// Toggle atomic writes
    pub fn with_atomic_writes(mut self, atomic: bool) -> Self {
        self.atomic_writes = atomic;
        self
    }

    /// Set the retry settings
    pub fn with_retry(mut self, retry: RetrySettings) -> Self {
        self.retry = retry;
        self
    }

    /// Reject settings the store cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.root.as_os_str().is_empty() {
            return Err(StoreError::InvalidConfig("root must not be empty".into()));
        }
        if self.event_capacity == 0 {
            return Err(StoreError::InvalidConfig(
                "event_capacity must be at least 1".into(),
            ));
        }
        if self.retry.max_delay_ms < self.retry.initial_delay_ms {
            return Err(StoreError::InvalidConfig(
                "retry.max_delay_ms must not be below retry.initial_delay_ms".into(),
            ));
        }
        Ok(())
    }

    /// Load configuration from a `.toml` or JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).map_err(|e| StoreError::io(path.display(), e))?;
        let config: Self = if is_toml(path) {
            toml::from_str(&content)?
        } else {
            serde_json::from_str(&content)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a JSON file
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| StoreError::io(path.display(), e))?;
        Ok(())
    }
}

/// Whether `path` should be parsed as TOML rather than JSON
pub fn is_toml(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false)
}
