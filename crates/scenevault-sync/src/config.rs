//! Sync configuration

use scenevault_core::config::is_toml;
use scenevault_core::StoreConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::{Result, SyncError};

/// Environment variable overriding [`StoreConfig::root`]
pub const ENV_ROOT: &str = "SCENEVAULT_ROOT";
/// Environment variable overriding [`RemoteSettings::base_url`]
pub const ENV_REMOTE_URL: &str = "SCENEVAULT_REMOTE_URL";
/// Environment variable overriding [`RemoteSettings::token`]
pub const ENV_TOKEN: &str = "SCENEVAULT_TOKEN";

/// Main sync configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Local record store
    pub store: StoreConfig,

    /// Remote catalog service
    pub remote: RemoteSettings,

    /// Startup reconciliation
    pub reconcile: ReconcileSettings,
}

impl SyncConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the catalog base URL
    pub fn with_remote_url(mut self, url: impl Into<String>) -> Self {
        self.remote.base_url = url.into();
        self
    }

    /// Set the bearer token
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.remote.token = Some(token.into());
        self
    }

    /// Set the store configuration
    pub fn with_store(mut self, store: StoreConfig) -> Self {
        self.store = store;
        self
    }

    /// Set the reconciliation settings
    pub fn with_reconcile(mut self, reconcile: ReconcileSettings) -> Self {
        self.reconcile = reconcile;
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.store.validate()?;
        if self.remote.base_url.trim().is_empty() {
            return Err(SyncError::InvalidConfig("remote.base_url must be set".into()));
        }
        if self.remote.timeout_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "remote.timeout_secs must be at least 1".into(),
            ));
        }
        if self.reconcile.max_concurrency == Some(0) {
            return Err(SyncError::InvalidConfig(
                "reconcile.max_concurrency must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Load configuration from a `.toml` or JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| scenevault_core::StoreError::io(path.display(), e))?;
        let config: Self = if is_toml(path) {
            toml::from_str(&content)?
        } else {
            serde_json::from_str(&content)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by the process environment (and a `.env` file, if any)
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        Self::default().with_overrides(|name| std::env::var(name).ok())
    }

    /// Apply `SCENEVAULT_*` overrides from `lookup`
    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(root) = lookup(ENV_ROOT) {
            self.store.root = root.into();
        }
        if let Some(url) = lookup(ENV_REMOTE_URL) {
            self.remote.base_url = url;
        }
        if let Some(token) = lookup(ENV_TOKEN).filter(|t| !t.is_empty()) {
            self.remote.token = Some(token);
        }
        self
    }
}

/// Remote catalog settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteSettings {
    /// Base URL; items live under `{base_url}/items`
    pub base_url: String,

    /// Bearer token sent with every request
    pub token: Option<String>,

    /// Per-request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_string(),
            token: None,
            timeout_secs: 30,
        }
    }
}

/// Which local records take part in reconciliation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileSettings {
    /// Directory (relative to the store root) holding the records
    pub dir: String,

    /// Required file extension, without the dot
    pub extension: Option<String>,

    /// Names starting with any of these are skipped
    pub excluded_prefixes: Vec<String>,

    /// Names ending with any of these are skipped (backups, temp files)
    pub excluded_suffixes: Vec<String>,

    /// Bound on concurrent reads and creates (`None` = unbounded)
    pub max_concurrency: Option<usize>,

    /// Write the assigned remote id back into each uploaded record
    pub stamp_remote_id: bool,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            dir: String::new(),
            extension: Some("json".to_string()),
            excluded_prefixes: vec![".".to_string()],
            excluded_suffixes: vec![".bak".to_string(), ".tmp".to_string(), "~".to_string()],
            max_concurrency: None,
            stamp_remote_id: true,
        }
    }
}

impl ReconcileSettings {
    /// Set the record directory
    pub fn with_dir(mut self, dir: impl Into<String>) -> Self {
        self.dir = dir.into();
        self
    }

    /// Bound the fan-out
    pub fn with_max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = Some(limit);
        self
    }

    /// Toggle writing remote ids back
    pub fn with_stamp_remote_id(mut self, stamp: bool) -> Self {
        self.stamp_remote_id = stamp;
        self
    }

    /// Whether a file called `name` is a reconciliation candidate
    pub fn is_candidate(&self, name: &str) -> bool {
        if self
            .excluded_prefixes
            .iter()
            .any(|p| !p.is_empty() && name.starts_with(p.as_str()))
        {
            return false;
        }
        if self
            .excluded_suffixes
            .iter()
            .any(|s| !s.is_empty() && name.ends_with(s.as_str()))
        {
            return false;
        }
        match &self.extension {
            Some(ext) => Path::new(name)
                .extension()
                .map(|e| e.eq_ignore_ascii_case(ext.as_str()))
                .unwrap_or(false),
            None => true,
        }
    }
}
