//! Normalized record keys
//!
//! Every record is addressed by a relative, `/`-separated path. Raw keys coming
//! from callers are normalized once, so `scenes\main.json`, `./scenes/main.json`
//! and `scenes//main.json` all name the same record.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::{Result, StoreError};

/// Unique normalized record identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RecordKey(String);

impl RecordKey {
    /// Normalize a raw key.
    ///
    /// Backslashes become `/`, empty and `.` segments are dropped. Keys that
    /// are empty after normalization or that climb out of the root with `..`
    /// are rejected.
    pub fn parse(raw: &str) -> Result<Self> {
        let normalized = normalize(raw)?;
        if normalized.is_empty() {
            return Err(StoreError::InvalidKey(raw.to_string()));
        }
        Ok(Self(normalized))
    }

    /// Key of `name` inside directory `dir` (`""` is the root)
    pub fn join(dir: &str, name: &str) -> Result<Self> {
        if dir.is_empty() {
            Self::parse(name)
        } else {
            Self::parse(&format!("{}/{}", dir, name))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last path segment
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// File name without its extension
    pub fn file_stem(&self) -> &str {
        let name = self.file_name();
        match name.rfind('.') {
            Some(0) | None => name,
            Some(idx) => &name[..idx],
        }
    }

    /// Location of this record below `root`
    pub fn to_path(&self, root: &Path) -> PathBuf {
        self.0.split('/').fold(root.to_path_buf(), |path, segment| path.join(segment))
    }
}

/// Normalize a directory path; unlike keys, the root (`""`) is allowed.
pub fn normalize_dir(raw: &str) -> Result<String> {
    normalize(raw)
}

fn normalize(raw: &str) -> Result<String> {
    let unified = raw.replace('\\', "/");
    let mut segments = Vec::new();
    for segment in unified.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return Err(StoreError::InvalidKey(raw.to_string())),
            other => segments.push(other),
        }
    }
    Ok(segments.join("/"))
}

impl std::fmt::Display for RecordKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RecordKey {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for RecordKey {
    type Error = StoreError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<RecordKey> for String {
    fn from(key: RecordKey) -> Self {
        key.0
    }
}

impl AsRef<str> for RecordKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
