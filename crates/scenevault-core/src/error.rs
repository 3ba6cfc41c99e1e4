//! Error types for SceneVault Core
//!
//! This module defines the error types returned by the record store.
//! We use `thiserror` for ergonomic error definitions with automatic Display/Error implementations.

use thiserror::Error;

use crate::key::RecordKey;

/// Result type alias for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Main error type for store operations
#[derive(Error, Debug)]
pub enum StoreError {
    /// Durable read of a key that has no backing file
    #[error("Record not found: {0}")]
    NotFound(RecordKey),

    /// OS-level read/write failure (permissions, disk full, invalid UTF-8)
    #[error("IO error on {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    /// A raw key that cannot be normalized
    #[error("Invalid record key: {0}")]
    InvalidKey(String),

    /// Configuration that cannot be used as given
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Config (de)serialization failures
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Wrap an IO error with the key (or directory) it happened on
    pub fn io(key: impl std::fmt::Display, source: std::io::Error) -> Self {
        Self::Io {
            key: key.to_string(),
            source,
        }
    }

    /// True for the "no such record" case
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for StoreError {
    fn from(e: toml::de::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}
