//! Error types for catalog sync

use scenevault_core::StoreError;
use thiserror::Error;

/// Sync error type
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Network or HTTP failure talking to the catalog service
    #[error("Remote catalog error: {message}")]
    Remote {
        status: Option<u16>,
        message: String,
    },

    /// Local record content that cannot be interpreted
    #[error("Parse error in {key}: {message}")]
    Parse { key: String, message: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl SyncError {
    /// HTTP status of a remote failure, if the server answered
    pub fn status(&self) -> Option<u16> {
        match self {
            SyncError::Remote { status, .. } => *status,
            _ => None,
        }
    }

    pub fn remote(message: impl Into<String>) -> Self {
        SyncError::Remote {
            status: None,
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        SyncError::Remote {
            status: e.status().map(|s| s.as_u16()),
            message: e.to_string(),
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(e: toml::de::Error) -> Self {
        SyncError::Serialization(e.to_string())
    }
}

/// Result type for sync operations
pub type Result<T> = std::result::Result<T, SyncError>;
