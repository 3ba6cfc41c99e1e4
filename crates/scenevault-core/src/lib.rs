//! SceneVault Core - versioned write-behind storage for scene and configuration files
//!
//! Callers read and write named UTF-8 records as if storage were synchronous
//! and atomic. The cache is authoritative; persistence happens on background
//! flush workers, at most one per key.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │               VersionedRecordCache                  │
//! ├─────────────────────────────────────────────────────┤
//! │  records: key → {data, version, state}              │
//! │  flush workers (one per Flushing key)               │
//! │  RetryPolicy (ImmediateRetry | ExponentialBackoff)  │
//! └──────────────────────────┬──────────────────────────┘
//!                            ↓ exists / read / write / list
//! ┌─────────────────────────────────────────────────────┐
//! │   DurableWriter (FsDurableWriter | MemoryDurable…)  │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use scenevault_core::{ExponentialBackoff, FsDurableWriter, RecordKey, VersionedRecordCache};
//!
//! # async fn example() -> scenevault_core::Result<()> {
//! let cache = VersionedRecordCache::new(
//!     Arc::new(FsDurableWriter::new("scenes")),
//!     Arc::new(ExponentialBackoff::default()),
//! );
//!
//! let key = RecordKey::parse("collections/live.json")?;
//! cache.register_files(vec![key.clone()]).await;
//! cache.write(key.clone(), r#"{"name":"Live"}"#);
//! assert_eq!(cache.read(&key).await?, r#"{"name":"Live"}"#);
//! cache.flushed().await;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(rust_2018_idioms, missing_debug_implementations, clippy::all)]

pub mod cache;
pub mod config;
pub mod durable;
pub mod error;
pub mod key;
pub mod retry;

pub use cache::{FlushEvent, FlushState, Record, Registration, VersionedRecordCache};
pub use config::StoreConfig;
pub use durable::{DurableWriter, FsDurableWriter, MemoryDurableWriter};
pub use error::{Result, StoreError};
pub use key::RecordKey;
pub use retry::{ExponentialBackoff, ImmediateRetry, RetryPolicy, RetrySettings, RetryStrategy};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
