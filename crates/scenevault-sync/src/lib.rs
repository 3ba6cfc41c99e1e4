//! SceneVault Sync - startup reconciliation against a remote catalog
//!
//! Uploads local scene records that the remote catalog does not know about
//! yet and wires the record cache, catalog client and reconciler into one
//! startup container.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                       SceneVault                        │
//! ├─────────────────────────────────────────────────────────┤
//! │  ┌─────────────────────┐      ┌──────────────────────┐  │
//! │  │ VersionedRecordCache│      │  CatalogReconciler   │  │
//! │  └──────────┬──────────┘      └───┬──────────────┬───┘  │
//! │             │                     │              │      │
//! │             └──────────┬──────────┘              │      │
//! │                        ▼                         ▼      │
//! │              ┌──────────────────┐  ┌──────────────────┐ │
//! │              │  DurableWriter   │  │ RemoteCatalog…   │ │
//! │              └──────────────────┘  └────────┬─────────┘ │
//! └─────────────────────────────────────────────┼───────────┘
//!                                               ▼ HTTP/JSON
//!                                        catalog service
//! ```
//!
//! # Features
//!
//! - **Additive sync**: creates remote entries, never deletes or updates them
//! - **Idempotent**: created ids are stamped into the local records
//! - **Fault isolation**: per-item failures are collected in the report
//! - **Bearer auth**: tokens come from a rotatable [`TokenSource`]

#![deny(unsafe_code)]
#![warn(rust_2018_idioms, missing_debug_implementations, clippy::all)]

pub mod config;
pub mod error;
pub mod reconcile;
pub mod remote;
pub mod vault;

pub use config::{ReconcileSettings, RemoteSettings, SyncConfig};
pub use error::{Result, SyncError};
pub use reconcile::{
    CatalogReconciler, CreatedEntry, FailureStage, LocalItem, ReconcileFailure, ReconcileReport,
};
pub use remote::{
    CatalogEntry, HttpCatalogClient, NewCatalogEntry, RemoteCatalogClient, SharedToken,
    TokenSource,
};
pub use vault::{SceneVault, StartupReport};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
