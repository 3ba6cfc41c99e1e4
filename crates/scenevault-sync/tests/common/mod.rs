//! Catalog doubles shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::get;
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use scenevault_core::{DurableWriter, MemoryDurableWriter, RecordKey, StoreError};
use scenevault_sync::{CatalogEntry, NewCatalogEntry, RemoteCatalogClient, Result, SyncError};

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

/// Memory store pre-filled with `(key, content)` pairs
pub fn store_with(records: &[(&str, &str)]) -> Arc<MemoryDurableWriter> {
    let store = Arc::new(MemoryDurableWriter::new());
    for (raw, content) in records {
        store.insert(key(raw), *content);
    }
    store
}

/// Memory store whose reads or writes fail for chosen keys
#[derive(Debug, Default)]
pub struct FaultyStore {
    inner: MemoryDurableWriter,
    failing_reads: Mutex<HashSet<RecordKey>>,
    failing_writes: Mutex<HashSet<RecordKey>>,
    pub writes: AtomicUsize,
}

impl FaultyStore {
    pub fn with(records: &[(&str, &str)]) -> Arc<Self> {
        let store = Self::default();
        for (raw, content) in records {
            store.inner.insert(key(raw), *content);
        }
        Arc::new(store)
    }

    pub fn fail_reads_of(&self, raw: &str) {
        self.failing_reads.lock().insert(key(raw));
    }

    pub fn fail_writes_of(&self, raw: &str) {
        self.failing_writes.lock().insert(key(raw));
    }

    pub fn get(&self, key: &RecordKey) -> Option<String> {
        self.inner.get(key)
    }

    fn injected(key: &RecordKey, op: &str) -> StoreError {
        StoreError::io(
            key,
            std::io::Error::new(std::io::ErrorKind::Other, format!("injected {} failure", op)),
        )
    }
}

#[async_trait]
impl DurableWriter for FaultyStore {
    async fn exists(&self, key: &RecordKey) -> scenevault_core::Result<bool> {
        self.inner.exists(key).await
    }

    async fn read(&self, key: &RecordKey) -> scenevault_core::Result<String> {
        if self.failing_reads.lock().contains(key) {
            return Err(Self::injected(key, "read"));
        }
        self.inner.read(key).await
    }

    async fn write(&self, key: &RecordKey, data: &str) -> scenevault_core::Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.failing_writes.lock().contains(key) {
            return Err(Self::injected(key, "write"));
        }
        self.inner.write(key, data).await
    }

    async fn list(&self, dir: &str) -> scenevault_core::Result<Vec<String>> {
        self.inner.list(dir).await
    }

    async fn modified(
        &self,
        key: &RecordKey,
    ) -> scenevault_core::Result<chrono::DateTime<chrono::Utc>> {
        self.inner.modified(key).await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// In-process fake
// ─────────────────────────────────────────────────────────────────────────────

/// [`RemoteCatalogClient`] keeping its catalog in memory
#[derive(Debug, Default)]
pub struct FakeCatalog {
    entries: Mutex<Vec<CatalogEntry>>,
    next_id: AtomicU64,
    failing_names: Mutex<HashSet<String>>,
    fail_list: AtomicBool,
    create_delay_ms: AtomicU64,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub creates: AtomicUsize,
    pub lists: AtomicUsize,
}

impl FakeCatalog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert(&self, remote_id: &str, name: &str) {
        self.entries.lock().push(CatalogEntry {
            remote_id: remote_id.to_string(),
            display_name: name.to_string(),
            data: Some("{}".to_string()),
            last_updated_at: None,
        });
    }

    /// Reject creates of entries called `name`
    pub fn fail_creates_of(&self, name: &str) {
        self.failing_names.lock().insert(name.to_string());
    }

    pub fn set_fail_list(&self, fail: bool) {
        self.fail_list.store(fail, Ordering::SeqCst);
    }

    pub fn set_create_delay(&self, delay: Duration) {
        self.create_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn entries(&self) -> Vec<CatalogEntry> {
        self.entries.lock().clone()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .entries
            .lock()
            .iter()
            .map(|entry| entry.display_name.clone())
            .collect();
        names.sort();
        names
    }
}

#[async_trait]
impl RemoteCatalogClient for FakeCatalog {
    async fn list(&self) -> Result<Vec<CatalogEntry>> {
        self.lists.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(SyncError::Remote {
                status: Some(503),
                message: "catalog unavailable".into(),
            });
        }
        Ok(self.entries())
    }

    async fn create(&self, entry: NewCatalogEntry) -> Result<CatalogEntry> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = self.create_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        } else {
            tokio::task::yield_now().await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing_names.lock().contains(&entry.name) {
            return Err(SyncError::Remote {
                status: Some(500),
                message: format!("cannot create {}", entry.name),
            });
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let created = CatalogEntry {
            remote_id: format!("r{}", id),
            display_name: entry.name,
            data: Some(entry.data),
            last_updated_at: Some(entry.last_updated_at),
        };
        self.entries.lock().push(created.clone());
        Ok(created)
    }

    async fn fetch_one(&self, remote_id: &str) -> Result<String> {
        self.entries
            .lock()
            .iter()
            .find(|entry| entry.remote_id == remote_id)
            .and_then(|entry| entry.data.clone())
            .ok_or_else(|| SyncError::Remote {
                status: Some(404),
                message: format!("no item {}", remote_id),
            })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// HTTP catalog server
// ─────────────────────────────────────────────────────────────────────────────

/// State of the in-process catalog API
#[derive(Debug)]
pub struct CatalogServer {
    pub addr: SocketAddr,
    pub items: Arc<Mutex<Vec<Value>>>,
    pub requests: Arc<AtomicUsize>,
}

impl CatalogServer {
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }
}

#[derive(Clone)]
struct ServerState {
    token: String,
    items: Arc<Mutex<Vec<Value>>>,
    requests: Arc<AtomicUsize>,
}

impl ServerState {
    fn authorize(&self, headers: &HeaderMap) -> std::result::Result<(), StatusCode> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let expected = format!("Bearer {}", self.token);
        match headers.get("authorization").and_then(|v| v.to_str().ok()) {
            Some(value) if value == expected => Ok(()),
            _ => Err(StatusCode::UNAUTHORIZED),
        }
    }
}

async fn list_items(
    State(state): State<ServerState>,
    headers: HeaderMap,
) -> std::result::Result<Json<Value>, StatusCode> {
    state.authorize(&headers)?;
    let items = state.items.lock().clone();
    Ok(Json(Value::Array(items)))
}

async fn create_item(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> std::result::Result<(StatusCode, Json<Value>), StatusCode> {
    state.authorize(&headers)?;
    let name = body["name"].as_str().ok_or(StatusCode::BAD_REQUEST)?;

    let mut items = state.items.lock();
    let id = items.len() as u64 + 100;
    let item = json!({
        "id": id,
        "name": name,
        "data": body["data"],
        "lastUpdatedAt": body["lastUpdatedAt"],
    });
    items.push(item.clone());
    Ok((StatusCode::CREATED, Json(item)))
}

async fn get_item(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> std::result::Result<Json<Value>, StatusCode> {
    state.authorize(&headers)?;
    let item = state
        .items
        .lock()
        .iter()
        .find(|item| match &item["id"] {
            Value::Number(n) => n.to_string() == id,
            Value::String(s) => *s == id,
            _ => false,
        })
        .cloned();
    item.map(Json).ok_or(StatusCode::NOT_FOUND)
}

/// Serve the catalog API on an ephemeral local port, accepting only `token`
pub async fn spawn_catalog_server(token: &str, items: Vec<Value>) -> CatalogServer {
    let state = ServerState {
        token: token.to_string(),
        items: Arc::new(Mutex::new(items)),
        requests: Arc::new(AtomicUsize::new(0)),
    };
    let server = CatalogServer {
        addr: "127.0.0.1:0".parse().expect("socket address"),
        items: Arc::clone(&state.items),
        requests: Arc::clone(&state.requests),
    };

    let router = Router::new()
        .route("/items", get(list_items).post(create_item))
        .route("/items/:id", get(get_item))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(server.addr)
        .await
        .expect("bind catalog server");
    let addr = listener.local_addr().expect("local address");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("catalog server");
    });

    CatalogServer { addr, ..server }
}
