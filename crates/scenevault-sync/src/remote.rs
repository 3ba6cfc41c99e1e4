//! Remote catalog client
//!
//! The catalog service is an external collaborator reached over HTTP/JSON:
//!
//! - `GET  {base}/items`       → `[{id, name, data?, lastUpdatedAt?}]`
//! - `POST {base}/items`       ← `{name, data, lastUpdatedAt}` → created item
//! - `GET  {base}/items/{id}`  → item, whose `data` is the payload
//!
//! Only listing, creation and single fetches are used; updates, deletes and
//! activation are not part of this client.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use crate::config::RemoteSettings;
use crate::{Result, SyncError};

/// An item of the remote catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    /// Server-assigned identifier (JSON string or number on the wire)
    #[serde(rename = "id", deserialize_with = "deserialize_remote_id")]
    pub remote_id: String,

    #[serde(rename = "name")]
    pub display_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated_at: Option<DateTime<Utc>>,
}

/// Body of a create request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCatalogEntry {
    pub name: String,
    pub data: String,
    pub last_updated_at: DateTime<Utc>,
}

/// Interpret a JSON value as a remote id: non-empty strings and numbers
pub fn remote_id_from_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn deserialize_remote_id<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    remote_id_from_value(&value)
        .ok_or_else(|| de::Error::custom(format!("invalid catalog id: {}", value)))
}

/// Operations the reconciler needs from the catalog service
#[async_trait]
pub trait RemoteCatalogClient: Send + Sync {
    /// The full catalog
    async fn list(&self) -> Result<Vec<CatalogEntry>>;

    /// Create an entry; the server assigns its id
    async fn create(&self, entry: NewCatalogEntry) -> Result<CatalogEntry>;

    /// Payload of one entry
    async fn fetch_one(&self, remote_id: &str) -> Result<String>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Bearer tokens
// ─────────────────────────────────────────────────────────────────────────────

/// Supplies the bearer token; authentication itself lives elsewhere
pub trait TokenSource: Send + Sync + Debug {
    fn bearer_token(&self) -> Option<String>;
}

/// Token holder the auth layer can rotate at runtime
#[derive(Debug, Default)]
pub struct SharedToken {
    token: RwLock<Option<String>>,
}

impl SharedToken {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: RwLock::new(token),
        }
    }

    /// Replace the current token
    pub fn set(&self, token: impl Into<String>) {
        *self.token.write() = Some(token.into());
    }

    /// Drop the current token; requests go out unauthenticated
    pub fn clear(&self) {
        *self.token.write() = None;
    }
}

impl TokenSource for SharedToken {
    fn bearer_token(&self) -> Option<String> {
        self.token.read().clone()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// HTTP client
// ─────────────────────────────────────────────────────────────────────────────

/// [`RemoteCatalogClient`] over HTTP/JSON
#[derive(Debug, Clone)]
pub struct HttpCatalogClient {
    items_url: reqwest::Url,
    tokens: Arc<dyn TokenSource>,
    http_client: reqwest::Client,
}

impl HttpCatalogClient {
    pub fn new(
        base_url: &str,
        tokens: Arc<dyn TokenSource>,
        timeout: Duration,
    ) -> Result<Self> {
        let items_url = reqwest::Url::parse(&format!("{}/items", base_url.trim_end_matches('/')))
            .map_err(|e| SyncError::InvalidConfig(format!("invalid catalog URL '{}': {}", base_url, e)))?;
        if items_url.cannot_be_a_base() {
            return Err(SyncError::InvalidConfig(format!(
                "catalog URL '{}' cannot hold paths",
                base_url
            )));
        }

        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::InvalidConfig(format!("HTTP client: {}", e)))?;

        Ok(Self {
            items_url,
            tokens,
            http_client,
        })
    }

    /// Client for the configured catalog with a fixed token
    pub fn from_settings(settings: &RemoteSettings) -> Result<Self> {
        Self::new(
            &settings.base_url,
            Arc::new(SharedToken::new(settings.token.clone())),
            Duration::from_secs(settings.timeout_secs),
        )
    }

    fn item_url(&self, remote_id: &str) -> reqwest::Url {
        let mut url = self.items_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.push(remote_id);
        }
        url
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.tokens.bearer_token() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let response = self
            .authorize(builder)
            .header("Accept", "application/json")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::Remote {
                status: Some(status.as_u16()),
                message: format!("catalog API error ({}): {}", status, body),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl RemoteCatalogClient for HttpCatalogClient {
    async fn list(&self) -> Result<Vec<CatalogEntry>> {
        let response = self.send(self.http_client.get(self.items_url.clone())).await?;
        let entries: Vec<CatalogEntry> = response.json().await?;
        tracing::debug!("Catalog lists {} entries", entries.len());
        Ok(entries)
    }

    async fn create(&self, entry: NewCatalogEntry) -> Result<CatalogEntry> {
        let response = self
            .send(self.http_client.post(self.items_url.clone()).json(&entry))
            .await?;
        let created: CatalogEntry = response.json().await?;
        tracing::debug!("Catalog created '{}' as {}", created.display_name, created.remote_id);
        Ok(created)
    }

    async fn fetch_one(&self, remote_id: &str) -> Result<String> {
        let response = self
            .send(self.http_client.get(self.item_url(remote_id)))
            .await?;
        let entry: CatalogEntry = response.json().await?;
        entry
            .data
            .ok_or_else(|| SyncError::remote(format!("catalog item {} has no data", remote_id)))
    }
}
