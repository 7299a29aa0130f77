//! Remote blob/object storage backend
//!
//! The object store only promises eventual consistency, so a read right after
//! a write may not find the object yet. Reads list the store, pick the object
//! named `<key>.json` and download it, retrying under [`RetryConfig`] until it
//! shows up or the attempt budget runs out. Exhausting the budget is reported
//! as an absent document, which callers turn into the document default.
//!
//! The backend keeps what it last saw per key, a document or a confirmed
//! absence, for a short window ([`DEFAULT_LOCAL_TTL`]). Plain reads inside the
//! window are served from that copy, which covers read-after-write while the
//! store catches up and bounds how long changes made by other processes stay
//! unseen. [`StorageBackend::invalidate`] expires the copy early (forced
//! refresh).
//!
//! A key last seen absent is re-read with a single attempt: the retry schedule
//! only pays off for objects known to exist.
//!
//! A read may block for the whole retry schedule (tens of seconds with the
//! default policy). Do not hold it inside a lock shared with other requests.

use super::backend::{BackendKind, StorageBackend};
use super::retry::{with_retry, RetryConfig, RetryableError};
use crate::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Default object store endpoint
pub const DEFAULT_BLOB_BASE_URL: &str = "https://blob.vercel-storage.com";

/// Per-request timeout for list, download and upload calls
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// How long a read or written document is served locally
pub const DEFAULT_LOCAL_TTL: Duration = Duration::from_secs(15);

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    blobs: Vec<BlobObject>,
}

#[derive(Debug, Clone, Deserialize)]
struct BlobObject {
    pathname: String,
    url: String,
}

/// Why a single read attempt came back empty-handed
#[derive(Debug, Error)]
enum BlobReadError {
    #[error("object {0} not visible yet")]
    Missing(String),

    #[error("list request failed: HTTP {0}")]
    ListStatus(u16),

    #[error("download failed: HTTP {0}")]
    DownloadStatus(u16),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

impl RetryableError for BlobReadError {
    fn is_retryable(&self) -> bool {
        // Every miss may be replication lag
        true
    }
}

/// What this process last saw under a key
#[derive(Debug, Clone)]
struct LocalCopy {
    /// `None` when the store did not have the object
    document: Option<Value>,
    expires_at: Instant,
}

impl LocalCopy {
    fn is_fresh(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

/// Eventually-consistent object store client
#[derive(Debug)]
pub struct BlobBackend {
    client: Client,
    base_url: String,
    token: String,
    retry: RetryConfig,
    local_ttl: Duration,
    local: RwLock<HashMap<String, LocalCopy>>,
}

impl BlobBackend {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self::with_retry_config(base_url, token, RetryConfig::for_blob_store())
    }

    pub fn with_retry_config(
        base_url: impl Into<String>,
        token: impl Into<String>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            retry,
            local_ttl: DEFAULT_LOCAL_TTL,
            local: RwLock::new(HashMap::new()),
        }
    }

    /// Serve local copies for `ttl` instead of [`DEFAULT_LOCAL_TTL`]
    pub fn with_local_ttl(mut self, ttl: Duration) -> Self {
        self.local_ttl = ttl;
        self
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    pub fn local_ttl(&self) -> Duration {
        self.local_ttl
    }

    /// Object name for `key`
    fn object_name(key: &str) -> String {
        format!("{}.json", key)
    }

    fn cached(&self, key: &str) -> Option<LocalCopy> {
        self.local.read().ok().and_then(|l| l.get(key).cloned())
    }

    fn remember(&self, key: &str, document: Option<&Value>) {
        let copy = LocalCopy {
            document: document.cloned(),
            expires_at: Instant::now() + self.local_ttl,
        };
        if let Ok(mut local) = self.local.write() {
            local.insert(key.to_string(), copy);
        }
    }

    fn expire(&self, key: &str) {
        if let Ok(mut local) = self.local.write() {
            if let Some(copy) = local.get_mut(key) {
                copy.expires_at = Instant::now();
            }
        }
    }

    fn forget(&self, key: &str) {
        if let Ok(mut local) = self.local.write() {
            local.remove(key);
        }
    }

    /// One list + download round trip
    async fn fetch_once(&self, key: &str) -> std::result::Result<Value, BlobReadError> {
        let target = Self::object_name(key);

        let response = self
            .client
            .get(format!("{}/", self.base_url))
            .bearer_auth(&self.token)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(BlobReadError::ListStatus(response.status().as_u16()));
        }

        let listing: ListResponse = response.json().await?;
        let object = listing
            .blobs
            .into_iter()
            .find(|b| b.pathname == target)
            .ok_or_else(|| BlobReadError::Missing(target.clone()))?;

        let download = self
            .client
            .get(&object.url)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        if !download.status().is_success() {
            return Err(BlobReadError::DownloadStatus(download.status().as_u16()));
        }

        Ok(download.json().await?)
    }
}

#[async_trait]
impl StorageBackend for BlobBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Blob
    }

    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let known_absent = match self.cached(key) {
            Some(copy) if copy.is_fresh() => {
                tracing::debug!(
                    key,
                    present = copy.document.is_some(),
                    "Serving blob document from local copy"
                );
                return Ok(copy.document);
            }
            Some(copy) => copy.document.is_none(),
            None => false,
        };

        let policy = if known_absent {
            RetryConfig {
                max_attempts: 1,
                ..self.retry.clone()
            }
        } else {
            self.retry.clone()
        };

        let operation = format!("blob read {}", key);
        match with_retry(&policy, &operation, || self.fetch_once(key)).await {
            Ok(document) => {
                self.remember(key, Some(&document));
                Ok(Some(document))
            }
            Err(e) => {
                tracing::warn!(
                    key,
                    attempts = policy.max_attempts,
                    "Blob read gave up: {}",
                    e
                );
                self.remember(key, None);
                Ok(None)
            }
        }
    }

    async fn put(&self, key: &str, document: &Value) -> Result<bool> {
        let body = serde_json::to_vec_pretty(document)?;
        let url = format!("{}/{}", self.base_url, Self::object_name(key));

        let response = match self
            .client
            .put(&url)
            .bearer_auth(&self.token)
            .header("Content-Type", "application/json")
            .timeout(REQUEST_TIMEOUT)
            .body(body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                self.forget(key);
                return Err(e.into());
            }
        };

        let status = response.status();
        if status.is_success() {
            tracing::info!(key, "Uploaded document to blob store");
            self.remember(key, Some(document));
            Ok(true)
        } else {
            tracing::warn!(key, %status, "Blob upload rejected");
            self.forget(key);
            Ok(false)
        }
    }

    async fn invalidate(&self, key: &str) {
        tracing::debug!(key, "Expiring local blob copy for forced refresh");
        self.expire(key);
    }
}
