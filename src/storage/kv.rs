//! Remote key-value storage backend
//!
//! Talks to a REST key-value service:
//!
//! - `GET  {base}/get/{key}` returns `{"result": "<json string>" | null}`
//! - `POST {base}/set/{key}` with `{"value": "<json string>"}`
//!
//! Values are JSON documents encoded as strings. Requests carry a bearer token.

use super::backend::{BackendKind, StorageBackend};
use crate::{HubNoteError, Result};
use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Per-request timeout for reads and writes
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct GetResponse {
    #[serde(default)]
    result: Option<String>,
}

#[derive(Debug, Serialize)]
struct SetRequest {
    value: String,
}

/// REST key-value client
#[derive(Debug, Clone)]
pub struct KvBackend {
    client: Client,
    base_url: String,
    token: String,
}

impl KvBackend {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    fn url(&self, op: &str, key: &str) -> String {
        format!("{}/{}/{}", self.base_url, op, urlencoding::encode(key))
    }
}

#[async_trait]
impl StorageBackend for KvBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::KeyValue
    }

    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let response = self
            .client
            .get(self.url("get", key))
            .bearer_auth(&self.token)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .with_context(|| format!("Failed to read '{}' from key-value store", key))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(HubNoteError::Network(format!(
                "Key-value read of '{}' failed: HTTP {}",
                key, status
            )));
        }

        let body: GetResponse = response.json().await?;
        match body.result {
            Some(encoded) if !encoded.is_empty() => {
                let document = serde_json::from_str(&encoded).map_err(|e| {
                    HubNoteError::Parse(format!("Key-value value for '{}' is not JSON: {}", key, e))
                })?;
                Ok(Some(document))
            }
            _ => Ok(None),
        }
    }

    async fn put(&self, key: &str, document: &Value) -> Result<bool> {
        let payload = SetRequest {
            value: serde_json::to_string(document)?,
        };

        let response = self
            .client
            .post(self.url("set", key))
            .bearer_auth(&self.token)
            .timeout(REQUEST_TIMEOUT)
            .json(&payload)
            .send()
            .await
            .with_context(|| format!("Failed to write '{}' to key-value store", key))?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(key, %status, "Key-value write rejected");
        }
        Ok(status.is_success())
    }

    fn supports_ttl_documents(&self) -> bool {
        true
    }
}
