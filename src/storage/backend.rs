//! Storage backend abstraction
//!
//! Defines the trait every storage medium implements: raw key to JSON
//! document reads and writes.

use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Which storage medium is in use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Process-local map
    #[default]
    Memory,
    /// One JSON file per key under a data directory
    File,
    /// Remote key-value REST service
    #[serde(alias = "vercel_kv")]
    KeyValue,
    /// Remote eventually-consistent object store
    #[serde(alias = "vercel_blob")]
    Blob,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Memory => "memory",
            BackendKind::File => "file",
            BackendKind::KeyValue => "key_value",
            BackendKind::Blob => "blob",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = crate::HubNoteError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "memory" => Ok(BackendKind::Memory),
            "file" => Ok(BackendKind::File),
            "kv" | "key_value" | "vercel_kv" => Ok(BackendKind::KeyValue),
            "blob" | "vercel_blob" => Ok(BackendKind::Blob),
            other => Err(crate::HubNoteError::Config(format!(
                "Unknown storage type: {}",
                other
            ))),
        }
    }
}

/// Trait for document storage backends
///
/// `get` reports a missing key as `Ok(None)`; only transport or decoding
/// failures are errors. `put` reports a rejected write as `Ok(false)`.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Which medium this is
    fn kind(&self) -> BackendKind;

    /// Read the document stored under `key`
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Create or replace the document stored under `key`
    async fn put(&self, key: &str, document: &Value) -> Result<bool>;

    /// Drop any locally cached copy of `key` so the next read hits the medium
    async fn invalidate(&self, _key: &str) {}

    /// Whether the medium supports per-user preferences and TTL cache entries
    fn supports_ttl_documents(&self) -> bool {
        false
    }
}
