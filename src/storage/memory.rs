//! In-memory storage backend
//!
//! Documents live for as long as the backend value does. Reads see writes
//! immediately.

use super::backend::{BackendKind, StorageBackend};
use crate::{HubNoteError, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::RwLock;

/// Process-local document map
#[derive(Debug, Default)]
pub struct MemoryBackend {
    documents: RwLock<HashMap<String, Value>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored documents
    pub fn len(&self) -> usize {
        self.documents.read().map(|d| d.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let documents = self
            .documents
            .read()
            .map_err(|e| HubNoteError::Storage(format!("memory store poisoned: {}", e)))?;
        Ok(documents.get(key).cloned())
    }

    async fn put(&self, key: &str, document: &Value) -> Result<bool> {
        let mut documents = self
            .documents
            .write()
            .map_err(|e| HubNoteError::Storage(format!("memory store poisoned: {}", e)))?;
        documents.insert(key.to_string(), document.clone());
        tracing::debug!(key, "Stored document in memory");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_missing_key_is_absent() {
        let backend = MemoryBackend::new();
        assert_eq!(backend.get("repos").await.unwrap(), None);
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let backend = MemoryBackend::new();
        let doc = json!({ "repositories": [{ "full_name": "a/a" }] });

        assert!(backend.put("repos", &doc).await.unwrap());
        assert_eq!(backend.get("repos").await.unwrap(), Some(doc));
        assert_eq!(backend.len(), 1);
    }

    #[tokio::test]
    async fn test_instances_are_isolated() {
        let first = MemoryBackend::new();
        let second = MemoryBackend::new();

        first.put("k", &json!(1)).await.unwrap();
        assert_eq!(second.get("k").await.unwrap(), None);
    }
}
