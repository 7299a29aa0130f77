//! Filesystem storage backend
//!
//! Stores each document as pretty-printed UTF-8 JSON:
//!
//! ```text
//! data/
//!   repos.json
//!   user_whitelist.json
//!   user_stats.json
//! ```
//!
//! The directory is created on first use. Each write goes to its own uniquely
//! named temporary file in the data directory, which is then renamed over the
//! target. Concurrent writers of one key never share a temporary file, so the
//! last rename wins and readers only ever see a complete document.

use super::backend::{BackendKind, StorageBackend};
use crate::{HubNoteError, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// One JSON file per key
#[derive(Debug, Clone)]
pub struct FileBackend {
    data_dir: PathBuf,
}

impl FileBackend {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Path of the file holding `key`
    fn document_path(&self, key: &str) -> PathBuf {
        self.data_dir.join(format!("{}.json", sanitize_key(key)))
    }

    fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.data_dir)?;
        Ok(())
    }
}

/// Keep keys inside the data directory
fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c => c,
        })
        .collect::<String>()
        .trim_start_matches('.')
        .to_string()
}

#[async_trait]
impl StorageBackend for FileBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::File
    }

    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let path = self.document_path(key);

        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let document = serde_json::from_str(&content).map_err(|e| {
            HubNoteError::Parse(format!("Invalid JSON in {}: {}", path.display(), e))
        })?;

        Ok(Some(document))
    }

    async fn put(&self, key: &str, document: &Value) -> Result<bool> {
        self.ensure_dir()?;

        let path = self.document_path(key);
        let content = serde_json::to_string_pretty(document)?;

        let mut file = NamedTempFile::new_in(&self.data_dir)?;
        file.write_all(content.as_bytes())?;
        file.as_file().sync_all()?;
        file.persist(&path).map_err(|e| e.error)?;

        tracing::debug!(key, path = %path.display(), "Wrote document file");
        Ok(true)
    }
}
