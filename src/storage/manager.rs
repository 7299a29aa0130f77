//! Storage manager
//!
//! Owns the one backend chosen at startup and exposes domain-shaped reads and
//! writes over the named documents.
//!
//! Every public operation is total: backend failures are logged and turned
//! into the document default (or `false` for writes). `try_*` variants return
//! the error instead, for callers that apply their own failure policy.
//!
//! There is no optimistic concurrency: two callers doing read-modify-write on
//! the same document race, and the last `save_*` wins the whole document.

use super::backend::{BackendKind, StorageBackend};
use super::blob::BlobBackend;
use super::documents::{
    CacheEntry, DocumentKey, ReposDocument, RepositoryRecord, UserStats, Whitelist,
};
use super::file::FileBackend;
use super::kv::KvBackend;
use super::memory::MemoryBackend;
use crate::config::{resolve_backend, StorageConfig};
use crate::{HubNoteError, Result};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Outcome of a catalogue mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepoMutation {
    Added,
    Removed,
    /// A record with the same `full_name` exists; nothing was written
    AlreadyExists,
    /// No record with that `full_name`; nothing was written
    NotFound,
    /// The catalogue could not be read, so it was not rewritten
    Unavailable,
    /// The backend rejected the write
    SaveFailed,
}

impl RepoMutation {
    pub fn is_success(&self) -> bool {
        matches!(self, RepoMutation::Added | RepoMutation::Removed)
    }

    pub fn message(&self) -> &'static str {
        match self {
            RepoMutation::Added => "Repository added",
            RepoMutation::Removed => "Repository removed",
            RepoMutation::AlreadyExists => "Repository already exists",
            RepoMutation::NotFound => "Repository not found",
            RepoMutation::Unavailable => "Repository list is unavailable",
            RepoMutation::SaveFailed => "Failed to save repository list",
        }
    }
}

/// Handle to the configured storage backend
///
/// Cheap to clone; clones share the backend.
#[derive(Clone)]
pub struct StorageManager {
    backend: Arc<dyn StorageBackend>,
}

impl std::fmt::Debug for StorageManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageManager")
            .field("backend", &self.backend.kind())
            .finish()
    }
}

impl StorageManager {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    /// Manager over a fresh memory backend
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    /// Build the backend selected by `config`
    ///
    /// Missing credentials for a remote backend degrade to memory storage.
    pub fn from_config(config: &StorageConfig) -> Self {
        let (kind, warnings) = resolve_backend(config);
        for warning in &warnings {
            warn!("{}", warning);
        }

        let backend: Arc<dyn StorageBackend> = match kind {
            BackendKind::Memory => Arc::new(MemoryBackend::new()),
            BackendKind::File => Arc::new(FileBackend::new(config.data_dir.clone())),
            BackendKind::KeyValue => Arc::new(KvBackend::new(
                config.kv_url.clone().unwrap_or_default(),
                config.kv_token.clone().unwrap_or_default(),
            )),
            BackendKind::Blob => Arc::new(BlobBackend::new(
                config.blob_url.clone(),
                config.blob_token.clone().unwrap_or_default(),
            )),
        };

        info!(
            requested = %config.backend,
            backend = %kind,
            "Storage backend selected"
        );
        Self::new(backend)
    }

    pub fn kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    // ------------------------------------------------------------------
    // Raw documents
    // ------------------------------------------------------------------

    /// Read a document, substituting its default when absent
    pub async fn read_document(&self, key: &DocumentKey, force_refresh: bool) -> Result<Value> {
        let raw_key = key.as_key();
        if force_refresh {
            self.backend.invalidate(&raw_key).await;
        }

        let document = self.backend.get(&raw_key).await?;
        debug!(key = %raw_key, found = document.is_some(), backend = %self.kind(), "Read document");
        Ok(document.unwrap_or_else(|| key.default_document()))
    }

    /// Write a document verbatim
    pub async fn write_document(&self, key: &DocumentKey, document: &Value) -> Result<bool> {
        let raw_key = key.as_key();
        let saved = self.backend.put(&raw_key, document).await?;
        if saved {
            debug!(key = %raw_key, backend = %self.kind(), "Wrote document");
        } else {
            warn!(key = %raw_key, backend = %self.kind(), "Backend rejected document write");
        }
        Ok(saved)
    }

    async fn read_typed<T: DeserializeOwned>(
        &self,
        key: &DocumentKey,
        force_refresh: bool,
    ) -> Result<T> {
        let document = self.read_document(key, force_refresh).await?;
        serde_json::from_value(document)
            .map_err(|e| HubNoteError::Parse(format!("Document '{}' is malformed: {}", key, e)))
    }

    async fn write_typed<T: Serialize>(&self, key: &DocumentKey, value: &T) -> Result<bool> {
        let document = serde_json::to_value(value)?;
        self.write_document(key, &document).await
    }

    /// Log a failed write and report `false`
    fn write_or_false(key: &DocumentKey, result: Result<bool>) -> bool {
        match result {
            Ok(saved) => saved,
            Err(e) => {
                warn!(key = %key, "Failed to save document: {}", e);
                false
            }
        }
    }

    // ------------------------------------------------------------------
    // Repository catalogue
    // ------------------------------------------------------------------

    pub async fn try_get_repos(&self, force_refresh: bool) -> Result<ReposDocument> {
        self.read_typed(&DocumentKey::Repos, force_refresh).await
    }

    /// The `repos` document; `force_refresh` bypasses any backend-local copy
    pub async fn get_repos(&self, force_refresh: bool) -> ReposDocument {
        match self.try_get_repos(force_refresh).await {
            Ok(repos) => repos,
            Err(e) => {
                warn!(force_refresh, "Failed to read repositories: {}", e);
                ReposDocument::default()
            }
        }
    }

    /// Replace the `repos` document
    pub async fn save_repos(&self, repos: &ReposDocument) -> bool {
        let key = DocumentKey::Repos;
        let saved = Self::write_or_false(&key, self.write_typed(&key, repos).await);
        if saved {
            info!(count = repos.repositories.len(), "Saved repositories");
        }
        saved
    }

    /// Repositories visible to `username`
    ///
    /// Admins get the whole catalogue. Everyone else gets the records they
    /// registered (`added_by`), plus legacy untagged records whose owner
    /// matches case-insensitively. Both paths read with a forced refresh.
    pub async fn get_user_repos(&self, username: &str, is_admin: bool) -> ReposDocument {
        let all = self.get_repos(true).await;
        debug!(
            username,
            is_admin,
            total = all.repositories.len(),
            "Filtering repositories for user"
        );

        if is_admin {
            return all;
        }

        let visible = all.visible_to(username);
        debug!(
            username,
            visible = ?visible.full_names(),
            "Repositories visible to user"
        );
        visible
    }

    /// Register a repository, tagging it with `added_by` and the current time
    pub async fn add_repository(
        &self,
        mut record: RepositoryRecord,
        added_by: Option<&str>,
    ) -> RepoMutation {
        let mut repos = match self.try_get_repos(false).await {
            Ok(repos) => repos,
            Err(e) => {
                warn!(full_name = %record.full_name, "Cannot add repository: {}", e);
                return RepoMutation::Unavailable;
            }
        };

        if repos.contains(&record.full_name) {
            debug!(full_name = %record.full_name, "Repository already registered");
            return RepoMutation::AlreadyExists;
        }

        record.added_at = Some(Utc::now().to_rfc3339());
        if let Some(user) = added_by {
            record.added_by = Some(user.to_string());
        }
        let full_name = record.full_name.clone();
        repos.insert(record);

        if self.save_repos(&repos).await {
            info!(full_name = %full_name, added_by = ?added_by, "Repository added");
            RepoMutation::Added
        } else {
            RepoMutation::SaveFailed
        }
    }

    /// Drop a repository from the catalogue
    pub async fn remove_repository(&self, full_name: &str) -> RepoMutation {
        let mut repos = match self.try_get_repos(false).await {
            Ok(repos) => repos,
            Err(e) => {
                warn!(full_name, "Cannot remove repository: {}", e);
                return RepoMutation::Unavailable;
            }
        };

        if !repos.remove(full_name) {
            return RepoMutation::NotFound;
        }

        if self.save_repos(&repos).await {
            info!(full_name, "Repository removed");
            RepoMutation::Removed
        } else {
            RepoMutation::SaveFailed
        }
    }

    // ------------------------------------------------------------------
    // Whitelist
    // ------------------------------------------------------------------

    pub async fn try_get_user_whitelist(&self) -> Result<Whitelist> {
        self.read_typed(&DocumentKey::UserWhitelist, false).await
    }

    pub async fn get_user_whitelist(&self) -> Whitelist {
        match self.try_get_user_whitelist().await {
            Ok(whitelist) => whitelist,
            Err(e) => {
                warn!("Failed to read user whitelist: {}", e);
                Whitelist::default()
            }
        }
    }

    pub async fn save_user_whitelist(&self, whitelist: &Whitelist) -> bool {
        let key = DocumentKey::UserWhitelist;
        Self::write_or_false(&key, self.write_typed(&key, whitelist).await)
    }

    // ------------------------------------------------------------------
    // Preferences and cache (key-value backend only)
    // ------------------------------------------------------------------

    /// Preferences for `user_id`; always empty on backends without TTL documents
    pub async fn get_user_preferences(&self, user_id: &str) -> Map<String, Value> {
        if !self.backend.supports_ttl_documents() {
            return Map::new();
        }

        let key = DocumentKey::UserPrefs(user_id.to_string());
        match self.read_typed::<Map<String, Value>>(&key, false).await {
            Ok(prefs) => prefs,
            Err(e) => {
                warn!(user_id, "Failed to read user preferences: {}", e);
                Map::new()
            }
        }
    }

    pub async fn save_user_preferences(&self, user_id: &str, prefs: &Map<String, Value>) -> bool {
        if !self.backend.supports_ttl_documents() {
            debug!(backend = %self.kind(), "User preferences are not persisted on this backend");
            return false;
        }

        let key = DocumentKey::UserPrefs(user_id.to_string());
        Self::write_or_false(&key, self.write_typed(&key, prefs).await)
    }

    /// Cached value for `key` if present and not yet expired
    pub async fn get_cache(&self, key: &str) -> Option<Value> {
        if !self.backend.supports_ttl_documents() {
            return None;
        }

        let doc_key = DocumentKey::Cache(key.to_string());
        let raw_key = doc_key.as_key();
        let document = match self.backend.get(&raw_key).await {
            Ok(Some(document)) => document,
            Ok(None) => return None,
            Err(e) => {
                warn!(key = %raw_key, "Failed to read cache entry: {}", e);
                return None;
            }
        };

        match serde_json::from_value::<CacheEntry>(document) {
            Ok(entry) if !entry.is_expired(Utc::now()) => Some(entry.data),
            Ok(_) => {
                debug!(key = %raw_key, "Cache entry expired");
                None
            }
            Err(e) => {
                warn!(key = %raw_key, "Malformed cache entry: {}", e);
                None
            }
        }
    }

    /// Store `data` under `key` for `ttl`
    pub async fn set_cache(&self, key: &str, data: Value, ttl: Duration) -> bool {
        if !self.backend.supports_ttl_documents() {
            return false;
        }

        let doc_key = DocumentKey::Cache(key.to_string());
        let entry = CacheEntry::new(data, ttl.as_secs(), Utc::now());
        Self::write_or_false(&doc_key, self.write_typed(&doc_key, &entry).await)
    }

    /// Expired entries are never enumerated: they are skipped on read and
    /// replaced on the next write. Reports whether the backend keeps a cache.
    pub async fn clear_expired_cache(&self) -> bool {
        self.backend.supports_ttl_documents()
    }

    // ------------------------------------------------------------------
    // Login statistics
    // ------------------------------------------------------------------

    pub async fn try_get_user_stats(&self) -> Result<UserStats> {
        self.read_typed(&DocumentKey::UserStats, false).await
    }

    pub async fn get_user_stats(&self) -> UserStats {
        match self.try_get_user_stats().await {
            Ok(stats) => stats,
            Err(e) => {
                warn!("Failed to read user stats: {}", e);
                UserStats::default()
            }
        }
    }

    pub async fn save_user_stats(&self, stats: &UserStats) -> bool {
        let key = DocumentKey::UserStats;
        Self::write_or_false(&key, self.write_typed(&key, stats).await)
    }

    /// Count a login for `username`
    pub async fn record_user_login(&self, username: &str) -> bool {
        let mut stats = match self.try_get_user_stats().await {
            Ok(stats) => stats,
            Err(e) => {
                warn!(username, "Cannot record login: {}", e);
                return false;
            }
        };

        stats.record_login(username, Utc::now());
        self.save_user_stats(&stats).await
    }
}
