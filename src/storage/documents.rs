//! Named documents stored by the backends
//!
//! Every backend is a flat map from key to JSON document. This module owns the
//! key naming scheme, the default document returned before the first write,
//! and typed views over the documents the rest of the crate reads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use tracing::warn;

/// Key of a named document
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DocumentKey {
    /// Repository catalogue (`repos`)
    Repos,
    /// Allowed and admin users (`user_whitelist`)
    UserWhitelist,
    /// Login statistics (`user_stats`)
    UserStats,
    /// Per-user preferences (`user_prefs_<id>`)
    UserPrefs(String),
    /// TTL cache entry (`cache_<key>`)
    Cache(String),
}

impl DocumentKey {
    /// Backend key for this document
    pub fn as_key(&self) -> String {
        match self {
            DocumentKey::Repos => "repos".to_string(),
            DocumentKey::UserWhitelist => "user_whitelist".to_string(),
            DocumentKey::UserStats => "user_stats".to_string(),
            DocumentKey::UserPrefs(id) => format!("user_prefs_{}", id),
            DocumentKey::Cache(key) => format!("cache_{}", key),
        }
    }

    /// Document returned when nothing has been written under this key yet
    pub fn default_document(&self) -> Value {
        match self {
            DocumentKey::Repos => json!({ "repositories": [] }),
            DocumentKey::UserWhitelist => json!({ "allowed_users": [], "admin_users": [] }),
            _ => Value::Object(Map::new()),
        }
    }
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_key())
    }
}

/// Read `null` as the field's default
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Parse catalogue entries one at a time, dropping the ones that don't fit
fn lenient_records<'de, D>(deserializer: D) -> Result<Vec<RepositoryRecord>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Vec<Value> = null_as_default(deserializer)?;
    Ok(raw
        .into_iter()
        .enumerate()
        .filter_map(|(index, entry)| match serde_json::from_value(entry) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(index, "Skipping unreadable repository record: {}", e);
                None
            }
        })
        .collect())
}

/// One registered repository
///
/// Metadata mirrored from the issue tracker is read-only here. Fields this
/// struct does not name are kept in `extra` so a read-modify-write cycle never
/// drops data written by other versions. `null` reads as the field default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryRecord {
    pub full_name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub owner: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub stars: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub forks: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub open_issues: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub added_at: Option<String>,
    /// User who registered the record; absent on legacy records
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub added_by: Option<String>,
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "std::ops::Not::not"
    )]
    pub is_default: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RepositoryRecord {
    /// Minimal record for `owner/name`
    pub fn new(full_name: impl Into<String>) -> Self {
        let full_name = full_name.into();
        let (owner, name) = match full_name.split_once('/') {
            Some((owner, name)) => (owner.to_string(), name.to_string()),
            None => (String::new(), full_name.clone()),
        };

        Self {
            full_name,
            name,
            owner,
            description: None,
            url: None,
            stars: 0,
            forks: 0,
            language: None,
            open_issues: 0,
            created_at: None,
            updated_at: None,
            added_at: None,
            added_by: None,
            is_default: false,
            extra: Map::new(),
        }
    }

    /// Set the registering user
    pub fn with_added_by(mut self, user: impl Into<String>) -> Self {
        self.added_by = Some(user.into());
        self
    }

    /// Override the owner login
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = owner.into();
        self
    }

    /// Whether `username` may see this record when they are not an admin.
    ///
    /// A non-empty `added_by` tag decides alone (exact match). Legacy records
    /// without the tag fall back to a case-insensitive owner match.
    pub fn is_visible_to(&self, username: &str) -> bool {
        match self.added_by.as_deref() {
            Some(added_by) if !added_by.is_empty() => added_by == username,
            _ => self.owner.to_lowercase() == username.to_lowercase(),
        }
    }
}

/// The `repos` document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReposDocument {
    /// Entries that fail to parse are skipped, not fatal
    #[serde(default, deserialize_with = "lenient_records")]
    pub repositories: Vec<RepositoryRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ReposDocument {
    pub fn contains(&self, full_name: &str) -> bool {
        self.repositories.iter().any(|r| r.full_name == full_name)
    }

    pub fn get(&self, full_name: &str) -> Option<&RepositoryRecord> {
        self.repositories.iter().find(|r| r.full_name == full_name)
    }

    /// Append a record unless its `full_name` is already present.
    ///
    /// Returns `false` and leaves the list untouched on a duplicate.
    pub fn insert(&mut self, record: RepositoryRecord) -> bool {
        if self.contains(&record.full_name) {
            return false;
        }
        self.repositories.push(record);
        true
    }

    /// Drop the record named `full_name`; returns whether one was removed
    pub fn remove(&mut self, full_name: &str) -> bool {
        let before = self.repositories.len();
        self.repositories.retain(|r| r.full_name != full_name);
        self.repositories.len() < before
    }

    /// Subset visible to a non-admin `username`
    pub fn visible_to(&self, username: &str) -> ReposDocument {
        let repositories: Vec<RepositoryRecord> = self
            .repositories
            .iter()
            .filter(|r| r.is_visible_to(username))
            .cloned()
            .collect();

        ReposDocument {
            total_count: Some(repositories.len()),
            repositories,
            last_updated: Some(self.last_updated.clone().unwrap_or_default()),
            extra: Map::new(),
        }
    }

    pub fn full_names(&self) -> Vec<&str> {
        self.repositories.iter().map(|r| r.full_name.as_str()).collect()
    }
}

/// The `user_whitelist` document
///
/// Empty `allowed_users` means access control is disabled. Admins are expected
/// to also be allowed users; nothing enforces it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Whitelist {
    #[serde(default, deserialize_with = "null_as_default")]
    pub allowed_users: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub admin_users: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn contains_ignore_case(users: &[String], username: &str) -> bool {
    let needle = username.to_lowercase();
    users.iter().any(|u| u.to_lowercase() == needle)
}

impl Whitelist {
    pub fn is_open(&self) -> bool {
        self.allowed_users.is_empty()
    }

    pub fn is_allowed(&self, username: &str) -> bool {
        contains_ignore_case(&self.allowed_users, username)
    }

    pub fn is_admin(&self, username: &str) -> bool {
        contains_ignore_case(&self.admin_users, username)
    }

    /// Add a user (and optionally grant admin); returns whether anything changed
    pub fn add(&mut self, username: &str, is_admin: bool) -> bool {
        let mut changed = false;
        if !self.is_allowed(username) {
            self.allowed_users.push(username.to_string());
            changed = true;
        }
        if is_admin && !self.is_admin(username) {
            self.admin_users.push(username.to_string());
            changed = true;
        }
        changed
    }

    /// Remove a user from both lists; returns whether anything changed
    pub fn remove(&mut self, username: &str) -> bool {
        let needle = username.to_lowercase();
        let before = self.allowed_users.len() + self.admin_users.len();
        self.allowed_users.retain(|u| u.to_lowercase() != needle);
        self.admin_users.retain(|u| u.to_lowercase() != needle);
        self.allowed_users.len() + self.admin_users.len() < before
    }
}

/// Per-user login counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoginRecord {
    #[serde(default)]
    pub login_count: u64,
    #[serde(default)]
    pub last_login: Option<String>,
    #[serde(default)]
    pub first_login: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DailyLogins {
    #[serde(default)]
    pub logins: u64,
}

/// The `user_stats` document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserStats {
    #[serde(default)]
    pub total_logins: u64,
    #[serde(default)]
    pub user_stats: BTreeMap<String, LoginRecord>,
    #[serde(default)]
    pub daily_stats: BTreeMap<String, DailyLogins>,
}

impl UserStats {
    /// Count one login for `username` at `now`
    pub fn record_login(&mut self, username: &str, now: DateTime<Utc>) {
        let timestamp = now.to_rfc3339();
        let today = now.format("%Y-%m-%d").to_string();

        let user = self.user_stats.entry(username.to_string()).or_default();
        user.login_count += 1;
        user.last_login = Some(timestamp.clone());
        if user.first_login.is_none() {
            user.first_login = Some(timestamp);
        }

        self.total_logins += 1;
        self.daily_stats.entry(today).or_default().logins += 1;
    }
}

/// A `cache_<key>` document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub data: Value,
    /// Unix epoch seconds
    pub expires_at: i64,
}

impl CacheEntry {
    /// Entry expiring `ttl_secs` after `now`; huge TTLs clamp to the far future
    pub fn new(data: Value, ttl_secs: u64, now: DateTime<Utc>) -> Self {
        let ttl = i64::try_from(ttl_secs).unwrap_or(i64::MAX);
        Self {
            data,
            expires_at: now.timestamp().saturating_add(ttl),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now.timestamp()
    }
}
