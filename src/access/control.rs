//! Whitelist and permission policy
//!
//! Failure policy is deliberately asymmetric:
//! - `is_user_allowed` fails open. An empty allow-list disables access
//!   control, and a storage error while reading the whitelist lets the user in.
//!   Deployments that need hard isolation must populate the whitelist.
//! - `is_user_admin` fails closed. A storage error means "not an admin".
//! - `check_repo_permission` fails closed on any tracker error.

use super::collaborator::{IssueTracker, RepoPermission};
use super::token::{Identity, TokenIssuer};
use crate::config::AppConfig;
use crate::storage::StorageManager;
use crate::Result;
use tracing::{debug, info, warn};

/// Session tokens plus the stored whitelist
#[derive(Debug, Clone)]
pub struct AccessControl {
    storage: StorageManager,
    tokens: TokenIssuer,
}

impl AccessControl {
    pub fn new(storage: StorageManager, tokens: TokenIssuer) -> Self {
        Self { storage, tokens }
    }

    pub fn from_config(config: &AppConfig, storage: StorageManager) -> Self {
        Self::new(storage, TokenIssuer::new(config.auth.secret_key.clone()))
    }

    pub fn storage(&self) -> &StorageManager {
        &self.storage
    }

    pub fn tokens(&self) -> &TokenIssuer {
        &self.tokens
    }

    pub fn issue_token(&self, identity: &Identity) -> Result<String> {
        self.tokens.issue_token(identity)
    }

    pub fn verify_token(&self, token: &str) -> Option<Identity> {
        self.tokens.verify_token(token)
    }

    /// Whether `username` may use the application (fails open)
    pub async fn is_user_allowed(&self, username: &str) -> bool {
        match self.storage.try_get_user_whitelist().await {
            Ok(whitelist) if whitelist.is_open() => true,
            Ok(whitelist) => {
                let allowed = whitelist.is_allowed(username);
                debug!(username, allowed, "Whitelist check");
                allowed
            }
            Err(e) => {
                warn!(username, "Whitelist unreadable, allowing user: {}", e);
                true
            }
        }
    }

    /// Whether `username` is an administrator (fails closed)
    pub async fn is_user_admin(&self, username: &str) -> bool {
        match self.storage.try_get_user_whitelist().await {
            Ok(whitelist) => whitelist.is_admin(username),
            Err(e) => {
                warn!(username, "Whitelist unreadable, denying admin: {}", e);
                false
            }
        }
    }

    /// Allow `username`, optionally as admin; a no-op if already present
    pub async fn add_user_to_whitelist(&self, username: &str, is_admin: bool) -> bool {
        let mut whitelist = match self.storage.try_get_user_whitelist().await {
            Ok(whitelist) => whitelist,
            Err(e) => {
                warn!(username, "Cannot update whitelist: {}", e);
                return false;
            }
        };

        if !whitelist.add(username, is_admin) {
            debug!(username, is_admin, "User already whitelisted");
            return true;
        }

        let saved = self.storage.save_user_whitelist(&whitelist).await;
        if saved {
            info!(username, is_admin, "User added to whitelist");
        }
        saved
    }

    /// Remove `username` from the allow-list and the admin list
    pub async fn remove_user_from_whitelist(&self, username: &str) -> bool {
        let mut whitelist = match self.storage.try_get_user_whitelist().await {
            Ok(whitelist) => whitelist,
            Err(e) => {
                warn!(username, "Cannot update whitelist: {}", e);
                return false;
            }
        };

        if !whitelist.remove(username) {
            debug!(username, "User not on whitelist");
            return true;
        }

        let saved = self.storage.save_user_whitelist(&whitelist).await;
        if saved {
            info!(username, "User removed from whitelist");
        }
        saved
    }

    /// Whether the tracker grants `identity` at least `level` on `full_name`
    pub async fn check_repo_permission(
        &self,
        tracker: &dyn IssueTracker,
        identity: &Identity,
        full_name: &str,
        level: RepoPermission,
    ) -> bool {
        match tracker.repo_permissions(full_name).await {
            Ok(permissions) => {
                let granted = permissions.allows(level);
                debug!(
                    username = %identity.username,
                    repo = full_name,
                    %level,
                    granted,
                    "Repository permission check"
                );
                granted
            }
            Err(e) => {
                warn!(
                    username = %identity.username,
                    repo = full_name,
                    %level,
                    "Permission lookup failed, denying: {}",
                    e
                );
                false
            }
        }
    }
}
