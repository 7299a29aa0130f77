//! Login flow
//!
//! Turns an issue-tracker API token into a session: the tracker vouches for
//! the user, the whitelist decides whether they get in, and the login is
//! counted before a session token is issued.

use super::collaborator::IssueTracker;
use super::control::AccessControl;
use super::token::Identity;
use crate::HubNoteError;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

/// Why a login was refused
#[derive(Debug, Error)]
pub enum LoginError {
    /// The tracker did not accept the API token
    #[error("Issue tracker rejected the credentials: {0}")]
    Tracker(#[source] HubNoteError),

    /// The user is authenticated but not on the whitelist
    #[error("User {0} is not authorized to use this application")]
    NotWhitelisted(String),

    /// Signing the session token failed
    #[error("Failed to issue session token: {0}")]
    Token(#[source] HubNoteError),
}

/// A successful login
#[derive(Debug, Clone, Serialize)]
pub struct LoginOutcome {
    pub token: String,
    pub identity: Identity,
    pub is_admin: bool,
}

impl AccessControl {
    /// Log in the holder of `tracker`'s API token
    pub async fn login(&self, tracker: &dyn IssueTracker) -> Result<LoginOutcome, LoginError> {
        let login = tracker.validate_identity().await.map_err(LoginError::Tracker)?;
        let user = tracker.current_user().await.map_err(LoginError::Tracker)?;
        if !user.login.eq_ignore_ascii_case(&login) {
            warn!(validated = %login, profile = %user.login, "Tracker returned mismatched identities");
        }

        if !self.is_user_allowed(&user.login).await {
            warn!(username = %user.login, "Login refused, user not whitelisted");
            return Err(LoginError::NotWhitelisted(user.login));
        }

        let mut identity = Identity::new(user.login);
        identity.avatar_url = user.avatar_url;

        if !self.storage().record_user_login(&identity.username).await {
            warn!(username = %identity.username, "Login statistics not recorded");
        }

        let token = self.issue_token(&identity).map_err(LoginError::Token)?;
        let is_admin = self.is_user_admin(&identity.username).await;
        info!(username = %identity.username, is_admin, "User logged in");

        Ok(LoginOutcome {
            token,
            identity,
            is_admin,
        })
    }
}
