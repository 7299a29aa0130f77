//! Issue tracker collaborator
//!
//! Access control needs four things from the remote issue tracker, each asked
//! on behalf of the user whose API token the client holds: validate the token,
//! fetch the current user, fetch repository metadata, and report the user's
//! permissions on a repository. [`GitHubTracker`] answers them over the
//! GitHub REST API.

use crate::storage::RepositoryRecord;
use crate::{HubNoteError, Result};
use anyhow::Context;
use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Per-request timeout for tracker calls
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Uniform success/error envelope returned to HTTP clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiEnvelope<T> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiEnvelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }

    pub fn into_result(self) -> Result<T> {
        match (self.success, self.data) {
            (true, Some(data)) => Ok(data),
            (_, _) => Err(HubNoteError::Collaborator(
                self.error.unwrap_or_else(|| "empty response".to_string()),
            )),
        }
    }
}

/// Permission level on a repository
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepoPermission {
    Pull,
    Push,
    Admin,
}

impl fmt::Display for RepoPermission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepoPermission::Pull => write!(f, "pull"),
            RepoPermission::Push => write!(f, "push"),
            RepoPermission::Admin => write!(f, "admin"),
        }
    }
}

impl std::str::FromStr for RepoPermission {
    type Err = HubNoteError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "pull" | "read" => Ok(RepoPermission::Pull),
            "push" | "write" => Ok(RepoPermission::Push),
            "admin" => Ok(RepoPermission::Admin),
            other => Err(HubNoteError::Auth(format!("Unknown permission: {}", other))),
        }
    }
}

/// Capabilities the tracker reports for one user on one repository
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoPermissions {
    #[serde(default)]
    pub pull: bool,
    #[serde(default)]
    pub push: bool,
    #[serde(default)]
    pub admin: bool,
}

impl RepoPermissions {
    pub fn allows(&self, level: RepoPermission) -> bool {
        match level {
            RepoPermission::Pull => self.pull,
            RepoPermission::Push => self.push,
            RepoPermission::Admin => self.admin,
        }
    }
}

/// User profile from the tracker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerUser {
    pub login: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub html_url: Option<String>,
}

/// Operations access control needs from the remote issue tracker
#[async_trait]
pub trait IssueTracker: Send + Sync {
    /// Check the API token; returns the login it belongs to
    async fn validate_identity(&self) -> Result<String>;

    async fn current_user(&self) -> Result<TrackerUser>;

    /// Metadata for `owner/name`
    async fn repository(&self, full_name: &str) -> Result<RepositoryRecord>;

    /// The token holder's permissions on `owner/name`
    async fn repo_permissions(&self, full_name: &str) -> Result<RepoPermissions>;
}

/// Turn a repository URL or `owner/name` into `owner/name`
pub fn parse_repo_ref(input: &str) -> Result<String> {
    let trimmed = input.trim().trim_end_matches('/');
    let trimmed = trimmed.strip_suffix(".git").unwrap_or(trimmed);

    let path = if let Some(pos) = trimmed.find("github.com") {
        trimmed[pos + "github.com".len()..].trim_start_matches([':', '/'])
    } else {
        trimmed
    };

    let mut parts = path.split('/').filter(|p| !p.is_empty());
    match (parts.next(), parts.next()) {
        (Some(owner), Some(name)) => Ok(format!("{}/{}", owner, name)),
        _ => Err(HubNoteError::Parse(format!(
            "Invalid repository reference, expected owner/repo: {}",
            input
        ))),
    }
}

#[derive(Debug, Deserialize)]
struct GitHubOwner {
    login: String,
}

#[derive(Debug, Deserialize)]
struct GitHubRepo {
    full_name: String,
    name: String,
    owner: GitHubOwner,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    html_url: Option<String>,
    #[serde(default)]
    stargazers_count: u64,
    #[serde(default)]
    forks_count: u64,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    open_issues_count: u64,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    updated_at: Option<String>,
    #[serde(default)]
    permissions: Option<RepoPermissions>,
}

impl From<GitHubRepo> for RepositoryRecord {
    fn from(repo: GitHubRepo) -> Self {
        let mut record = RepositoryRecord::new(repo.full_name).with_owner(repo.owner.login);
        record.name = repo.name;
        record.description = repo.description;
        record.url = repo.html_url;
        record.stars = repo.stargazers_count;
        record.forks = repo.forks_count;
        record.language = repo.language;
        record.open_issues = repo.open_issues_count;
        record.created_at = repo.created_at;
        record.updated_at = repo.updated_at;
        record
    }
}

/// GitHub REST client acting for one token holder
#[derive(Clone)]
pub struct GitHubTracker {
    client: Client,
    api_url: String,
    token: String,
}

impl fmt::Debug for GitHubTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitHubTracker")
            .field("api_url", &self.api_url)
            .finish_non_exhaustive()
    }
}

impl GitHubTracker {
    pub fn new(api_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_url: api_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.api_url, path);

        let response = self
            .client
            .get(&url)
            .header(header::AUTHORIZATION, format!("Bearer {}", self.token))
            .header(header::USER_AGENT, "HubNote")
            .header(header::ACCEPT, "application/vnd.github+json")
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .with_context(|| format!("Failed to reach issue tracker at {}", url))?;

        let status = response.status();
        if !status.is_success() {
            let reason = match status {
                StatusCode::UNAUTHORIZED => "token is invalid or expired".to_string(),
                StatusCode::FORBIDDEN => "access denied or rate limited".to_string(),
                StatusCode::NOT_FOUND => "not found or not accessible".to_string(),
                _ => response.text().await.unwrap_or_default(),
            };
            return Err(HubNoteError::Collaborator(format!(
                "GET {} failed ({}): {}",
                path, status, reason
            )));
        }

        Ok(response.json().await?)
    }

    async fn fetch_repo(&self, full_name: &str) -> Result<GitHubRepo> {
        let full_name = parse_repo_ref(full_name)?;
        self.get_json(&format!("/repos/{}", full_name)).await
    }
}

#[async_trait]
impl IssueTracker for GitHubTracker {
    async fn validate_identity(&self) -> Result<String> {
        Ok(self.current_user().await?.login)
    }

    async fn current_user(&self) -> Result<TrackerUser> {
        self.get_json("/user").await
    }

    async fn repository(&self, full_name: &str) -> Result<RepositoryRecord> {
        Ok(self.fetch_repo(full_name).await?.into())
    }

    async fn repo_permissions(&self, full_name: &str) -> Result<RepoPermissions> {
        self.fetch_repo(full_name)
            .await?
            .permissions
            .ok_or_else(|| {
                HubNoteError::Collaborator(format!("No permissions reported for {}", full_name))
            })
    }
}
