//! HubNote configuration file handling
//!
//! Loads ~/.config/hubnote/config.yaml and layers environment variables on top,
//! so a deployment can run from the environment alone.

use crate::storage::blob::DEFAULT_BLOB_BASE_URL;
use crate::storage::BackendKind;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Session tokens are valid for 24 hours after issuance
pub const TOKEN_VALIDITY: Duration = Duration::from_secs(24 * 60 * 60);

/// Signing secret used when none is configured
pub const DEFAULT_SECRET_KEY: &str = "hubnote-dev-secret-key";

/// Storage backend selection and credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Requested backend
    #[serde(default)]
    pub backend: BackendKind,

    /// Directory for the file backend
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Key-value service base URL
    #[serde(default)]
    pub kv_url: Option<String>,

    /// Key-value service bearer token
    #[serde(default)]
    pub kv_token: Option<String>,

    /// Object store base URL
    #[serde(default = "default_blob_url")]
    pub blob_url: String,

    /// Object store read/write token
    #[serde(default)]
    pub blob_token: Option<String>,

    /// Development mode forces the file backend
    #[serde(default)]
    pub development: bool,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_blob_url() -> String {
    DEFAULT_BLOB_BASE_URL.to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Memory,
            data_dir: default_data_dir(),
            kv_url: None,
            kv_token: None,
            blob_url: default_blob_url(),
            blob_token: None,
            development: false,
        }
    }
}

/// Session token settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// HMAC secret for session tokens
    #[serde(default = "default_secret_key")]
    pub secret_key: String,
}

fn default_secret_key() -> String {
    DEFAULT_SECRET_KEY.to_string()
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            secret_key: default_secret_key(),
        }
    }
}

impl AuthConfig {
    pub fn token_validity(&self) -> Duration {
        TOKEN_VALIDITY
    }

    pub fn uses_default_secret(&self) -> bool {
        self.secret_key == DEFAULT_SECRET_KEY
    }
}

/// Remote issue tracker endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollaboratorConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
}

fn default_api_url() -> String {
    "https://api.github.com".to_string()
}

impl Default for CollaboratorConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
        }
    }
}

/// HubNote configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub collaborator: CollaboratorConfig,
}

impl AppConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overlaid with the process environment (and `.env`, if present)
    pub fn from_env() -> Self {
        if let Err(e) = dotenvy::dotenv() {
            tracing::debug!("No .env file loaded: {}", e);
        }
        let mut config = Self::new();
        config.apply_env(|name| std::env::var(name).ok());
        config
    }

    /// Load from `path` if it exists, otherwise start from defaults; then apply the environment
    pub fn load_or_env(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) if path.exists() => Self::load(path)?,
            _ => Self::new(),
        };
        if let Err(e) = dotenvy::dotenv() {
            tracing::debug!("No .env file loaded: {}", e);
        }
        config.apply_env(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Override fields from environment variables looked up through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(kind) = get("STORAGE_TYPE") {
            match kind.parse() {
                Ok(kind) => self.storage.backend = kind,
                Err(e) => tracing::warn!("Ignoring STORAGE_TYPE: {}", e),
            }
        }
        if let Some(dir) = get("DATA_DIR") {
            self.storage.data_dir = PathBuf::from(dir);
        }
        if let Some(url) = get("KV_REST_API_URL") {
            self.storage.kv_url = Some(url);
        }
        if let Some(token) = get("KV_REST_API_TOKEN") {
            self.storage.kv_token = Some(token);
        }
        if let Some(url) = get("BLOB_BASE_URL") {
            self.storage.blob_url = url;
        }
        if let Some(token) = get("BLOB_READ_WRITE_TOKEN") {
            self.storage.blob_token = Some(token);
        }

        let development = get("FLASK_ENV").as_deref() == Some("development")
            || get("APP_ENV").as_deref() == Some("development")
            || get("DEBUG").is_some_and(|v| v.eq_ignore_ascii_case("true"));
        if development {
            self.storage.development = true;
        }

        if let Some(secret) = get("SECRET_KEY") {
            self.auth.secret_key = secret;
        }
        if let Some(url) = get("GITHUB_API_URL") {
            self.collaborator.api_url = url;
        }
    }

    /// Load configuration from a specific path
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(crate::HubNoteError::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }

        tracing::info!(path = %path.display(), "Loading HubNote configuration");

        let content = fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;

        tracing::debug!(
            backend = %config.storage.backend,
            development = config.storage.development,
            "Configuration loaded successfully"
        );

        Ok(config)
    }

    /// Save configuration to a specific path
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        tracing::info!(path = %path.display(), "Saving HubNote configuration");

        let yaml = serde_yaml::to_string(self)?;
        fs::write(path, yaml)?;

        Ok(())
    }

    /// Get the default config path (~/.config/hubnote/config.yaml)
    pub fn default_path() -> PathBuf {
        let mut path = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push(".config");
        path.push("hubnote");
        path.push("config.yaml");
        path
    }
}
