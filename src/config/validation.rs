//! Configuration validation
//!
//! Works out which storage backend actually runs. A remote backend that is
//! missing credentials degrades to the memory backend with a warning instead of
//! failing startup.

use super::app_config::{AppConfig, StorageConfig};
use crate::storage::BackendKind;

/// Non-fatal configuration problem
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigWarning {
    pub field: String,
    pub message: String,
}

impl ConfigWarning {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn is_set(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.trim().is_empty())
}

/// Backend that will actually be constructed for `config`
pub fn resolve_backend(config: &StorageConfig) -> (BackendKind, Vec<ConfigWarning>) {
    let mut warnings = Vec::new();

    if config.development && config.backend != BackendKind::File {
        warnings.push(ConfigWarning::new(
            "storage.backend",
            format!(
                "development mode overrides '{}' with the file backend",
                config.backend
            ),
        ));
        return (BackendKind::File, warnings);
    }

    let resolved = match config.backend {
        BackendKind::KeyValue => {
            let mut missing = Vec::new();
            if !is_set(&config.kv_url) {
                missing.push("KV_REST_API_URL");
            }
            if !is_set(&config.kv_token) {
                missing.push("KV_REST_API_TOKEN");
            }
            if missing.is_empty() {
                BackendKind::KeyValue
            } else {
                warnings.push(ConfigWarning::new(
                    "storage.kv",
                    format!(
                        "missing {}; falling back to memory storage",
                        missing.join(", ")
                    ),
                ));
                BackendKind::Memory
            }
        }
        BackendKind::Blob => {
            if is_set(&config.blob_token) {
                BackendKind::Blob
            } else {
                warnings.push(ConfigWarning::new(
                    "storage.blob",
                    "missing BLOB_READ_WRITE_TOKEN; falling back to memory storage",
                ));
                BackendKind::Memory
            }
        }
        other => other,
    };

    (resolved, warnings)
}

/// All warnings for a full configuration
pub fn validate_config(config: &AppConfig) -> Vec<ConfigWarning> {
    let (backend, mut warnings) = resolve_backend(&config.storage);

    if config.auth.uses_default_secret() {
        warnings.push(ConfigWarning::new(
            "auth.secret_key",
            "SECRET_KEY is not set; session tokens use a well-known development secret",
        ));
    }

    if backend == BackendKind::Memory {
        warnings.push(ConfigWarning::new(
            "storage.backend",
            "memory storage is lost when the process exits",
        ));
    }

    warnings
}
