//! Error types for HubNote
//!
//! Defines the error enum shared by the storage adapters, the storage manager
//! and access control. Uses thiserror for ergonomic error handling.

use thiserror::Error;

/// Result type alias for HubNote operations
pub type Result<T> = std::result::Result<T, HubNoteError>;

/// Comprehensive error type for HubNote operations
#[derive(Error, Debug)]
pub enum HubNoteError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Storage/backend errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Network/HTTP status errors
    #[error("Network error: {0}")]
    Network(String),

    /// Parsing errors (JSON documents, YAML config)
    #[error("Parse error: {0}")]
    Parse(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Authentication errors
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Document (de)serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Session token encoding/decoding errors
    #[error("Token error: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),

    /// Issue tracker (collaborator) errors
    #[error("Collaborator error: {0}")]
    Collaborator(String),

    /// Other errors
    #[error("{0}")]
    Other(String),

    /// Errors carrying request context from anyhow
    #[error("{0}")]
    Anyhow(#[from] anyhow::Error),
}
