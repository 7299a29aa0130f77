//! Configuration system
//!
//! Loads ~/.config/hubnote/config.yaml (optional) and the process environment:
//! - Storage backend selection and remote credentials
//! - Session token signing secret
//! - Issue tracker API endpoint

mod app_config;
pub mod validation;

pub use app_config::{
    AppConfig, AuthConfig, CollaboratorConfig, StorageConfig, DEFAULT_SECRET_KEY, TOKEN_VALIDITY,
};
pub use validation::{resolve_backend, validate_config, ConfigWarning};
