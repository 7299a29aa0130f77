//! HubNote - persistence and access control for an issue-tracker front end
//!
//! HubNote keeps a handful of small JSON documents (the repository catalogue,
//! the user whitelist, login statistics, per-user preferences and a TTL cache)
//! on one of four interchangeable backends, and decides who may use the
//! application.
//!
//! # Architecture
//!
//! - **storage**: Backend adapters (memory, file, key-value, blob store) and
//!   the [`StorageManager`](storage::StorageManager) facade
//! - **access**: Session tokens, whitelist checks, HTTP guards and the issue
//!   tracker collaborator
//! - **config**: Environment and YAML configuration
//! - **logging**: tracing subscriber setup

pub mod access;
pub mod config;
pub mod error;
pub mod logging;
pub mod storage;

// Re-exports
pub use error::{HubNoteError, Result};
