//! Storage layer
//!
//! Named JSON documents over one of four backends (memory, local files, a
//! remote key-value service, a remote eventually-consistent object store),
//! fronted by [`StorageManager`].

mod backend;
pub mod blob;
mod documents;
mod file;
mod kv;
mod manager;
mod memory;
pub mod retry;

pub use backend::{BackendKind, StorageBackend};
pub use blob::BlobBackend;
pub use documents::{
    CacheEntry, DailyLogins, DocumentKey, LoginRecord, ReposDocument, RepositoryRecord,
    UserStats, Whitelist,
};
pub use file::FileBackend;
pub use kv::KvBackend;
pub use manager::{RepoMutation, StorageManager};
pub use memory::MemoryBackend;
pub use retry::RetryConfig;
