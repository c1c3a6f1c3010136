//! metasync: a transactional metadata index kept in sync with an
//! S3-compatible object store.
//!
//! Clients upload bytes straight to the object store through signed URLs
//! and then ask the index to sync.  Reads and listings are served from the
//! index; deletions remove the record at once and retry the object-store
//! delete in the background.

use std::sync::Arc;

pub mod client;
pub mod config;
pub mod errors;
pub mod metadata;
pub mod metrics;
pub mod permissions;
pub mod retry;
pub mod server;
pub mod storage;
pub mod sync;

use crate::client::Client;
use crate::storage::memory::MemoryObjectStore;

/// Shared application state passed to all handlers via `axum::extract::State`.
pub struct AppState {
    /// Operation surface for the configured bucket.
    pub client: Arc<Client>,
    /// Set when the in-memory object store is the backend; its signed URLs
    /// are served by this process.
    pub memory: Option<Arc<MemoryObjectStore>>,
    /// Request body limit in bytes.
    pub max_body_bytes: usize,
}
