//! Abstract metadata store trait.
//!
//! Any metadata backend must implement [`MetadataStore`].  The trait
//! uses manually desugared async methods (pinned boxed futures) so it can
//! be used as `Arc<dyn MetadataStore>` by both the SQLite and the
//! in-memory backends.
//!
//! Records are keyed by `(bucket, key)`.  Each record also has a scan
//! position assigned on first insert; scans walk a bucket in position
//! order, which is insertion order, not key order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

use super::cursor::{Cursor, Page};

/// Mirror of an object's attributes as last confirmed in the object store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataRecord {
    pub bucket: String,
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Base64-encoded SHA-256.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    pub last_modified: DateTime<Utc>,
    /// Unsigned URL of the object.
    pub link: String,
    /// When the record for this `(bucket, key)` was first written.
    pub created_at: DateTime<Utc>,
}

/// Result of [`MetadataStore::upsert`].
#[derive(Debug, Clone, PartialEq)]
pub struct Upserted {
    /// The record as stored.
    pub record: MetadataRecord,
    /// `true` if no record existed for this `(bucket, key)` before.
    pub created: bool,
}

/// Async metadata store contract.
pub trait MetadataStore: Send + Sync + 'static {
    /// Insert or fully replace the record for `(record.bucket, record.key)`.
    ///
    /// Replacing keeps the existing record's scan position and
    /// `created_at`; every other field comes from `record`.
    fn upsert(
        &self,
        record: MetadataRecord,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Upserted>> + Send + '_>>;

    /// Fetch the record for `(bucket, key)`.
    fn get(
        &self,
        bucket: &str,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<MetadataRecord>>> + Send + '_>>;

    /// Remove the record for `(bucket, key)`.  Returns whether one existed.
    fn delete(
        &self,
        bucket: &str,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>>;

    /// Read the next page of `bucket` after `cursor` (or from the start).
    ///
    /// `limit` is capped at `max_page_rows`; see
    /// [`super::cursor::build_page`] for how the page is shaped.
    fn scan(
        &self,
        bucket: &str,
        cursor: Option<Cursor>,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Page>> + Send + '_>>;

    /// Names of all buckets holding at least one record, sorted.
    fn buckets(&self) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<String>>> + Send + '_>>;

    /// Remove every record of `bucket`.  Returns the number removed.
    fn clear_bucket(
        &self,
        bucket: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<usize>> + Send + '_>>;
}
