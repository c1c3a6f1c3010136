//! In-memory metadata store.
//!
//! Stores all metadata in memory with no persistence. Useful for testing
//! and ephemeral deployments. Uses `RwLock<HashMap>` for thread-safe access,
//! plus a `BTreeMap` ordered by `(bucket, position)` for scans.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::RwLock;

use super::cursor::{build_page, rows_to_fetch, Cursor, Page, DEFAULT_MAX_PAGE_ROWS};
use super::store::{MetadataRecord, MetadataStore, Upserted};

type RecordKey = (String, String);

#[derive(Debug, Default)]
struct Inner {
    records: HashMap<RecordKey, (u64, MetadataRecord)>,
    order: BTreeMap<(String, u64), String>,
    next_position: u64,
}

pub struct MemoryMetadataStore {
    inner: RwLock<Inner>,
    max_page_rows: usize,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            max_page_rows: DEFAULT_MAX_PAGE_ROWS,
        }
    }

    /// Cap the rows a single page may read.
    pub fn with_max_page_rows(mut self, max_page_rows: usize) -> Self {
        self.max_page_rows = max_page_rows.max(1);
        self
    }

    /// Number of records across all buckets.
    pub fn len(&self) -> usize {
        self.inner.read().expect("rwlock poisoned").records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryMetadataStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MetadataStore for MemoryMetadataStore {
    fn upsert(
        &self,
        record: MetadataRecord,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Upserted>> + Send + '_>> {
        Box::pin(async move {
            let mut inner = self.inner.write().expect("rwlock poisoned");
            let id = (record.bucket.clone(), record.key.clone());
            if let Some((_, existing)) = inner.records.get_mut(&id) {
                let record = MetadataRecord {
                    created_at: existing.created_at,
                    ..record
                };
                *existing = record.clone();
                return Ok(Upserted {
                    record,
                    created: false,
                });
            }
            inner.next_position += 1;
            let position = inner.next_position;
            inner
                .order
                .insert((record.bucket.clone(), position), record.key.clone());
            inner.records.insert(id, (position, record.clone()));
            Ok(Upserted {
                record,
                created: true,
            })
        })
    }

    fn get(
        &self,
        bucket: &str,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<MetadataRecord>>> + Send + '_>> {
        let id = (bucket.to_string(), key.to_string());
        Box::pin(async move {
            let inner = self.inner.read().expect("rwlock poisoned");
            Ok(inner.records.get(&id).map(|(_, r)| r.clone()))
        })
    }

    fn delete(
        &self,
        bucket: &str,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>> {
        let id = (bucket.to_string(), key.to_string());
        Box::pin(async move {
            let mut inner = self.inner.write().expect("rwlock poisoned");
            match inner.records.remove(&id) {
                Some((position, _)) => {
                    inner.order.remove(&(id.0, position));
                    Ok(true)
                }
                None => Ok(false),
            }
        })
    }

    fn scan(
        &self,
        bucket: &str,
        cursor: Option<Cursor>,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Page>> + Send + '_>> {
        let from = cursor.unwrap_or_else(|| Cursor::start(bucket));
        Box::pin(async move {
            let inner = self.inner.read().expect("rwlock poisoned");
            let fetch = rows_to_fetch(limit, self.max_page_rows);
            let lower = (from.bucket().to_string(), from.position().saturating_add(1));
            let rows = inner
                .order
                .range(lower..)
                .take_while(|((b, _), _)| b == from.bucket())
                .take(fetch)
                .filter_map(|((b, position), key)| {
                    inner
                        .records
                        .get(&(b.clone(), key.clone()))
                        .map(|(_, record)| (*position, record.clone()))
                })
                .collect();
            Ok(build_page(&from, rows, limit, self.max_page_rows))
        })
    }

    fn buckets(&self) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<String>>> + Send + '_>> {
        Box::pin(async move {
            let inner = self.inner.read().expect("rwlock poisoned");
            let mut buckets: Vec<String> = inner.order.keys().map(|(b, _)| b.clone()).collect();
            buckets.dedup();
            Ok(buckets)
        })
    }

    fn clear_bucket(
        &self,
        bucket: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<usize>> + Send + '_>> {
        let bucket = bucket.to_string();
        Box::pin(async move {
            let mut inner = self.inner.write().expect("rwlock poisoned");
            let before = inner.records.len();
            inner.records.retain(|(b, _), _| *b != bucket);
            inner.order.retain(|(b, _), _| *b != bucket);
            Ok(before - inner.records.len())
        })
    }
}
