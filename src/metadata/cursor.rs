//! Resumable scan cursors and page shaping.
//!
//! A cursor is the bucket plus the scan position (the insertion sequence
//! number of the last record returned), encoded as URL-safe base64 JSON.
//! Callers treat it as opaque.  Because positions only grow, a cursor
//! stays valid however many records are inserted after it.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use super::store::MetadataRecord;
use crate::errors::SyncError;

/// Rows a single page may read unless configured otherwise.
pub const DEFAULT_MAX_PAGE_ROWS: usize = 1000;

/// A resumable position in a bucket-scoped scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    #[serde(rename = "b")]
    bucket: String,
    #[serde(rename = "p")]
    position: u64,
}

impl Cursor {
    pub fn new(bucket: impl Into<String>, position: u64) -> Self {
        Self {
            bucket: bucket.into(),
            position,
        }
    }

    /// Cursor positioned before the first record of `bucket`.
    pub fn start(bucket: impl Into<String>) -> Self {
        Self::new(bucket, 0)
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Sequence number of the last record already returned.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Opaque string form.
    pub fn encode(&self) -> String {
        // Serializing a two-field struct cannot fail.
        let json = serde_json::to_vec(self).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(json)
    }

    /// Parse a cursor produced by [`Cursor::encode`].
    pub fn decode(token: &str) -> Result<Self, SyncError> {
        let raw = URL_SAFE_NO_PAD
            .decode(token.trim())
            .map_err(|_| SyncError::invalid("malformed cursor"))?;
        serde_json::from_slice(&raw).map_err(|_| SyncError::invalid("malformed cursor"))
    }

    /// Parse a cursor and check that it belongs to `bucket`.
    pub fn decode_for(bucket: &str, token: &str) -> Result<Self, SyncError> {
        let cursor = Self::decode(token)?;
        if cursor.bucket != bucket {
            return Err(SyncError::invalid(format!(
                "cursor belongs to bucket {:?}, not {:?}",
                cursor.bucket, bucket
            )));
        }
        Ok(cursor)
    }
}

/// Why a page asks the caller to split its range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageStatus {
    /// The page is large; splitting at `split_cursor` is advised.
    SplitRecommended,
    /// The requested limit exceeds what one page may read; the page was
    /// cut short and the caller should continue in smaller steps.
    SplitRequired,
}

/// One page of a bucket scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub page: Vec<MetadataRecord>,
    pub is_done: bool,
    pub continue_cursor: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub split_cursor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub page_status: Option<PageStatus>,
}

/// Number of rows a store should fetch for a page request: the capped
/// limit plus one look-ahead row to detect the end of the scan.
pub fn rows_to_fetch(limit: usize, max_page_rows: usize) -> usize {
    effective_limit(limit, max_page_rows) + 1
}

fn effective_limit(limit: usize, max_page_rows: usize) -> usize {
    limit.clamp(1, max_page_rows.max(1))
}

/// Shape rows fetched by a store into a [`Page`].
///
/// `rows` are `(position, record)` pairs in scan order, all strictly after
/// `from`, and at most [`rows_to_fetch`] of them.
pub fn build_page(
    from: &Cursor,
    mut rows: Vec<(u64, MetadataRecord)>,
    limit: usize,
    max_page_rows: usize,
) -> Page {
    let take = effective_limit(limit, max_page_rows);
    let has_more = rows.len() > take;
    rows.truncate(take);

    let last = rows.last().map(|(pos, _)| *pos).unwrap_or(from.position);
    let continue_cursor = Cursor::new(from.bucket.clone(), last).encode();

    let page_status = if has_more && limit > max_page_rows {
        Some(PageStatus::SplitRequired)
    } else if rows.len() > max_page_rows / 2 {
        Some(PageStatus::SplitRecommended)
    } else {
        None
    };
    let split_cursor = match page_status {
        Some(_) if rows.len() >= 2 => {
            let (pos, _) = &rows[rows.len() / 2 - 1];
            Some(Cursor::new(from.bucket.clone(), *pos).encode())
        }
        _ => None,
    };

    Page {
        page: rows.into_iter().map(|(_, record)| record).collect(),
        is_done: !has_more,
        continue_cursor,
        split_cursor,
        page_status,
    }
}
