//! Metadata export/import as JSON.
//!
//! The document is `{"version": 1, "exported_at": ..., "records": [...]}`
//! with records in scan order per bucket, buckets sorted by name.
//! Importing replays the records through [`MetadataStore::upsert`], so a
//! record already present keeps its scan position and creation time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::cursor::{Cursor, DEFAULT_MAX_PAGE_ROWS};
use super::store::{MetadataRecord, MetadataStore};

pub const EXPORT_VERSION: u32 = 1;

/// Serialized form of an export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportDocument {
    pub version: u32,
    pub exported_at: DateTime<Utc>,
    pub records: Vec<MetadataRecord>,
}

#[derive(Debug, Default)]
pub struct ImportOptions {
    /// Clear every bucket named in the document before importing.
    pub replace: bool,
}

#[derive(Debug, Default, PartialEq)]
pub struct ImportResult {
    pub imported: usize,
    pub skipped: usize,
    pub cleared: usize,
    pub warnings: Vec<String>,
}

/// Export all records of `bucket`, or of every bucket when `None`.
pub async fn export_metadata(
    store: &dyn MetadataStore,
    bucket: Option<&str>,
) -> anyhow::Result<ExportDocument> {
    let buckets = match bucket {
        Some(b) => vec![b.to_string()],
        None => store.buckets().await?,
    };

    let mut records = Vec::new();
    for bucket in &buckets {
        let mut cursor: Option<Cursor> = None;
        loop {
            let page = store.scan(bucket, cursor, DEFAULT_MAX_PAGE_ROWS).await?;
            records.extend(page.page);
            if page.is_done {
                break;
            }
            cursor = Some(Cursor::decode(&page.continue_cursor)?);
        }
    }
    info!(buckets = buckets.len(), records = records.len(), "metadata exported");

    Ok(ExportDocument {
        version: EXPORT_VERSION,
        exported_at: Utc::now(),
        records,
    })
}

/// Parse and import a JSON export document.
pub async fn import_metadata(
    store: &dyn MetadataStore,
    json: &str,
    opts: &ImportOptions,
) -> anyhow::Result<ImportResult> {
    let doc: ExportDocument = serde_json::from_str(json)?;
    if doc.version == 0 || doc.version > EXPORT_VERSION {
        anyhow::bail!("unsupported export version: {}", doc.version);
    }

    let mut result = ImportResult::default();

    if opts.replace {
        let mut buckets: Vec<&str> = doc.records.iter().map(|r| r.bucket.as_str()).collect();
        buckets.sort_unstable();
        buckets.dedup();
        for bucket in buckets {
            result.cleared += store.clear_bucket(bucket).await?;
        }
    }

    for record in doc.records {
        if record.bucket.is_empty() || record.key.is_empty() {
            result.skipped += 1;
            result
                .warnings
                .push(format!("skipped record with empty bucket or key: {:?}", record.key));
            continue;
        }
        store.upsert(record).await?;
        result.imported += 1;
    }

    if result.skipped > 0 {
        warn!(skipped = result.skipped, "some records were not imported");
    }
    info!(imported = result.imported, cleared = result.cleared, "metadata imported");
    Ok(result)
}
