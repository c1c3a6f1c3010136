//! SQLite-backed metadata store.
//!
//! Uses `rusqlite` with the `bundled` feature so no system SQLite
//! library is required.  All async trait methods are thin wrappers
//! around synchronous rusqlite calls executed under a `Mutex`.
//!
//! The `seq` column is an `AUTOINCREMENT` rowid, so scan positions are
//! never reused even after deletes.

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::cursor::{build_page, rows_to_fetch, Cursor, Page, DEFAULT_MAX_PAGE_ROWS};
use super::store::{MetadataRecord, MetadataStore, Upserted};

/// Current schema version. Bumped when migrations are added.
const SCHEMA_VERSION: i64 = 1;

const RECORD_COLUMNS: &str =
    "seq, bucket, key, content_type, size, sha256, last_modified, link, created_at";

/// Metadata store backed by a single SQLite database file.
pub struct SqliteMetadataStore {
    /// The database connection, guarded by a mutex for Send + Sync.
    conn: Mutex<Connection>,
    max_page_rows: usize,
}

impl SqliteMetadataStore {
    /// Open (or create) the database at `path` and initialize the schema.
    ///
    /// Passing `":memory:"` creates an in-memory database (useful for tests).
    pub fn new(path: &str) -> anyhow::Result<Self> {
        if path != ":memory:" {
            if let Some(parent) = std::path::Path::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
        }
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
            max_page_rows: DEFAULT_MAX_PAGE_ROWS,
        };
        store.apply_pragmas()?;
        store.init_db()?;
        Ok(store)
    }

    /// Cap the rows a single page may read.
    pub fn with_max_page_rows(mut self, max_page_rows: usize) -> Self {
        self.max_page_rows = max_page_rows.max(1);
        self
    }

    /// Apply recommended SQLite pragmas for performance and safety.
    fn apply_pragmas(&self) -> anyhow::Result<()> {
        let conn = self.conn.lock().expect("mutex poisoned");
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
            ",
        )?;
        Ok(())
    }

    /// Create the required tables and indexes if they do not already exist.
    /// This is idempotent -- safe to call on every startup.
    fn init_db(&self) -> anyhow::Result<()> {
        let conn = self.conn.lock().expect("mutex poisoned");
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS schema_version (
                version    INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS metadata (
                seq           INTEGER PRIMARY KEY AUTOINCREMENT,
                bucket        TEXT NOT NULL,
                key           TEXT NOT NULL,
                content_type  TEXT,
                size          INTEGER,
                sha256        TEXT,
                last_modified TEXT NOT NULL,
                link          TEXT NOT NULL,
                created_at    TEXT NOT NULL,
                UNIQUE (bucket, key)
            );

            CREATE INDEX IF NOT EXISTS idx_metadata_bucket_seq
                ON metadata(bucket, seq);
            ",
        )?;
        conn.execute(
            "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (?1, ?2)",
            params![SCHEMA_VERSION, format_timestamp(&Utc::now())],
        )?;
        Ok(())
    }
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(idx: usize, value: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

/// Map a row selected with [`RECORD_COLUMNS`].
fn map_record_row(row: &Row<'_>) -> rusqlite::Result<(u64, MetadataRecord)> {
    let seq: i64 = row.get(0)?;
    let size: Option<i64> = row.get(4)?;
    Ok((
        seq as u64,
        MetadataRecord {
            bucket: row.get(1)?,
            key: row.get(2)?,
            content_type: row.get(3)?,
            size: size.map(|s| s as u64),
            sha256: row.get(5)?,
            last_modified: parse_timestamp(6, row.get(6)?)?,
            link: row.get(7)?,
            created_at: parse_timestamp(8, row.get(8)?)?,
        },
    ))
}

fn select_record(
    conn: &Connection,
    bucket: &str,
    key: &str,
) -> rusqlite::Result<Option<MetadataRecord>> {
    conn.query_row(
        &format!("SELECT {RECORD_COLUMNS} FROM metadata WHERE bucket = ?1 AND key = ?2"),
        params![bucket, key],
        map_record_row,
    )
    .optional()
    .map(|row| row.map(|(_, record)| record))
}

impl MetadataStore for SqliteMetadataStore {
    fn upsert(
        &self,
        record: MetadataRecord,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Upserted>> + Send + '_>> {
        Box::pin(async move {
            let mut conn = self.conn.lock().expect("mutex poisoned");
            let tx = conn.transaction()?;
            let existed: bool = tx
                .query_row(
                    "SELECT 1 FROM metadata WHERE bucket = ?1 AND key = ?2",
                    params![record.bucket, record.key],
                    |_| Ok(()),
                )
                .optional()?
                .is_some();
            tx.execute(
                "INSERT INTO metadata
                    (bucket, key, content_type, size, sha256, last_modified, link, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT (bucket, key) DO UPDATE SET
                    content_type  = excluded.content_type,
                    size          = excluded.size,
                    sha256        = excluded.sha256,
                    last_modified = excluded.last_modified,
                    link          = excluded.link",
                params![
                    record.bucket,
                    record.key,
                    record.content_type,
                    record.size.map(|s| s as i64),
                    record.sha256,
                    format_timestamp(&record.last_modified),
                    record.link,
                    format_timestamp(&record.created_at),
                ],
            )?;
            let stored = select_record(&tx, &record.bucket, &record.key)?
                .ok_or_else(|| anyhow::anyhow!("record vanished during upsert"))?;
            tx.commit()?;
            Ok(Upserted {
                record: stored,
                created: !existed,
            })
        })
    }

    fn get(
        &self,
        bucket: &str,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<MetadataRecord>>> + Send + '_>> {
        let bucket = bucket.to_string();
        let key = key.to_string();
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            Ok(select_record(&conn, &bucket, &key)?)
        })
    }

    fn delete(
        &self,
        bucket: &str,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>> {
        let bucket = bucket.to_string();
        let key = key.to_string();
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            let removed = conn.execute(
                "DELETE FROM metadata WHERE bucket = ?1 AND key = ?2",
                params![bucket, key],
            )?;
            Ok(removed > 0)
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
            let conn = self.conn.lock().expect("mutex poisoned");
            let fetch = rows_to_fetch(limit, self.max_page_rows);
            let mut stmt = conn.prepare(&format!(
                "SELECT {RECORD_COLUMNS} FROM metadata
                 WHERE bucket = ?1 AND seq > ?2
                 ORDER BY seq ASC
                 LIMIT ?3"
            ))?;
            let rows = stmt
                .query_map(
                    params![from.bucket(), from.position() as i64, fetch as i64],
                    map_record_row,
                )?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(build_page(&from, rows, limit, self.max_page_rows))
        })
    }

    fn buckets(&self) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<String>>> + Send + '_>> {
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            let mut stmt = conn.prepare("SELECT DISTINCT bucket FROM metadata ORDER BY bucket")?;
            let buckets = stmt
                .query_map([], |row| row.get(0))?
                .collect::<Result<Vec<String>, _>>()?;
            Ok(buckets)
        })
    }

    fn clear_bucket(
        &self,
        bucket: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<usize>> + Send + '_>> {
        let bucket = bucket.to_string();
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            let removed = conn.execute("DELETE FROM metadata WHERE bucket = ?1", params![bucket])?;
            Ok(removed)
        })
    }
}

// ── Tests ───────────────────────────────────────────────────────────
