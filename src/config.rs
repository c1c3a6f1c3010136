//! Configuration loading and types for metasync.
//!
//! Configuration is read from a YAML file and deserialized into the
//! [`Config`] struct.  Each subsection governs a different part of the
//! system: networking, object store connection, metadata persistence,
//! deletion retries, logging, and observability.
//!
//! Object store connection fields fall back to the `R2_*` environment
//! variables when absent from the file.  [`StorageConfig::resolve`]
//! validates them eagerly and reports every missing field at once.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::errors::SyncError;
use crate::retry::BackoffPolicy;

/// Environment variable holding the bucket name.
pub const ENV_BUCKET: &str = "R2_BUCKET";
/// Environment variable holding the object store endpoint.
pub const ENV_ENDPOINT: &str = "R2_ENDPOINT";
/// Environment variable holding the access key ID.
pub const ENV_ACCESS_KEY_ID: &str = "R2_ACCESS_KEY_ID";
/// Environment variable holding the secret access key.
pub const ENV_SECRET_ACCESS_KEY: &str = "R2_SECRET_ACCESS_KEY";

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Object store connection settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Metadata store settings.
    #[serde(default)]
    pub metadata: MetadataConfig,

    /// Deletion retry settings.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Observability settings.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind host address.
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Graceful shutdown timeout in seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: u64,

    /// Deny uploads and deletes through the HTTP surface.
    #[serde(default)]
    pub read_only: bool,

    /// Maximum request body accepted by `/r2/send` and signed uploads.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            shutdown_timeout: default_shutdown_timeout(),
            read_only: false,
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

/// Object store connection configuration.
///
/// The four connection fields are optional here; they are resolved
/// against the environment by [`StorageConfig::resolve`].
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Backend type: `s3` or `memory`.
    #[serde(default = "default_storage_backend")]
    pub backend: String,

    /// Bucket holding the objects.
    #[serde(default)]
    pub bucket: Option<String>,

    /// S3-compatible endpoint URL.
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Access key ID.
    #[serde(default)]
    pub access_key_id: Option<String>,

    /// Secret access key.
    #[serde(default)]
    pub secret_access_key: Option<String>,

    /// Signing region. R2 accepts `auto`.
    #[serde(default = "default_region")]
    pub region: String,

    /// Force path-style URL addressing.
    #[serde(default = "default_true")]
    pub force_path_style: bool,

    /// Lifetime of signed URLs in seconds.
    #[serde(default = "default_url_ttl")]
    pub url_ttl_seconds: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            bucket: None,
            endpoint: None,
            access_key_id: None,
            secret_access_key: None,
            region: default_region(),
            force_path_style: true,
            url_ttl_seconds: default_url_ttl(),
        }
    }
}

/// Fully resolved object store connection record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub bucket: String,
    pub endpoint: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub region: String,
    pub force_path_style: bool,
}

impl StorageConfig {
    /// Resolve the connection record against the process environment.
    pub fn resolve(&self) -> Result<Connection, SyncError> {
        self.resolve_with(|name| std::env::var(name).ok())
    }

    /// Resolve the connection record using `env` as the environment lookup.
    ///
    /// Explicit values win over the environment.  Empty strings count as
    /// missing.  The error lists every missing field in declaration order.
    pub fn resolve_with<F>(&self, env: F) -> Result<Connection, SyncError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut missing = Vec::new();
        let mut pick = |field: &str, explicit: &Option<String>, var: &str| -> String {
            let value = explicit
                .clone()
                .filter(|v| !v.is_empty())
                .or_else(|| env(var).filter(|v| !v.is_empty()));
            match value {
                Some(v) => v,
                None => {
                    missing.push(format!("{field} ({var})"));
                    String::new()
                }
            }
        };

        let bucket = pick("bucket", &self.bucket, ENV_BUCKET);
        let endpoint = pick("endpoint", &self.endpoint, ENV_ENDPOINT);
        let access_key_id = pick("access_key_id", &self.access_key_id, ENV_ACCESS_KEY_ID);
        let secret_access_key = pick(
            "secret_access_key",
            &self.secret_access_key,
            ENV_SECRET_ACCESS_KEY,
        );

        if !missing.is_empty() {
            return Err(SyncError::Configuration { missing });
        }

        Ok(Connection {
            bucket,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            access_key_id,
            secret_access_key,
            region: self.region.clone(),
            force_path_style: self.force_path_style,
        })
    }

    /// Signed URL lifetime as a [`Duration`].
    pub fn url_ttl(&self) -> Duration {
        Duration::from_secs(self.url_ttl_seconds)
    }
}

/// Metadata store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetadataConfig {
    /// Backend type: `sqlite` or `memory`.
    #[serde(default = "default_metadata_engine")]
    pub engine: String,

    /// SQLite-specific configuration.
    #[serde(default)]
    pub sqlite: SqliteConfig,

    /// Upper bound on rows read by a single page.
    #[serde(default = "default_max_page_rows")]
    pub max_page_rows: usize,

    /// Page size used when a caller does not pass a limit.
    #[serde(default = "default_page_size")]
    pub default_page_size: usize,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            engine: default_metadata_engine(),
            sqlite: SqliteConfig::default(),
            max_page_rows: default_max_page_rows(),
            default_page_size: default_page_size(),
        }
    }
}

/// SQLite-specific metadata configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SqliteConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_metadata_path")]
    pub path: String,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: default_metadata_path(),
        }
    }
}

/// Backoff settings for physical object deletion.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Delay before the first retry, in milliseconds.
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Multiplier applied to the delay after every failure.
    #[serde(default = "default_backoff_base")]
    pub base: f64,

    /// Failures tolerated before the job is marked failed.
    #[serde(default = "default_max_failures")]
    pub max_failures: u32,

    /// Randomize each delay to spread retries out.
    #[serde(default = "default_true")]
    pub jitter: bool,

    /// Seconds a finished deletion job stays queryable before eviction.
    #[serde(default = "default_job_retention_seconds")]
    pub job_retention_seconds: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: default_initial_backoff_ms(),
            base: default_backoff_base(),
            max_failures: default_max_failures(),
            jitter: true,
            job_retention_seconds: default_job_retention_seconds(),
        }
    }
}

impl RetryConfig {
    /// Convert into the executor's policy type.
    pub fn policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            base: self.base,
            max_failures: self.max_failures,
            jitter: self.jitter,
        }
    }

    /// Retention of finished jobs as a [`Duration`].
    pub fn job_retention(&self) -> Duration {
        Duration::from_secs(self.job_retention_seconds)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: text or json.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Observability settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// Enable Prometheus metrics collection and the `/metrics` endpoint.
    #[serde(default = "default_true")]
    pub metrics: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self { metrics: true }
    }
}

// -- Defaults ----------------------------------------------------------------

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    9020
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_max_body_bytes() -> usize {
    100 * 1024 * 1024
}

fn default_storage_backend() -> String {
    "s3".to_string()
}

fn default_region() -> String {
    "auto".to_string()
}

fn default_url_ttl() -> u64 {
    900
}

fn default_metadata_engine() -> String {
    "sqlite".to_string()
}

fn default_metadata_path() -> String {
    "./data/metadata.db".to_string()
}

fn default_max_page_rows() -> usize {
    1000
}

fn default_page_size() -> usize {
    100
}

fn default_initial_backoff_ms() -> u64 {
    250
}

fn default_backoff_base() -> f64 {
    2.0
}

fn default_max_failures() -> u32 {
    4
}

fn default_job_retention_seconds() -> u64 {
    300
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

// -- Loader ------------------------------------------------------------------

/// Load and parse configuration from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    let config: Config = serde_yaml::from_str(&contents)?;
    Ok(config)
}
