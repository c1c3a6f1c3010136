//! metasync server.
//!
//! Every startup is a recovery: the metadata index is durable and the
//! in-process deletion queue is rebuilt empty.  SIGTERM/SIGINT stop
//! accepting connections and wait up to `server.shutdown_timeout` for
//! in-flight requests.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};

use metasync::client::Client;
use metasync::config::Config;
use metasync::metadata::memory::MemoryMetadataStore;
use metasync::metadata::sqlite::SqliteMetadataStore;
use metasync::metadata::store::MetadataStore;
use metasync::permissions::ReadOnly;
use metasync::retry::inprocess::InProcessExecutor;
use metasync::storage::backend::ObjectStore;
use metasync::storage::memory::MemoryObjectStore;
use metasync::storage::s3::S3ObjectStore;

/// Command-line arguments for the metasync server.
#[derive(Parser, Debug)]
#[command(
    name = "metasync",
    version,
    about = "Metadata index kept in sync with an S3-compatible object store"
)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "metasync.example.yaml")]
    config: String,

    /// Override the bind address (host:port).
    #[arg(short, long)]
    bind: Option<String>,
}

fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if config.logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = metasync::config::load_config(&cli.config)?;
    init_tracing(&config);
    info!("Loaded configuration from {}", cli.config);

    let bind_addr = cli
        .bind
        .unwrap_or_else(|| format!("{}:{}", config.server.host, config.server.port));

    if config.observability.metrics {
        metasync::metrics::init_metrics();
        metasync::metrics::describe_metrics();
        info!("Prometheus metrics initialized");
    }

    let metadata: Arc<dyn MetadataStore> = match config.metadata.engine.as_str() {
        "memory" => {
            warn!("Memory metadata store: the index is lost on restart");
            Arc::new(
                MemoryMetadataStore::new().with_max_page_rows(config.metadata.max_page_rows),
            )
        }
        "sqlite" => {
            let path = &config.metadata.sqlite.path;
            let store = SqliteMetadataStore::new(path)?
                .with_max_page_rows(config.metadata.max_page_rows);
            info!("SQLite metadata store initialized at {}", path);
            Arc::new(store)
        }
        other => anyhow::bail!("unknown metadata engine: {other}"),
    };

    let (bucket, objects, memory): (String, Arc<dyn ObjectStore>, _) =
        match config.storage.backend.as_str() {
            "memory" => {
                let bucket = config
                    .storage
                    .bucket
                    .clone()
                    .unwrap_or_else(|| "local".to_string());
                let endpoint = config
                    .storage
                    .endpoint
                    .clone()
                    .unwrap_or_else(|| format!("http://{bind_addr}"));
                let store = Arc::new(MemoryObjectStore::new(&endpoint));
                info!(
                    "Memory object store initialized: bucket={} endpoint={}",
                    bucket, endpoint
                );
                (bucket, store.clone() as Arc<dyn ObjectStore>, Some(store))
            }
            "s3" => {
                let connection = config.storage.resolve()?;
                info!(
                    "S3 object store configured: bucket={} endpoint={} region={}",
                    connection.bucket, connection.endpoint, connection.region
                );
                let bucket = connection.bucket.clone();
                let store: Arc<dyn ObjectStore> = Arc::new(S3ObjectStore::new(connection));
                (bucket, store, None)
            }
            other => anyhow::bail!("unknown storage backend: {other}"),
        };

    let mut builder = Client::builder(bucket, objects, metadata)
        .executor(Arc::new(
            InProcessExecutor::new().with_retention(config.retry.job_retention()),
        ))
        .retry_policy(config.retry.policy())
        .url_ttl(config.storage.url_ttl())
        .default_page_size(config.metadata.default_page_size)
        .on_deletion_complete(|report| {
            info!(
                bucket = %report.bucket,
                key = %report.key,
                job_id = %report.job_id,
                outcome = ?report.outcome,
                "deletion finished"
            );
        });
    if config.server.read_only {
        info!("Read-only mode: uploads and deletes are denied");
        builder = builder.permissions(Arc::new(ReadOnly));
    }

    let state = Arc::new(metasync::AppState {
        client: Arc::new(builder.build()),
        memory,
        max_body_bytes: config.server.max_body_bytes,
    });

    let app = metasync::server::app(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("metasync listening on {}", bind_addr);

    let (stop_tx, mut stop_rx) = tokio::sync::watch::channel(false);
    let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
        shutdown_signal().await;
        let _ = stop_tx.send(true);
    });
    let grace = Duration::from_secs(config.server.shutdown_timeout);

    tokio::select! {
        result = async { serve.await } => result?,
        _ = async {
            let _ = stop_rx.wait_for(|stopped| *stopped).await;
            tokio::time::sleep(grace).await;
        } => {
            warn!("In-flight requests still running after {:?}, exiting", grace);
        }
    }

    info!("metasync shut down");

    Ok(())
}

/// Wait for SIGTERM or SIGINT (Ctrl+C), then return to trigger graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, shutting down");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down");
        },
    }
}
