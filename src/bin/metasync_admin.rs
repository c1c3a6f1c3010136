//! CLI entry point for metasync-admin: metadata export, import and inspection.

use std::io::Read;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use metasync::metadata::cursor::Cursor;
use metasync::metadata::sqlite::SqliteMetadataStore;
use metasync::metadata::store::MetadataStore;
use metasync::metadata::transfer::{export_metadata, import_metadata, ImportOptions};

#[derive(Parser)]
#[command(name = "metasync-admin", about = "metasync metadata administration tool")]
struct Cli {
    /// Path to the YAML configuration file, used to locate the database.
    #[arg(long, global = true, default_value = "metasync.example.yaml")]
    config: PathBuf,

    /// SQLite database path; overrides the configuration file.
    #[arg(long, global = true)]
    db: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Export metadata to JSON
    Export {
        /// Only export this bucket.
        #[arg(long)]
        bucket: Option<String>,
        #[arg(long, default_value = "-")]
        output: String,
    },
    /// Import metadata from JSON
    Import {
        #[arg(long, default_value = "-")]
        input: String,
        /// Clear every bucket named in the input first.
        #[arg(long, default_value_t = false)]
        replace: bool,
    },
    /// Print one page of a bucket's records
    List {
        #[arg(long)]
        bucket: String,
        #[arg(long, default_value_t = 100)]
        limit: usize,
        /// Continue cursor from a previous page.
        #[arg(long)]
        cursor: Option<String>,
    },
    /// Print one record
    Get {
        #[arg(long)]
        bucket: String,
        #[arg(long)]
        key: String,
    },
}

fn resolve_db_path(cli: &Cli) -> anyhow::Result<String> {
    if let Some(db) = &cli.db {
        return Ok(db.clone());
    }
    let config = metasync::config::load_config(&cli.config)?;
    Ok(config.metadata.sqlite.path)
}

fn main() {
    let cli = Cli::parse();

    let db_path = match resolve_db_path(&cli) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Error reading config: {}", e);
            std::process::exit(1);
        }
    };
    let store = match SqliteMetadataStore::new(&db_path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error opening {}: {}", db_path, e);
            std::process::exit(1);
        }
    };
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error starting runtime: {}", e);
            std::process::exit(1);
        }
    };

    let rc = runtime.block_on(async {
        match cli.command {
            Commands::Export { bucket, output } => run_export(&store, bucket, output).await,
            Commands::Import { input, replace } => run_import(&store, input, replace).await,
            Commands::List {
                bucket,
                limit,
                cursor,
            } => run_list(&store, bucket, limit, cursor).await,
            Commands::Get { bucket, key } => run_get(&store, bucket, key).await,
        }
    });
    std::process::exit(rc);
}

async fn run_export(store: &SqliteMetadataStore, bucket: Option<String>, output: String) -> i32 {
    let doc = match export_metadata(store, bucket.as_deref()).await {
        Ok(doc) => doc,
        Err(e) => {
            eprintln!("Error exporting: {}", e);
            return 1;
        }
    };
    let json = match serde_json::to_string_pretty(&doc) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error encoding export: {}", e);
            return 1;
        }
    };

    if output == "-" {
        println!("{}", json);
    } else {
        if let Err(e) = std::fs::write(&output, format!("{}\n", json)) {
            eprintln!("Error writing output: {}", e);
            return 1;
        }
        eprintln!("Exported {} records to {}", doc.records.len(), output);
    }
    0
}

async fn run_import(store: &SqliteMetadataStore, input: String, replace: bool) -> i32 {
    let json_str = if input == "-" {
        let mut buf = String::new();
        if let Err(e) = std::io::stdin().read_to_string(&mut buf) {
            eprintln!("Error reading stdin: {}", e);
            return 1;
        }
        buf
    } else {
        match std::fs::read_to_string(&input) {
            Ok(s) => s,
            Err(e) => {
                eprintln!("Error reading input: {}", e);
                return 1;
            }
        }
    };

    let opts = ImportOptions { replace };
    match import_metadata(store, &json_str, &opts).await {
        Ok(result) => {
            let mut msg = format!("  {} imported", result.imported);
            if result.cleared > 0 {
                msg.push_str(&format!(", {} cleared", result.cleared));
            }
            if result.skipped > 0 {
                msg.push_str(&format!(", {} skipped", result.skipped));
            }
            eprintln!("{}", msg);
            for w in &result.warnings {
                eprintln!("  WARNING: {}", w);
            }
            0
        }
        Err(e) => {
            eprintln!("Error importing: {}", e);
            1
        }
    }
}

async fn run_list(
    store: &SqliteMetadataStore,
    bucket: String,
    limit: usize,
    cursor: Option<String>,
) -> i32 {
    let cursor = match cursor.map(|c| Cursor::decode_for(&bucket, &c)).transpose() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    match store.scan(&bucket, cursor, limit.max(1)).await {
        Ok(page) => match serde_json::to_string_pretty(&page) {
            Ok(s) => {
                println!("{}", s);
                0
            }
            Err(e) => {
                eprintln!("Error encoding page: {}", e);
                1
            }
        },
        Err(e) => {
            eprintln!("Error listing {}: {}", bucket, e);
            1
        }
    }
}

async fn run_get(store: &SqliteMetadataStore, bucket: String, key: String) -> i32 {
    match store.get(&bucket, &key).await {
        Ok(Some(record)) => match serde_json::to_string_pretty(&record) {
            Ok(s) => {
                println!("{}", s);
                0
            }
            Err(e) => {
                eprintln!("Error encoding record: {}", e);
                1
            }
        },
        Ok(None) => {
            eprintln!("No record for {}/{}", bucket, key);
            1
        }
        Err(e) => {
            eprintln!("Error reading {}/{}: {}", bucket, key, e);
            1
        }
    }
}
