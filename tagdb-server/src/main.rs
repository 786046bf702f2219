//! tagdb Server - HTTP API for the tagged time-series database

mod api;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tagdb_core::blockstore::BlockStoreConfig;
use tagdb_core::{Engine, StorageConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "tagdb", about = "tagdb tagged time-series server", version)]
struct Args {
    /// HTTP listen address
    #[arg(long, env = "TAGDB_LISTEN", default_value = "0.0.0.0:8086")]
    listen: String,

    /// Data directory; omit to keep everything in memory
    #[arg(long, env = "TAGDB_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Log level (trace / debug / info / warn / error)
    #[arg(long, env = "TAGDB_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Block payload cap in bytes
    #[arg(
        long,
        env = "TAGDB_MAX_BLOCK_BYTES",
        default_value_t = tagdb_core::config::MAX_BLOCK_BYTES
    )]
    max_block_bytes: usize,
}

impl Args {
    fn storage_config(&self) -> StorageConfig {
        StorageConfig {
            data_dir: self.data_dir.clone(),
            block_store: BlockStoreConfig {
                max_block_bytes: self.max_block_bytes,
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    info!("Starting tagdb server v{}", tagdb_core::VERSION);
    match &args.data_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("create data_dir {:?}", dir))?;
            info!("Data directory: {:?}", dir);
        }
        None => info!("No data directory, running in memory"),
    }

    let engine = Engine::open(args.storage_config()).context("open storage engine")?;
    let app = api::create_router(Arc::new(engine));

    let listener = tokio::net::TcpListener::bind(&args.listen)
        .await
        .with_context(|| format!("bind {}", args.listen))?;
    info!("tagdb listening on http://{}", args.listen);

    axum::serve(listener, app).await?;

    Ok(())
}
