//! # LineKV Server
//!
//! Serve the line protocol over TCP on top of a snapshot-backed store.
//!
//! ## Design Principles
//!
//! 1. **Single Responsibility**: Parsing, connection handling and storage
//!    live in separate modules and crates.
//! 2. **Async First**: Tokio handles concurrent connections.
//! 3. **Fail-Open Defaults**: Protocol and I/O errors stay local to one
//!    connection; a missing snapshot file starts an empty store.
//! 4. **Orderly Exit**: Signals trigger the full shutdown sequence and a final
//!    save.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

use lkv_common::StopFlag;
use lkv_engine::{KvStore, Storage};
use lkv_server::report::run_reporter;
use lkv_server::shutdown::shutdown_signal;
use lkv_server::{Cli, Server};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = cli.to_config();
    info!(path = %config.config_path.display(), "opening storage");

    let storage = Arc::new(Storage::open(&config.config_path));
    let snapshotter = storage.start_snapshotter(config.snapshot_period);

    let store: Arc<dyn KvStore> = storage.clone();
    let server = Server::start(&config, store)
        .await
        .with_context(|| format!("failed to start server on {}", config.listen))?;

    let report_stop = StopFlag::new();
    let reporter = config.report_interval.map(|interval| {
        tokio::spawn(run_reporter(
            Arc::clone(&storage),
            server.metrics(),
            interval,
            report_stop.clone(),
        ))
    });

    shutdown_signal()
        .await
        .context("failed to listen for shutdown signals")?;
    info!("shutdown requested");

    server.shutdown().await.context("server shutdown failed")?;

    report_stop.set();
    if let Some(reporter) = reporter {
        reporter.await.context("statistics report task failed")?;
    }

    snapshotter.stop().await.context("final snapshot failed")?;

    let stats = storage.stats();
    info!(reads = stats.reads, writes = stats.writes, "storage closed");
    Ok(())
}
