//! hopRadio engine - main entry point
//!
//! Runs the playback engine as a headless process: load the catalog,
//! start playing live programming, and keep playing until interrupted.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hopradio_engine::audio::backend::CpalBackend;
use hopradio_engine::{Catalog, EngineConfig, OfflineCache, RadioEngine};

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "hopradio-engine")]
#[command(about = "hopRadio continuous playback engine")]
#[command(version)]
struct Args {
    /// Configuration file (TOML); defaults apply when absent
    #[arg(short, long, env = "HOPRADIO_CONFIG")]
    config: Option<PathBuf>,

    /// Local catalog JSON file (overrides station.catalog_url)
    #[arg(long, env = "HOPRADIO_CATALOG")]
    catalog: Option<PathBuf>,

    /// Start paused instead of playing immediately
    #[arg(long)]
    paused: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hopradio_engine=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => EngineConfig::default(),
    };

    let cache = OfflineCache::open(&config.cache.db_path)
        .await
        .context("failed to open offline cache")?;

    let catalog = match (&args.catalog, &config.station.catalog_url) {
        (Some(path), _) => Catalog::load(path)
            .with_context(|| format!("failed to load catalog {}", path.display()))?,
        (None, Some(url)) => {
            // One-off fetch outside the engine's fetcher; stats start
            // counting once the engine runs.
            let bytes = reqwest::get(url)
                .await
                .and_then(|r| r.error_for_status())
                .context("failed to fetch catalog")?
                .bytes()
                .await
                .context("failed to read catalog body")?;
            Catalog::from_json(&bytes).context("failed to parse catalog")?
        }
        (None, None) => anyhow::bail!("no catalog: pass --catalog or set station.catalog_url"),
    };
    info!(tracks = catalog.tracks().len(), "catalog loaded");

    let backend = Arc::new(CpalBackend::new(config.audio.device.clone()));
    let engine = RadioEngine::start(config, catalog, backend, cache);
    engine.init();
    if !args.paused {
        engine.play();
    }

    shutdown_signal().await;
    info!("shutting down");
    engine.shutdown();
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
