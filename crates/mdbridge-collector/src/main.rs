//! mdbridge-collector: Binance futures market data into a Parquet catalog
//!
//! Subscribes the configured instruments and bar series, writes every event
//! to the catalog and exposes health, metrics and status over HTTP.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mdbridge_binance::BinanceFeed;
use mdbridge_catalog::ParquetCatalog;
use mdbridge_collector::Config;
use mdbridge_lib::{run_server, Collector, EnvResolver, Runner, ServerState};

#[derive(Parser, Debug)]
#[command(name = "mdbridge-collector")]
#[command(about = "Collects Binance futures market data into a Parquet catalog")]
struct Args {
    /// Path to collector configuration file
    #[arg(short, long, env = "MDBRIDGE_CONFIG")]
    config: PathBuf,

    /// Skip loading a .env file from the working directory
    #[arg(long)]
    no_dotenv: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    if !args.no_dotenv {
        match dotenvy::dotenv() {
            Ok(path) => info!(path = ?path, "Loaded .env"),
            Err(e) if e.not_found() => {}
            Err(e) => warn!(error = %e, "Failed to load .env"),
        }
    }

    let config = Config::load(&args.config).map_err(|e| {
        error!(error = %e, "Failed to load config");
        e
    })?;

    // Missing credentials are fatal
    let (api_key, _api_secret) = EnvResolver::new()
        .resolve_pair(&config.feed.credentials)
        .map_err(|e| {
            error!(error = %e, source = %config.feed.credentials, "Failed to resolve credentials");
            e
        })?;
    info!("Loaded credentials");

    // So is a catalog directory we cannot create
    let catalog = Arc::new(
        ParquetCatalog::new(&config.catalog.path, config.catalog.flush_rows).map_err(|e| {
            error!(error = %e, path = ?config.catalog.path, "Failed to open catalog");
            e
        })?,
    );

    let feed_config = config.feed_config(Some(api_key))?;
    info!(
        feed = %config.feed.name,
        ws_url = %feed_config.ws_url,
        http_url = %feed_config.http_url,
        instruments = config.instruments.len(),
        catalog = ?config.catalog.path,
        "Starting collector"
    );
    let feed = Arc::new(BinanceFeed::new(feed_config)?);

    let collector = Collector::new(config.collector_settings()?, feed.clone(), catalog.clone());
    let mut runner = Runner::new(
        config.feed.name.clone(),
        feed,
        catalog,
        collector,
        config.runner_settings()?,
    );

    // Health server
    let health_addr = config.health_addr()?;
    let state = ServerState::new(
        config.feed.name.clone(),
        runner.connected_handle(),
        runner.last_event_handle(),
        runner.reporter(),
    );
    tokio::spawn(async move {
        info!(addr = %health_addr, "Starting health server");
        if let Err(e) = run_server(health_addr, state).await {
            error!(error = %e, "Health server failed");
        }
    });

    // Setup shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let run_duration = config.run_duration()?;

    tokio::spawn(async move {
        let deadline = async {
            match run_duration {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            _ = sigterm.recv() => info!("SIGTERM received, shutting down gracefully"),
            _ = sigint.recv() => info!("SIGINT received, shutting down gracefully"),
            _ = deadline => info!(duration = ?run_duration, "Run duration elapsed, shutting down"),
        }
        shutdown_tx.send(true).ok();
    });

    runner.run(shutdown_rx).await.map_err(|e| {
        error!(error = %e, "Collector stopped with error");
        e
    })?;

    info!("Collector stopped");
    Ok(())
}
