//! Airmar weather-station bridge daemon.
//!
//! Bridges an Airmar WX-series marine weather station (NMEA 0183 over USB
//! serial) to local UDP consumers.
//!
//! Usage:
//!   airmar-bridge -c /etc/airmar-bridge/bridge.conf
//!   airmar-bridge -c /etc/airmar-bridge/bridge.conf --state /var/lib/airmar-bridge/state.json

mod aggregator;
mod bridge;
mod config;
mod dialect;
mod error;
mod framer;
mod link;
mod ports;
mod reader;
mod registry;
mod state;
mod udp;

use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info};

use bridge::Bridge;

#[derive(Debug, Parser)]
#[command(name = "airmar-bridge", about = "Airmar WX-series weather station bridge")]
struct Cli {
    /// Path to the static bridge configuration file.
    #[arg(short = 'c', long = "config", default_value = "/etc/airmar-bridge/bridge.conf")]
    config: PathBuf,

    /// Override the persisted state document path set in the config file.
    #[arg(long = "state")]
    state: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    if let Err(e) = run().await {
        error!("{e:#}");
        process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    let mut cfg = config::load_config(&cli.config)
        .with_context(|| format!("loading config from {}", cli.config.display()))?;
    if let Some(state_path) = cli.state {
        cfg.state_path = state_path;
    }

    let persisted = state::load(&cfg.state_path)
        .with_context(|| format!("loading persisted state from {}", cfg.state_path.display()))?;

    info!("airmar-bridge starting, state at {}", cfg.state_path.display());
    let bridge = Bridge::new(cfg, persisted);
    bridge.auto_start().await;

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("received shutdown signal"),
        Err(e) => error!("failed to listen for shutdown signal: {e}"),
    }

    bridge.disconnect().await.context("disconnect during shutdown")?;
    Ok(())
}
