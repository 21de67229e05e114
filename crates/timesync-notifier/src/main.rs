//! timesync-notifier entry point.
//!
//! ```text
//! main()
//!  └─ load_config()            -- TOML file from --config / TIMESYNC_CONFIG
//!  └─ LocalClockAuthority      -- clocks declared under [[clocks]]
//!  └─ service::start()         -- socket, memberships, worker thread
//!  └─ ctrl_c                   -- then service::stop()
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use timesync_notifier::infrastructure::clock::LocalClockAuthority;
use timesync_notifier::infrastructure::storage::config::load_config;

/// Publishes clock state to UDP receivers.
#[derive(Debug, Parser)]
#[command(name = "timesync-notifier", version, about)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, env = "TIMESYNC_CONFIG", default_value = "timesync.toml")]
    config: PathBuf,

    /// Log level override (`RUST_LOG` still wins when set).
    #[arg(long, env = "TIMESYNC_LOG")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = load_config(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;

    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.service.log_level.clone());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();

    info!("timesync-notifier starting with {}", cli.config.display());

    let authority = Arc::new(LocalClockAuthority::from_entries(&config.clocks));
    if config.clocks.iter().all(|c| c.id != config.notifier.clock_id) {
        warn!(
            "clock {} is not declared under [[clocks]]; every publish tick will be skipped",
            config.notifier.clock_id
        );
    }

    let handle = timesync_notifier::start(&config.notifier, authority)
        .context("starting the notifier")?;
    info!("listening on {}.  Press Ctrl-C to exit.", handle.local_addr());

    tokio::signal::ctrl_c()
        .await
        .context("waiting for the shutdown signal")?;
    info!("shutdown signal received");

    // Joining the worker blocks; keep it off the async runtime threads.
    tokio::task::spawn_blocking(move || timesync_notifier::stop(handle))
        .await
        .context("stopping the notifier")?;

    info!("timesync-notifier stopped");
    Ok(())
}
