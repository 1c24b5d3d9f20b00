//! adsync daemon entry point.
//!
//! Loads configuration, opens the account database, runs the two
//! synchronization passes on the configured interval, and handles graceful
//! shutdown.

mod scheduler;
mod signals;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use adsync_core::config::ConfigStore;
use adsync_core::db::Database;

// ---------------------------------------------------------------------------
// CLI arguments
// ---------------------------------------------------------------------------

/// adsync synchronization daemon.
#[derive(Parser, Debug)]
#[command(
    name = "adsync-daemon",
    version,
    about = "Scheduled Active Directory <-> local account synchronization"
)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long)]
    config: PathBuf,

    /// Override the log level from the config file (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load, resolve, and validate configuration
    let store = ConfigStore::from_file(&args.config).context("failed to load configuration")?;
    let config = store.snapshot();

    // Initialize tracing
    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.daemon.log_level);

    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .init();

    // Startup banner
    info!("========================================");
    info!("  adsync daemon v{}", env!("CARGO_PKG_VERSION"));
    info!("========================================");
    info!("Config file   : {}", args.config.display());
    info!("Directory URL : {}", config.directory.url);
    info!("Base DN       : {}", config.directory.base_dn);
    info!(
        "To local      : {}",
        if config.sync_to_local.enabled { "enabled" } else { "disabled" }
    );
    info!(
        "To directory  : {}",
        if config.sync_to_directory.enabled { "enabled" } else { "disabled" }
    );
    info!("Poll interval : {}s", config.daemon.poll_interval_secs);
    info!("Data dir      : {}", config.daemon.data_dir.display());
    info!("Log level     : {}", log_level);
    info!("========================================");

    if !config.sync_to_local.enabled && !config.sync_to_directory.enabled {
        warn!("both passes are disabled; the daemon will idle until the configuration changes");
    }

    // Ensure data directory exists
    std::fs::create_dir_all(&config.daemon.data_dir).context("failed to create data directory")?;

    // Initialize database
    let db_path = config.daemon.database_path();
    let db = Database::new(&db_path).context("failed to open database")?;
    db.initialize()
        .context("failed to initialize database schema")?;
    info!("Database initialized at {}", db_path.display());

    // Create a shutdown notify for cooperative cancellation
    let shutdown = Arc::new(tokio::sync::Notify::new());
    let scheduler_shutdown = shutdown.clone();

    // Create and start the scheduler
    let poll_interval = Duration::from_secs(config.daemon.poll_interval_secs);
    let mut sched = scheduler::Scheduler::new(
        Arc::new(store),
        Arc::new(db),
        scheduler::ldap_connector(),
        poll_interval,
    );
    let stats = sched.stats();

    let mut scheduler_handle = tokio::spawn(async move {
        sched.run(scheduler_shutdown).await;
    });

    // Wait for shutdown signal
    signals::wait_for_shutdown().await;

    info!("Shutdown signal received, stopping...");

    // Signal cooperative shutdown to the scheduler
    shutdown.notify_one();

    // Wait for the scheduler to finish its current cycle (up to 30s)
    match tokio::time::timeout(Duration::from_secs(30), &mut scheduler_handle).await {
        Ok(Ok(())) => info!("scheduler stopped gracefully"),
        Ok(Err(e)) => warn!("scheduler task error: {}", e),
        Err(_) => {
            warn!("scheduler did not stop within 30s, forcing shutdown");
            scheduler_handle.abort();
        }
    }

    info!(
        cycles = stats.total_cycles.load(std::sync::atomic::Ordering::SeqCst),
        skipped_ticks = stats.skipped_ticks.load(std::sync::atomic::Ordering::SeqCst),
        errors = stats.total_errors.load(std::sync::atomic::Ordering::SeqCst),
        "adsync daemon stopped."
    );
    Ok(())
}
