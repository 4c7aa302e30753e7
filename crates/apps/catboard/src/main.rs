//! Catboard - Weenect GPS tracker sync daemon
//!
//! This is the main entry point for the catboard daemon and CLI.

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use log::{error, info, warn};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracker::DaemonConfig;

mod commands;
mod scheduler;

#[derive(Parser)]
#[command(name = "catboard", version, about = "GPS tracker data collection daemon")]
struct Cli {
    /// Path to a JSON config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the daemon with scheduled syncs
    Run,
    /// Sync now
    SyncNow {
        /// Sync one tracker only
        #[arg(long)]
        tracker_id: Option<i64>,
    },
    /// Backfill historical data
    Backfill {
        /// First day to fetch (YYYY-MM-DD)
        #[arg(long)]
        start_date: NaiveDate,
        /// Day to stop before (YYYY-MM-DD, default: now)
        #[arg(long)]
        end_date: Option<NaiveDate>,
        /// Backfill one tracker only
        #[arg(long)]
        tracker_id: Option<i64>,
    },
    /// Show database status and the last sync
    Status,
    /// Show per-tracker statistics
    Stats {
        #[arg(long)]
        tracker_id: Option<i64>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let loaded = DaemonConfig::load(cli.config.as_deref());
    let filter = loaded.as_ref().map_or("info", |cfg| cfg.log_filter());

    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter))
        .format_timestamp_millis()
        .init();

    let cfg = match loaded {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load config: {e:#}");
            if let Some(path) = config::config_path("config.json") {
                warn!("Expected a config file at ./config.json or {}", path.display());
            }
            return ExitCode::FAILURE;
        }
    };

    let shutdown = CancellationToken::new();
    tokio::spawn(watch_signals(shutdown.clone()));

    let result = match cli.command {
        Command::Run => scheduler::run_daemon(&cfg, shutdown).await,
        Command::SyncNow { tracker_id } => commands::sync_now(&cfg, &shutdown, tracker_id).await,
        Command::Backfill {
            start_date,
            end_date,
            tracker_id,
        } => commands::backfill(&cfg, &shutdown, start_date, end_date, tracker_id).await,
        Command::Status => commands::show_status(&cfg),
        Command::Stats { tracker_id } => commands::show_stats(&cfg, tracker_id),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Cancel `shutdown` on Ctrl-C or SIGTERM
async fn watch_signals(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {e}");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    info!("Received shutdown signal");
    shutdown.cancel();
}
