//! One-shot CLI commands

use anyhow::{Context, Result, bail};
use chrono::{DateTime, NaiveDate, NaiveTime, SecondsFormat, Utc};
use log::info;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracker::{
    DaemonConfig, PresenceCache, RateLimiter, SqliteTrackerStore, SureHubClient, SyncContext,
    SyncOptions, SyncStats, SyncWorker, TrackerId, TrackerStore, WeenectClient,
};

/// Budget for a manual sync
const MANUAL_SYNC_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Budget for a backfill
const BACKFILL_TIMEOUT: Duration = Duration::from_secs(60 * 60);

pub fn open_store(cfg: &DaemonConfig) -> Result<Arc<SqliteTrackerStore>> {
    let store = SqliteTrackerStore::open(&cfg.database_path).with_context(|| {
        format!("Failed to open database at {}", cfg.database_path.display())
    })?;
    Ok(Arc::new(store))
}

/// Build a sync worker against the Weenect API
pub fn build_worker(cfg: &DaemonConfig, store: Arc<SqliteTrackerStore>) -> Result<SyncWorker> {
    cfg.validate().context("Invalid configuration")?;

    let limiter = Arc::new(RateLimiter::new(cfg.rate_limit)?);
    let client = Arc::new(WeenectClient::new(&cfg.username, &cfg.password));
    let options = SyncOptions {
        backfill_floor: Some(cfg.backfill_floor(Utc::now())),
    };

    Ok(SyncWorker::new(client, store, limiter).with_options(options))
}

/// A context cancelled on shutdown and expiring after `timeout`
pub fn invocation_context(shutdown: &CancellationToken, timeout: Duration) -> SyncContext {
    SyncContext::from_token(shutdown.clone()).child_with_timeout(timeout)
}

pub async fn sync_now(
    cfg: &DaemonConfig,
    shutdown: &CancellationToken,
    tracker_id: Option<i64>,
) -> Result<()> {
    let worker = build_worker(cfg, open_store(cfg)?)?;
    let ctx = invocation_context(shutdown, MANUAL_SYNC_TIMEOUT);

    info!("Starting manual sync");
    let stats = match tracker_id {
        Some(id) => worker.sync_tracker(&ctx, TrackerId::new(id)).await,
        None => worker.sync_all(&ctx).await,
    }
    .context("sync failed")?;

    print_summary("Sync", &stats);
    Ok(())
}

pub async fn backfill(
    cfg: &DaemonConfig,
    shutdown: &CancellationToken,
    start_date: NaiveDate,
    end_date: Option<NaiveDate>,
    tracker_id: Option<i64>,
) -> Result<()> {
    let start = midnight(start_date);
    let end = end_date.map_or_else(Utc::now, midnight);
    if start >= end {
        bail!("backfill start {start_date} must be before the end date");
    }

    let worker = build_worker(cfg, open_store(cfg)?)?;
    let ctx = invocation_context(shutdown, BACKFILL_TIMEOUT);

    info!("Starting backfill from {start} to {end}");
    let stats = match tracker_id {
        Some(id) => worker.backfill_tracker(&ctx, TrackerId::new(id), start, end).await,
        None => worker.backfill_all(&ctx, start, end).await,
    }
    .context("backfill failed")?;

    print_summary("Backfill", &stats);
    Ok(())
}

pub fn show_status(cfg: &DaemonConfig) -> Result<()> {
    let store = open_store(cfg)?;
    let status = store.get_status().context("Failed to get status")?;
    let stats = store.get_stats(None).context("Failed to get tracker stats")?;
    let latest = store
        .latest_positions()
        .context("Failed to get latest positions")?;

    println!("Catboard Status");
    println!("===============\n");
    println!("Database: {}", cfg.database_path.display());
    println!("Trackers: {}", status.tracker_count);
    println!("Total Positions: {}", status.position_count);

    if !stats.is_empty() {
        println!("\nPositions per Tracker:");
        for s in &stats {
            print!("  {} (ID {}): {} positions", s.tracker_name, s.tracker_id, s.position_count);
            if let Some(last_sync) = s.last_sync {
                print!(" (last sync: {})", last_sync.format("%Y-%m-%d %H:%M"));
            }
            println!();
        }
    }

    if !latest.is_empty() {
        let presence = cfg.has_presence().then(|| {
            PresenceCache::new(SureHubClient::new(
                cfg.presence_email.clone().unwrap_or_default(),
                cfg.presence_password.clone().unwrap_or_default(),
            ))
        });

        println!("\nLatest Positions:");
        for entry in &latest {
            let p = &entry.position;
            print!(
                "  {} [{}] {:.5}, {:.5} at {}",
                entry.tracker_name,
                p.tracker_id.display_color(),
                p.latitude,
                p.longitude,
                rfc3339(p.timestamp)
            );
            if let Some(battery) = p.battery {
                print!(", battery {battery}%");
            }
            if let Some(state) = presence.as_ref().and_then(|c| c.lookup(&entry.tracker_name)) {
                print!(", {}", if state.is_inside { "inside" } else { "outside" });
                if let Some(since) = state.since {
                    print!(" since {}", rfc3339(since));
                }
            }
            println!();
        }
    }

    println!("\nLast Sync:");
    match status.last_sync {
        None => println!("  Never synced"),
        Some(last) => {
            println!("  Time: {}", rfc3339(last.sync_time));
            println!("  Success: {}", last.success);
            println!("  Positions Fetched: {}", last.positions_fetched);
            if let Some(err) = last.error_message {
                println!("  Error: {err}");
            }
        }
    }
    Ok(())
}

pub fn show_stats(cfg: &DaemonConfig, tracker_id: Option<i64>) -> Result<()> {
    let store = open_store(cfg)?;
    let stats = store
        .get_stats(tracker_id.map(TrackerId::new))
        .context("Failed to get stats")?;

    match tracker_id {
        Some(id) => println!("Statistics for Tracker {id}"),
        None => println!("Statistics for All Trackers"),
    }
    println!("===========================\n");

    for s in &stats {
        println!("Tracker: {} (ID: {})", s.tracker_name, s.tracker_id);
        println!("  Positions: {}", s.position_count);
        if let Some(first) = s.first_position {
            println!("  First Position: {}", rfc3339(first));
        }
        if let Some(last) = s.last_position {
            println!("  Last Position: {}", rfc3339(last));
        }
        if let Some(last_sync) = s.last_sync {
            println!("  Last Sync: {}", rfc3339(last_sync));
        }
        println!();
    }
    Ok(())
}

fn print_summary(what: &str, stats: &SyncStats) {
    info!(
        "{what} completed: {} trackers, {} positions fetched ({} new) in {}ms",
        stats.trackers_synced, stats.positions_fetched, stats.positions_stored, stats.duration_ms
    );
}

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

fn rfc3339(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}
