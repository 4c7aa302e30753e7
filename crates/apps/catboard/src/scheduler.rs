//! Periodic sync loop for `catboard run`

use anyhow::Result;
use log::{error, info};
use std::future::Future;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracker::DaemonConfig;

use crate::commands::{build_worker, invocation_context, open_store};

/// Budget for one scheduled sync
const SCHEDULED_SYNC_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Run scheduled syncs until `shutdown` is cancelled
pub async fn run_daemon(cfg: &DaemonConfig, shutdown: CancellationToken) -> Result<()> {
    info!("Starting catboard v{}", env!("CARGO_PKG_VERSION"));

    let worker = build_worker(cfg, open_store(cfg)?)?;
    let period = Duration::from_secs(cfg.sync_interval_minutes.saturating_mul(60));
    info!("Daemon started, syncing every {} minutes", cfg.sync_interval_minutes);

    let worker = &worker;
    let token = &shutdown;
    run_schedule(period, &shutdown, move || async move {
        info!("Scheduled sync triggered");
        let ctx = invocation_context(token, SCHEDULED_SYNC_TIMEOUT);
        match worker.sync_all(&ctx).await {
            Ok(_) => info!("Scheduled sync completed successfully"),
            Err(e) => error!("Scheduled sync failed: {e}"),
        }
    })
    .await;

    info!("Daemon stopped");
    Ok(())
}

/// Call `job` every `period`, first after one full period
///
/// Runs are never overlapped: a run that overshoots its slot delays the
/// next one instead of bunching ticks up.
async fn run_schedule<F, Fut>(period: Duration, shutdown: &CancellationToken, mut job: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut ticks = tokio::time::interval_at(Instant::now() + period, period);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticks.tick() => job().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_first_run_after_one_period() {
        let shutdown = CancellationToken::new();
        let runs = Arc::new(AtomicUsize::new(0));

        let stopper = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(150)).await;
            stopper.cancel();
        });

        let counter = runs.clone();
        run_schedule(Duration::from_secs(60), &shutdown, || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        })
        .await;

        // Ticks at 60s and 120s, cancelled at 150s
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_immediately_when_cancelled() {
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let started = Instant::now();
        run_schedule(Duration::from_secs(60), &shutdown, || async {
            panic!("job must not run");
        })
        .await;

        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
