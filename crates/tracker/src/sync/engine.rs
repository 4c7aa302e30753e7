//! Chunked fetch-store-checkpoint sync worker

use anyhow::anyhow;
use chrono::{DateTime, NaiveTime, TimeDelta, Utc};
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use super::{SyncContext, SyncError};
use crate::chunk::{MAX_CHUNK_SPAN, chunk_range};
use crate::models::{SyncLogEntry, TrackerId};
use crate::ratelimit::RateLimiter;
use crate::storage::TrackerStore;
use crate::upstream::TelemetryProvider;

type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Statistics from a sync or backfill invocation
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SyncStats {
    /// Trackers whose chunk loop completed
    pub trackers_synced: usize,
    /// Trackers that failed part way
    pub trackers_failed: usize,
    /// Positions returned by the upstream, duplicates included
    pub positions_fetched: usize,
    /// Positions that were new to the store
    pub positions_stored: usize,
    /// Chunks fetched and checkpointed
    pub chunks: usize,
    pub duration_ms: u64,
}

/// Tunables for the sync worker
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Where incremental syncs start for a tracker that has never synced.
    /// `None` means midnight UTC yesterday.
    pub backfill_floor: Option<DateTime<Utc>>,
}

/// Range a tracker's chunk loop covers
#[derive(Debug, Clone, Copy)]
enum Window {
    /// From the tracker's checkpoint (or the floor) up to `end`
    Incremental { end: DateTime<Utc> },
    /// Exactly `[start, end)`, regardless of the checkpoint
    Explicit {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
}

/// Drives trackers through the chunk loop against a provider and a store
///
/// Within one invocation trackers and their chunks run strictly in order.
/// Overlapping invocations on the same tracker are serialized by a
/// per-tracker lock; every upstream call goes through the shared limiter.
pub struct SyncWorker {
    provider: Arc<dyn TelemetryProvider>,
    store: Arc<dyn TrackerStore>,
    limiter: Arc<RateLimiter>,
    options: SyncOptions,
    clock: Clock,
    tracker_locks: Mutex<HashMap<TrackerId, Arc<tokio::sync::Mutex<()>>>>,
}

impl SyncWorker {
    pub fn new(
        provider: Arc<dyn TelemetryProvider>,
        store: Arc<dyn TrackerStore>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            provider,
            store,
            limiter,
            options: SyncOptions::default(),
            clock: Arc::new(Utc::now),
            tracker_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_options(mut self, options: SyncOptions) -> Self {
        self.options = options;
        self
    }

    /// Replace the wall clock used for "now"
    pub fn with_clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> DateTime<Utc> + Send + Sync + 'static,
    {
        let clock: Clock = Arc::new(clock);
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &Arc<dyn TrackerStore> {
        &self.store
    }

    /// Start of the range for a tracker that has never synced
    pub fn backfill_floor(&self) -> DateTime<Utc> {
        self.options.backfill_floor.unwrap_or_else(|| {
            ((self.clock)() - TimeDelta::days(1))
                .date_naive()
                .and_time(NaiveTime::MIN)
                .and_utc()
        })
    }

    /// Incremental sync of every tracker the upstream lists
    pub async fn sync_all(&self, ctx: &SyncContext) -> Result<SyncStats, SyncError> {
        let now = (self.clock)();
        info!("Starting sync of all trackers");

        let started = Instant::now();
        let mut stats = SyncStats::default();
        let result = self
            .run_fleet(ctx, Window::Incremental { end: now }, &mut stats)
            .await;
        self.finish(SyncLogEntry::new(None, now), started, stats, result)
    }

    /// Incremental sync of one tracker
    pub async fn sync_tracker(
        &self,
        ctx: &SyncContext,
        tracker_id: TrackerId,
    ) -> Result<SyncStats, SyncError> {
        let now = (self.clock)();
        info!("Starting sync of tracker {tracker_id}");

        let started = Instant::now();
        let mut stats = SyncStats::default();
        let result = self
            .run_single(ctx, tracker_id, Window::Incremental { end: now }, &mut stats)
            .await;
        self.finish(SyncLogEntry::new(Some(tracker_id), now), started, stats, result)
    }

    /// Sync `[start, end)` for every tracker the upstream lists
    pub async fn backfill_all(
        &self,
        ctx: &SyncContext,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<SyncStats, SyncError> {
        let now = (self.clock)();
        info!("Starting backfill of all trackers from {start} to {end}");

        let started = Instant::now();
        let mut stats = SyncStats::default();
        let result = self
            .run_fleet(ctx, Window::Explicit { start, end }, &mut stats)
            .await;
        let entry = SyncLogEntry::new(None, now).with_range(start, end);
        self.finish(entry, started, stats, result)
    }

    /// Sync `[start, end)` for one tracker
    pub async fn backfill_tracker(
        &self,
        ctx: &SyncContext,
        tracker_id: TrackerId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<SyncStats, SyncError> {
        let now = (self.clock)();
        info!("Starting backfill of tracker {tracker_id} from {start} to {end}");

        let started = Instant::now();
        let mut stats = SyncStats::default();
        let result = self
            .run_single(ctx, tracker_id, Window::Explicit { start, end }, &mut stats)
            .await;
        let entry = SyncLogEntry::new(Some(tracker_id), now).with_range(start, end);
        self.finish(entry, started, stats, result)
    }

    async fn run_fleet(
        &self,
        ctx: &SyncContext,
        window: Window,
        stats: &mut SyncStats,
    ) -> Result<(), SyncError> {
        self.authenticate(ctx).await?;

        let trackers = self
            .call_upstream(ctx, |p| p.list_trackers(), SyncError::ListTrackers)
            .await?;
        info!("Found {} trackers", trackers.len());

        for tracker in &trackers {
            if let Err(e) = self.store.upsert_tracker(tracker.id, &tracker.name) {
                stats.trackers_failed += 1;
                error!("Failed to store tracker {} ({}): {e:#}", tracker.name, tracker.id);
                continue;
            }

            let before = stats.positions_fetched;
            match self.sync_one(ctx, tracker.id, window, stats).await {
                Ok(()) => {
                    stats.trackers_synced += 1;
                    info!(
                        "Synced tracker {} ({}): {} positions",
                        tracker.name,
                        tracker.id,
                        stats.positions_fetched - before
                    );
                }
                Err(e) if e.is_interrupted() => return Err(e),
                Err(e) => {
                    stats.trackers_failed += 1;
                    error!("Failed to sync tracker {} ({}): {e}", tracker.name, tracker.id);
                }
            }
        }

        if stats.trackers_failed > 0 {
            return Err(SyncError::TrackersFailed {
                failed: stats.trackers_failed,
                total: trackers.len(),
            });
        }
        Ok(())
    }

    async fn run_single(
        &self,
        ctx: &SyncContext,
        tracker_id: TrackerId,
        window: Window,
        stats: &mut SyncStats,
    ) -> Result<(), SyncError> {
        self.authenticate(ctx).await?;
        self.ensure_tracker(ctx, tracker_id).await?;

        let result = self.sync_one(ctx, tracker_id, window, stats).await;
        match &result {
            Ok(()) => stats.trackers_synced += 1,
            Err(e) => {
                stats.trackers_failed += 1;
                error!("Failed to sync tracker {tracker_id}: {e}");
            }
        }
        result
    }

    async fn authenticate(&self, ctx: &SyncContext) -> Result<(), SyncError> {
        self.call_upstream(ctx, |p| p.authenticate(), SyncError::Authentication)
            .await
    }

    /// Make sure the tracker exists locally, looking it up upstream if not
    async fn ensure_tracker(&self, ctx: &SyncContext, tracker_id: TrackerId) -> Result<(), SyncError> {
        if self
            .store
            .get_tracker(tracker_id)
            .map_err(SyncError::Storage)?
            .is_some()
        {
            return Ok(());
        }

        debug!("Tracker {tracker_id} not stored yet, looking it up upstream");
        let remote = self
            .call_upstream(ctx, |p| p.list_trackers(), SyncError::ListTrackers)
            .await?
            .into_iter()
            .find(|t| t.id == tracker_id)
            .ok_or(SyncError::UnknownTracker(tracker_id))?;

        self.store
            .upsert_tracker(remote.id, &remote.name)
            .map_err(SyncError::Storage)
    }

    /// Run the chunk loop for one tracker
    ///
    /// Stops at the first failing chunk. Checkpoints written for earlier
    /// chunks stay in place, so the next invocation resumes after them.
    async fn sync_one(
        &self,
        ctx: &SyncContext,
        tracker_id: TrackerId,
        window: Window,
        stats: &mut SyncStats,
    ) -> Result<(), SyncError> {
        let lock = self.tracker_lock(tracker_id);
        let _guard = ctx.run(lock.lock_owned()).await?;

        let tracker = self
            .store
            .get_tracker(tracker_id)
            .map_err(SyncError::Storage)?
            .ok_or(SyncError::UnknownTracker(tracker_id))?;
        let mut checkpoint = tracker.last_sync_at;

        let (start, end) = match window {
            Window::Incremental { end } => (checkpoint.unwrap_or_else(|| self.backfill_floor()), end),
            Window::Explicit { start, end } => (start, end),
        };

        if start >= end {
            debug!("Tracker {tracker_id} is up to date ({start} >= {end})");
            return Ok(());
        }

        let chunks = chunk_range(start, end, MAX_CHUNK_SPAN);
        debug!("Tracker {tracker_id}: {} chunks from {start} to {end}", chunks.len());

        for chunk in chunks {
            debug!("Fetching tracker {tracker_id} positions {} to {}", chunk.start, chunk.end);
            let positions = self
                .call_upstream(
                    ctx,
                    move |p| p.fetch_positions(tracker_id, chunk.start, chunk.end),
                    |error| SyncError::Fetch { tracker_id, error },
                )
                .await?;
            stats.positions_fetched += positions.len();

            let stored = self
                .store
                .insert_positions(&positions)
                .map_err(SyncError::Storage)?;
            stats.positions_stored += stored;
            debug!(
                "Tracker {tracker_id}: {} positions received, {stored} new",
                positions.len()
            );

            if checkpoint.is_none_or(|current| chunk.end > current) {
                self.store
                    .set_checkpoint(tracker_id, chunk.end)
                    .map_err(SyncError::Storage)?;
                checkpoint = Some(chunk.end);
                debug!("Tracker {tracker_id} checkpoint advanced to {}", chunk.end);
            }
            stats.chunks += 1;
        }

        Ok(())
    }

    /// Issue one rate-limited call to the provider on the blocking pool
    ///
    /// If `ctx` fires first the call is abandoned; its result, if any, is
    /// discarded.
    async fn call_upstream<T, F, E>(&self, ctx: &SyncContext, call: F, on_error: E) -> Result<T, SyncError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn TelemetryProvider) -> anyhow::Result<T> + Send + 'static,
        E: FnOnce(anyhow::Error) -> SyncError,
    {
        self.limiter.acquire(ctx).await?;

        let provider = Arc::clone(&self.provider);
        let task = tokio::task::spawn_blocking(move || call(provider.as_ref()));

        ctx.run(task)
            .await?
            .map_err(|e| anyhow!("upstream call did not complete: {e}"))
            .and_then(|result| result)
            .map_err(on_error)
    }

    fn tracker_lock(&self, tracker_id: TrackerId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .tracker_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(tracker_id).or_default())
    }

    /// Write the invocation's operation-log entry and hand back the outcome
    fn finish(
        &self,
        entry: SyncLogEntry,
        started: Instant,
        mut stats: SyncStats,
        result: Result<(), SyncError>,
    ) -> Result<SyncStats, SyncError> {
        stats.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let mut entry = entry
            .with_positions(stats.positions_fetched)
            .with_duration_ms(stats.duration_ms);
        if let Err(e) = &result {
            entry = entry.failed(e.to_string());
        }

        info!(
            "Sync finished in {}ms: {} trackers synced, {} failed, {} positions",
            stats.duration_ms, stats.trackers_synced, stats.trackers_failed, stats.positions_fetched
        );

        let logged = self.store.append_sync_log(&entry);
        match (result, logged) {
            (Ok(()), Ok(_)) => Ok(stats),
            (Ok(()), Err(e)) => Err(SyncError::Storage(e.context("failed to write sync log"))),
            (Err(e), Ok(_)) => Err(e),
            (Err(e), Err(log_err)) => {
                warn!("Failed to write sync log: {log_err:#}");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Position, PositionId};
    use crate::storage::InMemoryTrackerStore;
    use crate::upstream::RemoteTracker;
    use chrono::TimeZone;

    /// Provider returning one position per requested chunk
    struct OnePerChunk;

    impl TelemetryProvider for OnePerChunk {
        fn authenticate(&self) -> anyhow::Result<()> {
            Ok(())
        }

        fn list_trackers(&self) -> anyhow::Result<Vec<RemoteTracker>> {
            Ok(vec![RemoteTracker {
                id: TrackerId::new(7),
                name: "Milo".into(),
            }])
        }

        fn fetch_positions(
            &self,
            tracker_id: TrackerId,
            start: DateTime<Utc>,
            _end: DateTime<Utc>,
        ) -> anyhow::Result<Vec<Position>> {
            let id = format!("{}-{}", tracker_id, start.timestamp());
            Ok(vec![
                Position::builder(PositionId::new(id), tracker_id)
                    .timestamp(start)
                    .coordinates(48.85, 2.35)
                    .build(),
            ])
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 5, 15, 30, 0).unwrap()
    }

    fn worker(store: Arc<InMemoryTrackerStore>) -> SyncWorker {
        let limiter = Arc::new(RateLimiter::new(1000.0).unwrap());
        SyncWorker::new(Arc::new(OnePerChunk), store, limiter).with_clock(now)
    }

    #[test]
    fn test_default_floor_is_yesterday_midnight() {
        let w = worker(Arc::new(InMemoryTrackerStore::new()));
        assert_eq!(w.backfill_floor(), Utc.with_ymd_and_hms(2024, 3, 4, 0, 0, 0).unwrap());

        let floor = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let w = w.with_options(SyncOptions {
            backfill_floor: Some(floor),
        });
        assert_eq!(w.backfill_floor(), floor);
    }

    #[tokio::test]
    async fn test_first_sync_starts_at_floor() {
        let store = Arc::new(InMemoryTrackerStore::new());
        let w = worker(store.clone());

        let stats = w.sync_all(&SyncContext::new()).await.unwrap();

        // 2024-03-04T00:00 .. 2024-03-05T15:30 is two chunks
        assert_eq!(stats.chunks, 2);
        assert_eq!(stats.positions_stored, 2);
        assert_eq!(stats.trackers_synced, 1);

        let tracker = store.get_tracker(TrackerId::new(7)).unwrap().unwrap();
        assert_eq!(tracker.last_sync_at, Some(now()));
    }

    #[tokio::test]
    async fn test_up_to_date_tracker_is_noop() {
        let store = Arc::new(InMemoryTrackerStore::new());
        store.upsert_tracker(TrackerId::new(7), "Milo").unwrap();
        store.set_checkpoint(TrackerId::new(7), now()).unwrap();

        let stats = worker(store.clone())
            .sync_tracker(&SyncContext::new(), TrackerId::new(7))
            .await
            .unwrap();

        assert_eq!(stats.chunks, 0);
        assert_eq!(stats.trackers_synced, 1);
        assert_eq!(store.recent_sync_logs(10).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_invocation_is_logged() {
        let store = Arc::new(InMemoryTrackerStore::new());
        let ctx = SyncContext::new();
        ctx.cancel();

        let err = worker(store.clone()).sync_all(&ctx).await.unwrap_err();
        assert!(err.is_interrupted());

        let logs = store.recent_sync_logs(10).unwrap();
        assert_eq!(logs.len(), 1);
        assert!(!logs[0].success);
        assert_eq!(logs[0].error_message.as_deref(), Some("operation cancelled"));
    }

    #[tokio::test]
    async fn test_unknown_tracker() {
        let store = Arc::new(InMemoryTrackerStore::new());
        let err = worker(store.clone())
            .sync_tracker(&SyncContext::new(), TrackerId::new(99))
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::UnknownTracker(id) if id == TrackerId::new(99)));
        let logs = store.recent_sync_logs(10).unwrap();
        assert_eq!(logs[0].tracker_id, Some(TrackerId::new(99)));
        assert!(!logs[0].success);
    }
}
