//! Storage trait definitions

use crate::models::{
    LatestPosition, Position, StatusInfo, SyncLogEntry, Tracker, TrackerId, TrackerStats,
};
use anyhow::Result;
use chrono::{DateTime, Utc};

/// Trait for tracker storage operations
///
/// Owns all durable state: trackers (with their sync checkpoint), positions
/// deduplicated by provider ID, and the append-only operation log.
/// Implementations must tolerate readers running while a sync is writing.
pub trait TrackerStore: Send + Sync {
    /// Create the tracker if new, otherwise update its name
    ///
    /// Never touches the checkpoint.
    fn upsert_tracker(&self, id: TrackerId, name: &str) -> Result<()>;

    /// Get a tracker by ID
    fn get_tracker(&self, id: TrackerId) -> Result<Option<Tracker>>;

    /// List all trackers, ordered by name
    fn list_trackers(&self) -> Result<Vec<Tracker>>;

    /// Set the tracker's sync checkpoint
    ///
    /// Unconditional: the caller is responsible for only moving it forward.
    /// Fails if the tracker does not exist.
    fn set_checkpoint(&self, id: TrackerId, checkpoint: DateTime<Utc>) -> Result<()>;

    /// Insert a position unless one with the same ID already exists
    ///
    /// Returns `true` if the row was written. An existing row is left
    /// untouched (first write wins).
    fn insert_position(&self, position: &Position) -> Result<bool>;

    /// Insert a batch of positions atomically with the same semantics as
    /// [`TrackerStore::insert_position`]
    ///
    /// Returns the number of rows actually written.
    fn insert_positions(&self, positions: &[Position]) -> Result<usize>;

    /// Get a position by ID
    fn get_position(&self, id: &str) -> Result<Option<Position>>;

    /// List positions for a tracker within `[start, end)`, oldest first
    fn get_positions(
        &self,
        tracker_id: TrackerId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Position>>;

    /// Most recent position of every tracker that has one
    fn latest_positions(&self) -> Result<Vec<LatestPosition>>;

    /// Append an operation-log entry, returning its row ID
    fn append_sync_log(&self, entry: &SyncLogEntry) -> Result<i64>;

    /// Most recent operation-log entries, newest first
    fn recent_sync_logs(&self, limit: usize) -> Result<Vec<SyncLogEntry>>;

    /// Overall counts and the last operation outcome
    fn get_status(&self) -> Result<StatusInfo>;

    /// Per-tracker statistics, for one tracker or all of them
    fn get_stats(&self, tracker_id: Option<TrackerId>) -> Result<Vec<TrackerStats>>;
}
