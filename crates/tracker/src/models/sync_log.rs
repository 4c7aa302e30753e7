//! Operation log entries, one per top-level sync or backfill invocation

use super::TrackerId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Append-only record of a sync or backfill invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncLogEntry {
    /// Row ID, assigned by the store on append
    pub id: Option<i64>,
    /// Tracker the operation targeted (`None` for whole-fleet operations)
    pub tracker_id: Option<TrackerId>,
    /// When the operation started
    pub sync_time: DateTime<Utc>,
    pub positions_fetched: usize,
    /// Requested range, when the operation had a single one
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub success: bool,
    pub error_message: Option<String>,
    pub duration_ms: u64,
}

impl SyncLogEntry {
    /// Start an entry for an operation that began at `sync_time`
    pub fn new(tracker_id: Option<TrackerId>, sync_time: DateTime<Utc>) -> Self {
        Self {
            id: None,
            tracker_id,
            sync_time,
            positions_fetched: 0,
            start_date: None,
            end_date: None,
            success: true,
            error_message: None,
            duration_ms: 0,
        }
    }

    pub fn with_range(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.start_date = Some(start);
        self.end_date = Some(end);
        self
    }

    pub fn with_positions(mut self, positions_fetched: usize) -> Self {
        self.positions_fetched = positions_fetched;
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    /// Mark the entry failed with a human-readable summary
    pub fn failed(mut self, message: impl Into<String>) -> Self {
        self.success = false;
        self.error_message = Some(message.into());
        self
    }
}
