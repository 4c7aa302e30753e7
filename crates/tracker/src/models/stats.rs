//! Read-side summaries for status and statistics queries

use super::{Position, SyncLogEntry, TrackerId};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Overall daemon status
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusInfo {
    pub tracker_count: usize,
    pub position_count: usize,
    /// Most recent operation-log entry, if any sync has ever run
    pub last_sync: Option<SyncLogEntry>,
}

/// Per-tracker statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackerStats {
    pub tracker_id: TrackerId,
    pub tracker_name: String,
    pub position_count: usize,
    pub first_position: Option<DateTime<Utc>>,
    pub last_position: Option<DateTime<Utc>>,
    pub last_sync: Option<DateTime<Utc>>,
}

/// Most recent fix for a tracker, joined with its name
#[derive(Debug, Clone, Serialize)]
pub struct LatestPosition {
    pub tracker_name: String,
    pub position: Position,
}
