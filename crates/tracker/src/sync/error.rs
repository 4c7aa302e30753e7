//! Failure taxonomy surfaced by the sync engine

use super::Interrupted;
use crate::models::TrackerId;

/// Error from a sync or backfill invocation
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Login failed; no tracker was processed
    #[error("authentication failed: {0:#}")]
    Authentication(anyhow::Error),

    /// Listing trackers failed; no tracker was processed
    #[error("failed to list trackers: {0:#}")]
    ListTrackers(anyhow::Error),

    /// Fetching positions for one tracker failed
    #[error("failed to fetch positions for tracker {tracker_id}: {error:#}")]
    Fetch {
        tracker_id: TrackerId,
        error: anyhow::Error,
    },

    /// A position insert or checkpoint write failed
    #[error("storage failure: {0:#}")]
    Storage(anyhow::Error),

    /// The invocation was cancelled or ran past its deadline
    #[error(transparent)]
    Interrupted(#[from] Interrupted),

    /// The upstream does not know the requested tracker
    #[error("tracker {0} not found upstream")]
    UnknownTracker(TrackerId),

    /// A fleet operation finished with at least one tracker failing
    #[error("sync completed with {failed} of {total} trackers failed")]
    TrackersFailed { failed: usize, total: usize },
}

impl SyncError {
    /// Whether the error came from cancellation or a deadline rather than
    /// an upstream or storage failure
    pub fn is_interrupted(&self) -> bool {
        matches!(self, SyncError::Interrupted(_))
    }
}
