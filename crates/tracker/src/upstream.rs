//! Upstream telemetry provider abstraction

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::models::{Position, TrackerId};

/// A tracker as listed by the upstream provider
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteTracker {
    pub id: TrackerId,
    pub name: String,
}

/// Source of tracker telemetry
///
/// Calls are blocking; the sync engine runs them off the async executor and
/// gates each one through the shared rate limiter.
pub trait TelemetryProvider: Send + Sync {
    /// Establish a session for subsequent calls
    fn authenticate(&self) -> Result<()>;

    /// List every tracker visible to the account
    fn list_trackers(&self) -> Result<Vec<RemoteTracker>>;

    /// Fetch positions recorded in `[start, end)`
    ///
    /// Callers keep `end - start` within [`crate::chunk::MAX_CHUNK_SPAN`].
    fn fetch_positions(
        &self,
        tracker_id: TrackerId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Position>>;
}
