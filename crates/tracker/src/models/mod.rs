//! Domain models for tracked entities and their telemetry

mod position;
mod stats;
mod sync_log;
mod tracker;

pub use position::{Position, PositionBuilder, PositionId};
pub use stats::{LatestPosition, StatusInfo, TrackerStats};
pub use sync_log::SyncLogEntry;
pub use tracker::{Tracker, TrackerId};
