//! Tracker model representing a remotely tracked device

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Palette for tracker display colors
const TRACKER_COLORS: [&str; 8] = [
    "#ff7b54", // coral orange
    "#a855f7", // violet purple
    "#22d3ee", // cyan
    "#facc15", // amber
    "#f472b6", // pink
    "#34d399", // emerald
    "#fb923c", // orange
    "#818cf8", // indigo
];

/// Provider-assigned tracker identifier (stable, never reused)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrackerId(pub i64);

impl TrackerId {
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }

    /// Display color derived from the tracker identity
    ///
    /// Depends only on the ID, so colors stay put when trackers are added
    /// or removed.
    pub fn display_color(&self) -> &'static str {
        let hash = self
            .0
            .to_le_bytes()
            .iter()
            .fold(0u32, |acc, b| acc.wrapping_add(*b as u32).wrapping_mul(31));
        TRACKER_COLORS[hash as usize % TRACKER_COLORS.len()]
    }
}

impl From<i64> for TrackerId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl fmt::Display for TrackerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A tracker as persisted locally
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tracker {
    pub id: TrackerId,
    /// Display name reported by the provider
    pub name: String,
    /// Exclusive upper bound of data durably stored for this tracker
    ///
    /// `None` until the first chunk completes.
    pub last_sync_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Tracker {
    /// Create a never-synced tracker
    pub fn new(id: TrackerId, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: name.into(),
            last_sync_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn color(&self) -> &'static str {
        self.id.display_color()
    }
}
