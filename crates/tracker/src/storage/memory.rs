//! In-memory storage implementation
//!
//! Used for tests and dry runs; nothing survives the process.

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::TrackerStore;
use crate::models::{
    LatestPosition, Position, StatusInfo, SyncLogEntry, Tracker, TrackerId, TrackerStats,
};

/// In-memory implementation of TrackerStore
///
/// Uses HashMaps protected by RwLocks for thread-safe access.
pub struct InMemoryTrackerStore {
    trackers: RwLock<HashMap<TrackerId, Tracker>>,
    positions: RwLock<HashMap<String, Position>>,
    sync_log: RwLock<Vec<SyncLogEntry>>,
}

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>> {
    lock.read().map_err(|_| anyhow!("in-memory store lock poisoned"))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>> {
    lock.write().map_err(|_| anyhow!("in-memory store lock poisoned"))
}

impl InMemoryTrackerStore {
    /// Create a new empty in-memory store
    pub fn new() -> Self {
        Self {
            trackers: RwLock::new(HashMap::new()),
            positions: RwLock::new(HashMap::new()),
            sync_log: RwLock::new(Vec::new()),
        }
    }

    fn sorted_trackers(trackers: &HashMap<TrackerId, Tracker>) -> Vec<Tracker> {
        let mut list: Vec<Tracker> = trackers.values().cloned().collect();
        list.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        list
    }
}

impl Default for InMemoryTrackerStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TrackerStore for InMemoryTrackerStore {
    fn upsert_tracker(&self, id: TrackerId, name: &str) -> Result<()> {
        let mut trackers = write(&self.trackers)?;
        match trackers.get_mut(&id) {
            Some(tracker) => {
                tracker.name = name.to_string();
                tracker.updated_at = Utc::now();
            }
            None => {
                trackers.insert(id, Tracker::new(id, name));
            }
        }
        Ok(())
    }

    fn get_tracker(&self, id: TrackerId) -> Result<Option<Tracker>> {
        Ok(read(&self.trackers)?.get(&id).cloned())
    }

    fn list_trackers(&self) -> Result<Vec<Tracker>> {
        Ok(Self::sorted_trackers(&*read(&self.trackers)?))
    }

    fn set_checkpoint(&self, id: TrackerId, checkpoint: DateTime<Utc>) -> Result<()> {
        let mut trackers = write(&self.trackers)?;
        let tracker = trackers
            .get_mut(&id)
            .ok_or_else(|| anyhow!("tracker {id} does not exist"))?;
        tracker.last_sync_at = Some(checkpoint);
        tracker.updated_at = Utc::now();
        Ok(())
    }

    fn insert_position(&self, position: &Position) -> Result<bool> {
        Ok(self.insert_positions(std::slice::from_ref(position))? == 1)
    }

    fn insert_positions(&self, positions: &[Position]) -> Result<usize> {
        let trackers = read(&self.trackers)?;
        if let Some(orphan) = positions.iter().find(|p| !trackers.contains_key(&p.tracker_id)) {
            return Err(anyhow!(
                "position {} references unknown tracker {}",
                orphan.id.as_str(),
                orphan.tracker_id
            ));
        }

        let mut stored = write(&self.positions)?;
        let mut inserted = 0;
        for position in positions {
            if !stored.contains_key(position.id.as_str()) {
                stored.insert(position.id.0.clone(), position.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    fn get_position(&self, id: &str) -> Result<Option<Position>> {
        Ok(read(&self.positions)?.get(id).cloned())
    }

    fn get_positions(
        &self,
        tracker_id: TrackerId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Position>> {
        let mut positions: Vec<Position> = read(&self.positions)?
            .values()
            .filter(|p| p.tracker_id == tracker_id && p.timestamp >= start && p.timestamp < end)
            .cloned()
            .collect();
        positions.sort_by_key(|p| p.timestamp);
        Ok(positions)
    }

    fn latest_positions(&self) -> Result<Vec<LatestPosition>> {
        let positions = read(&self.positions)?;
        let trackers = read(&self.trackers)?;

        let mut latest: HashMap<TrackerId, &Position> = HashMap::new();
        for position in positions.values() {
            let entry = latest.entry(position.tracker_id).or_insert(position);
            if position.timestamp > entry.timestamp {
                *entry = position;
            }
        }

        Ok(Self::sorted_trackers(&trackers)
            .into_iter()
            .filter_map(|tracker| {
                latest.get(&tracker.id).map(|position| LatestPosition {
                    tracker_name: tracker.name.clone(),
                    position: (*position).clone(),
                })
            })
            .collect())
    }

    fn append_sync_log(&self, entry: &SyncLogEntry) -> Result<i64> {
        let mut log = write(&self.sync_log)?;
        let id = log.len() as i64 + 1;
        let mut entry = entry.clone();
        entry.id = Some(id);
        log.push(entry);
        Ok(id)
    }

    fn recent_sync_logs(&self, limit: usize) -> Result<Vec<SyncLogEntry>> {
        let mut entries = read(&self.sync_log)?.clone();
        entries.sort_by(|a, b| b.sync_time.cmp(&a.sync_time).then(b.id.cmp(&a.id)));
        entries.truncate(limit);
        Ok(entries)
    }

    fn get_status(&self) -> Result<StatusInfo> {
        Ok(StatusInfo {
            tracker_count: read(&self.trackers)?.len(),
            position_count: read(&self.positions)?.len(),
            last_sync: self.recent_sync_logs(1)?.into_iter().next(),
        })
    }

    fn get_stats(&self, tracker_id: Option<TrackerId>) -> Result<Vec<TrackerStats>> {
        let trackers = read(&self.trackers)?;
        let positions = read(&self.positions)?;

        Ok(Self::sorted_trackers(&trackers)
            .into_iter()
            .filter(|t| tracker_id.is_none_or(|id| id == t.id))
            .map(|tracker| {
                let timestamps: Vec<_> = positions
                    .values()
                    .filter(|p| p.tracker_id == tracker.id)
                    .map(|p| p.timestamp)
                    .collect();
                TrackerStats {
                    tracker_id: tracker.id,
                    tracker_name: tracker.name,
                    position_count: timestamps.len(),
                    first_position: timestamps.iter().min().copied(),
                    last_position: timestamps.iter().max().copied(),
                    last_sync: tracker.last_sync_at,
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PositionId;
    use chrono::{TimeDelta, TimeZone};

    fn make_position(id: &str, tracker: i64, minutes: i64) -> Position {
        Position::builder(PositionId::new(id), TrackerId::new(tracker))
            .timestamp(Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap() + TimeDelta::minutes(minutes))
            .coordinates(59.0, 10.0)
            .build()
    }

    #[test]
    fn test_first_write_wins() {
        let store = InMemoryTrackerStore::new();
        store.upsert_tracker(TrackerId::new(1), "Luna").unwrap();

        let original = make_position("p1", 1, 0);
        let mut changed = original.clone();
        changed.latitude = 61.0;

        assert!(store.insert_position(&original).unwrap());
        assert!(!store.insert_position(&changed).unwrap());
        assert_eq!(store.get_position("p1").unwrap(), Some(original));
    }

    #[test]
    fn test_rejects_positions_for_unknown_tracker() {
        let store = InMemoryTrackerStore::new();
        store.upsert_tracker(TrackerId::new(1), "Luna").unwrap();

        let batch = vec![make_position("p1", 1, 0), make_position("p2", 2, 0)];
        assert!(store.insert_positions(&batch).is_err());
        assert!(store.get_position("p1").unwrap().is_none());
    }

    #[test]
    fn test_latest_and_stats() {
        let store = InMemoryTrackerStore::new();
        store.upsert_tracker(TrackerId::new(1), "Luna").unwrap();
        store.upsert_tracker(TrackerId::new(2), "Bella").unwrap();
        store
            .insert_positions(&[make_position("a", 1, 0), make_position("b", 1, 10)])
            .unwrap();

        let latest = store.latest_positions().unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].position.id.as_str(), "b");

        let stats = store.get_stats(None).unwrap();
        assert_eq!(stats[0].tracker_name, "Bella");
        assert_eq!(stats[1].position_count, 2);
    }
}
