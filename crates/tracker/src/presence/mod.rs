//! Pet flap presence lookup
//!
//! Presence comes from a second provider (a SureHub pet flap) and is joined
//! to trackers by name. Results are cached for a few minutes and the last
//! good snapshot is served when the provider fails.

mod surehub;

pub use surehub::SureHubClient;

use anyhow::Result;
use chrono::{DateTime, Utc};
use log::{debug, error};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Whether a pet is indoors, and since when
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Presence {
    pub is_inside: bool,
    pub since: Option<DateTime<Utc>>,
}

/// Source of presence snapshots
pub trait PresenceProvider: Send + Sync {
    /// Current presence keyed by pet name
    fn dashboard(&self) -> Result<HashMap<String, Presence>>;
}

struct Snapshot {
    fetched_at: Instant,
    by_name: HashMap<String, Presence>,
}

/// Read-through cache over a [`PresenceProvider`]
pub struct PresenceCache<P> {
    provider: P,
    ttl: Duration,
    snapshot: Mutex<Option<Snapshot>>,
}

impl<P: PresenceProvider> PresenceCache<P> {
    pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

    pub fn new(provider: P) -> Self {
        Self {
            provider,
            ttl: Self::DEFAULT_TTL,
            snapshot: Mutex::new(None),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Presence for every known pet, keyed by lowercased name
    ///
    /// Never fails: a provider error yields the previous snapshot, or an
    /// empty map if there has never been one.
    pub fn snapshot(&self) -> HashMap<String, Presence> {
        let mut cached = self.snapshot.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(snapshot) = cached.as_ref() {
            let age = snapshot.fetched_at.elapsed();
            if age < self.ttl {
                debug!("Using cached presence ({}s old)", age.as_secs());
                return snapshot.by_name.clone();
            }
        }

        match self.provider.dashboard() {
            Ok(fresh) => {
                let by_name: HashMap<String, Presence> = fresh
                    .into_iter()
                    .map(|(name, presence)| (name.to_lowercase(), presence))
                    .collect();
                debug!("Fetched presence for {} pets", by_name.len());
                *cached = Some(Snapshot {
                    fetched_at: Instant::now(),
                    by_name: by_name.clone(),
                });
                by_name
            }
            Err(e) => {
                error!("Failed to fetch presence: {e:#}");
                cached
                    .as_ref()
                    .map(|snapshot| snapshot.by_name.clone())
                    .unwrap_or_default()
            }
        }
    }

    /// Presence for one pet, matched case-insensitively
    pub fn lookup(&self, name: &str) -> Option<Presence> {
        self.snapshot().get(&name.to_lowercase()).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeFlap {
        calls: AtomicUsize,
        failing: AtomicBool,
    }

    impl PresenceProvider for &FakeFlap {
        fn dashboard(&self) -> Result<HashMap<String, Presence>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                return Err(anyhow!("flap offline"));
            }
            Ok(HashMap::from([(
                "Bella".to_string(),
                Presence {
                    is_inside: true,
                    since: None,
                },
            )]))
        }
    }

    #[test]
    fn test_cached_within_ttl() {
        let flap = FakeFlap::default();
        let cache = PresenceCache::new(&flap);

        assert!(cache.lookup("bella").unwrap().is_inside);
        assert!(cache.lookup("BELLA").is_some());
        assert!(cache.lookup("luna").is_none());
        assert_eq!(flap.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_expired_snapshot_refetches() {
        let flap = FakeFlap::default();
        let cache = PresenceCache::new(&flap).with_ttl(Duration::ZERO);

        cache.snapshot();
        cache.snapshot();
        assert_eq!(flap.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_stale_snapshot_on_error() {
        let flap = FakeFlap::default();
        let cache = PresenceCache::new(&flap).with_ttl(Duration::ZERO);

        assert_eq!(cache.snapshot().len(), 1);
        flap.failing.store(true, Ordering::SeqCst);
        assert!(cache.lookup("Bella").is_some());
    }

    #[test]
    fn test_empty_when_never_fetched() {
        let flap = FakeFlap::default();
        flap.failing.store(true, Ordering::SeqCst);
        let cache = PresenceCache::new(&flap);

        assert!(cache.snapshot().is_empty());
    }
}
