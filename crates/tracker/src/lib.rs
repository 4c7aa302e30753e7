//! Tracker crate - Business logic for GPS telemetry ingestion
//!
//! This crate provides platform-independent tracker functionality including:
//! - Domain models (Tracker, Position, SyncLogEntry)
//! - Weenect API client behind the `TelemetryProvider` trait
//! - Token-bucket rate limiting for upstream calls
//! - Storage trait abstractions with SQLite and in-memory backends
//! - Resumable, chunked sync engine
//! - Pet flap presence cache
//!
//! The binary owns logging setup and scheduling; everything here logs
//! through the `log` facade and runs on any tokio runtime.

pub mod chunk;
pub mod config;
pub mod models;
pub mod presence;
pub mod ratelimit;
pub mod storage;
pub mod sync;
pub mod upstream;
pub mod weenect;

pub use crate::config::DaemonConfig;
pub use chunk::{MAX_CHUNK_SPAN, TimeChunk, chunk_range};
pub use models::{
    LatestPosition, Position, PositionBuilder, PositionId, StatusInfo, SyncLogEntry, Tracker,
    TrackerId, TrackerStats,
};
pub use presence::{Presence, PresenceCache, PresenceProvider, SureHubClient};
pub use ratelimit::RateLimiter;
pub use storage::{InMemoryTrackerStore, SqliteTrackerStore, TrackerStore};
pub use sync::{Interrupted, SyncContext, SyncError, SyncOptions, SyncStats, SyncWorker};
pub use upstream::{RemoteTracker, TelemetryProvider};
pub use weenect::WeenectClient;
