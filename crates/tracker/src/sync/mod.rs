//! Sync engine for fetching and storing tracker positions
//!
//! Provides resumable sync operations that can be safely retried: positions
//! are deduplicated on insert and each tracker's checkpoint only moves
//! forward after the positions below it are stored.

mod context;
mod engine;
mod error;

pub use context::{Interrupted, SyncContext};
pub use engine::{SyncOptions, SyncStats, SyncWorker};
pub use error::SyncError;
