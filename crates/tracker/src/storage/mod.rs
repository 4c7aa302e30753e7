//! Storage traits and implementations
//!
//! The trait-based design allows swapping between the SQLite store used by
//! the daemon and the in-memory store used in tests.

mod memory;
mod sqlite;
mod traits;

pub use memory::InMemoryTrackerStore;
pub use sqlite::SqliteTrackerStore;
pub use traits::TrackerStore;
