//! Persistence for snapshots and the source registry.
//!
//! ## Directory Structure
//!
//! ```text
//! storage/
//! ├── sources.json                  # Source registry
//! └── snapshots/
//!     └── {category}/
//!         └── {source_id}/
//!             ├── 20260101T090000.000000Z.json
//!             └── 20260102T090000.000000Z.json
//! ```
//!
//! Snapshot files are written once and never rewritten or removed.

pub mod local;
pub mod registry;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::Snapshot;

pub use local::LocalSnapshotStore;
pub use registry::SourceRegistry;

/// Append-only snapshot history.
#[async_trait]
pub trait SnapshotStorage: Send + Sync {
    /// Persist a snapshot, returning the key it was stored under.
    ///
    /// Existing snapshots are never overwritten.
    async fn append(&self, snapshot: &Snapshot) -> Result<String>;

    /// Snapshots of one source captured at or after `since`, oldest first.
    async fn list_history(
        &self,
        source_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Snapshot>>;
}
