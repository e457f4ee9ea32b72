//! Local filesystem snapshot store.
//!
//! ## Storage Layout
//!
//! ```text
//! {root}/
//! └── {category}/
//!     └── {source_id}/
//!         ├── 20260101T090000.000000Z.json
//!         └── 20260101T090000.000000Z_1.json   # same-instant collision
//! ```
//!
//! File names sort lexically in capture order. A write goes to a hidden
//! temp file first and is then hard-linked under its final name, which
//! fails instead of replacing an existing snapshot.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::AsyncWriteExt;

use crate::error::{AppError, Result};
use crate::models::Snapshot;
use crate::storage::SnapshotStorage;

/// Snapshot store rooted at a local directory.
#[derive(Debug, Clone)]
pub struct LocalSnapshotStore {
    root_dir: PathBuf,
}

impl LocalSnapshotStore {
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
        }
    }

    /// Lexically sortable file stem for a capture time.
    fn file_stem(captured_at: &DateTime<Utc>) -> String {
        captured_at.format("%Y%m%dT%H%M%S%.6fZ").to_string()
    }

    /// Write bytes under `{stem}.json`, or `{stem}_{n}.json` if taken.
    async fn write_new(&self, dir: &Path, stem: &str, tag: &str, bytes: &[u8]) -> Result<String> {
        tokio::fs::create_dir_all(dir).await?;

        // Identical snapshots share a tag; the nonce keeps concurrent writers apart
        let tmp = dir.join(format!(".{tag}.{:016x}.tmp", rand::random::<u64>()));
        if let Err(e) = Self::write_tmp(&tmp, bytes).await {
            if let Err(cleanup) = tokio::fs::remove_file(&tmp).await {
                log::debug!("Temp file {:?} not removed: {}", tmp, cleanup);
            }
            return Err(e);
        }

        let mut suffix = 0u32;
        let linked = loop {
            let name = if suffix == 0 {
                format!("{stem}.json")
            } else {
                format!("{stem}_{suffix}.json")
            };
            match tokio::fs::hard_link(&tmp, dir.join(&name)).await {
                Ok(()) => break Ok(name),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => suffix += 1,
                Err(e) => break Err(e),
            }
        };

        if let Err(e) = tokio::fs::remove_file(&tmp).await {
            log::warn!("Could not remove temp file {:?}: {}", tmp, e);
        }
        linked.map_err(AppError::from)
    }

    async fn write_tmp(tmp: &Path, bytes: &[u8]) -> Result<()> {
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(tmp)
            .await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        Ok(())
    }

    async fn read_snapshot(path: &Path) -> Result<Snapshot> {
        let bytes = tokio::fs::read(path).await?;
        serde_json::from_slice(&bytes)
            .map_err(|e| AppError::storage(path.display().to_string(), e))
    }

    /// Snapshot files of one source across all categories, sorted by name.
    async fn history_files(&self, source_id: &str) -> Result<Vec<PathBuf>> {
        let mut categories = match tokio::fs::read_dir(&self.root_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(AppError::Io(e)),
        };

        let mut files = Vec::new();
        while let Some(category) = categories.next_entry().await? {
            let dir = category.path().join(source_id);
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound || e.kind() == ErrorKind::NotADirectory => {
                    continue;
                }
                Err(e) => return Err(AppError::Io(e)),
            };
            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name();
                let name = name.to_string_lossy();
                if !name.starts_with('.') && name.ends_with(".json") {
                    files.push(entry.path());
                }
            }
        }

        files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
        Ok(files)
    }
}

#[async_trait]
impl SnapshotStorage for LocalSnapshotStore {
    async fn append(&self, snapshot: &Snapshot) -> Result<String> {
        let dir = self
            .root_dir
            .join(&snapshot.category)
            .join(&snapshot.source_id);
        let stem = Self::file_stem(&snapshot.captured_at);
        let bytes = serde_json::to_vec_pretty(snapshot)?;

        let name = self
            .write_new(&dir, &stem, &snapshot.snapshot_id, &bytes)
            .await?;
        let key = format!("{}/{}/{}", snapshot.category, snapshot.source_id, name);
        log::info!(
            "Snapshot {} ({} values) written to {}",
            snapshot.snapshot_id,
            snapshot.values.len(),
            key
        );
        Ok(key)
    }

    async fn list_history(
        &self,
        source_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Snapshot>> {
        let mut history = Vec::new();
        for path in self.history_files(source_id).await? {
            let snapshot = Self::read_snapshot(&path).await?;
            if since.is_none_or(|since| snapshot.captured_at >= since) {
                history.push(snapshot);
            }
        }
        // Stable: same-instant captures keep their file order
        history.sort_by_key(|snapshot| snapshot.captured_at);
        Ok(history)
    }
}
