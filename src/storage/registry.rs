//! File-backed source registry.
//!
//! Sources live in a single JSON array (`sources.json`). Committed reports
//! update validation bookkeeping; a source that keeps failing is disabled,
//! never removed.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;

use crate::error::{AppError, Result};
use crate::models::{Source, ValidationStatus};
use crate::pipeline::ExtractionReport;

/// Registry of extraction targets backed by a JSON file.
#[derive(Debug, Clone)]
pub struct SourceRegistry {
    path: PathBuf,
    sources: Vec<Source>,
    max_consecutive_failures: u32,
}

impl SourceRegistry {
    /// Empty registry that will be saved to `path`.
    pub fn new(path: impl Into<PathBuf>, max_consecutive_failures: u32) -> Self {
        Self {
            path: path.into(),
            sources: Vec::new(),
            max_consecutive_failures: max_consecutive_failures.max(1),
        }
    }

    /// Load the registry. A missing file yields an empty registry.
    pub async fn load(path: impl Into<PathBuf>, max_consecutive_failures: u32) -> Result<Self> {
        let mut registry = Self::new(path, max_consecutive_failures);
        match tokio::fs::read(&registry.path).await {
            Ok(bytes) => {
                registry.sources = serde_json::from_slice(&bytes)
                    .map_err(|e| AppError::storage(registry.path.display().to_string(), e))?;
                log::debug!(
                    "Loaded {} sources from {:?}",
                    registry.sources.len(),
                    registry.path
                );
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                log::warn!("No registry at {:?}, starting empty", registry.path);
            }
            Err(e) => return Err(AppError::Io(e)),
        }
        Ok(registry)
    }

    /// Write the registry atomically (temp file, then rename).
    pub async fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = serde_json::to_vec_pretty(&self.sources)?;

        let tmp = self.path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&bytes).await?;
        file.flush().await?;
        drop(file);

        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    pub fn get(&self, source_id: &str) -> Option<&Source> {
        self.sources.iter().find(|s| s.id == source_id)
    }

    /// Enabled sources in registry order.
    pub fn enabled(&self) -> Vec<&Source> {
        self.sources.iter().filter(|s| s.enabled).collect()
    }

    /// Add a source, or replace the one with the same id.
    pub fn upsert(&mut self, source: Source) {
        match self.sources.iter_mut().find(|s| s.id == source.id) {
            Some(existing) => *existing = source,
            None => self.sources.push(source),
        }
    }

    /// Apply a committed report to its source.
    ///
    /// Pre-flight reports change nothing and return `false`.
    pub fn record(&mut self, report: &ExtractionReport) -> Result<bool> {
        if report.validate_only {
            return Ok(false);
        }

        let max_failures = self.max_consecutive_failures;
        let source = self
            .sources
            .iter_mut()
            .find(|s| s.id == report.source_id)
            .ok_or_else(|| AppError::SourceNotFound(report.source_id.clone()))?;

        source.last_validated = Some(report.finished_at);
        if report.is_success() {
            source.validation_status = ValidationStatus::Success;
            source.last_error = None;
            source.consecutive_failures = 0;
        } else {
            source.validation_status = ValidationStatus::Failure;
            source.last_error = report.reason().map(str::to_string);
            source.consecutive_failures += 1;

            if source.enabled && source.consecutive_failures >= max_failures {
                source.enabled = false;
                log::warn!(
                    "Source {} disabled after {} consecutive failures (last: {})",
                    source.id,
                    source.consecutive_failures,
                    source.last_error.as_deref().unwrap_or("unknown")
                );
            }
        }
        Ok(true)
    }
}
