// src/models/snapshot.rs

//! Extraction results and persisted snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::ExtractError;
use crate::query::Dialect;

/// Maximum number of values kept in an [`ExtractionResult`] sample.
pub const SAMPLE_LIMIT: usize = 3;

/// Transport facts about the response a snapshot was taken from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResponseMetadata {
    pub status_code: u16,
    pub elapsed_ms: u64,
    pub size_bytes: usize,
    /// Attempts the fetch layer needed, including the successful one
    #[serde(default = "one")]
    pub attempts: u32,
}

fn one() -> u32 {
    1
}

/// One immutable, timestamped capture of a source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Snapshot {
    pub snapshot_id: String,
    pub source_id: String,
    pub category: String,
    pub url: String,
    pub query_used: String,
    pub dialect: Dialect,
    pub captured_at: DateTime<Utc>,
    pub values: Vec<String>,
    pub response_metadata: ResponseMetadata,
}

impl Snapshot {
    /// Derive a short content-addressed identifier.
    pub fn make_id(source_id: &str, captured_at: &DateTime<Utc>, values: &[String]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(source_id.as_bytes());
        hasher.update(captured_at.to_rfc3339().as_bytes());
        for value in values {
            hasher.update([0u8]);
            hasher.update(value.as_bytes());
        }
        hex::encode(hasher.finalize())[..16].to_string()
    }
}

/// Transient summary of one pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionResult {
    pub success: bool,
    pub matched_count: usize,
    /// First values, capped at [`SAMPLE_LIMIT`]
    pub sample: Vec<String>,
    pub error: Option<ExtractError>,
}

impl ExtractionResult {
    pub fn matched(values: &[String]) -> Self {
        Self {
            success: true,
            matched_count: values.len(),
            sample: values.iter().take(SAMPLE_LIMIT).cloned().collect(),
            error: None,
        }
    }

    pub fn failed(error: ExtractError) -> Self {
        Self {
            success: false,
            matched_count: 0,
            sample: Vec::new(),
            error: Some(error),
        }
    }

    /// Reason string of the failure, if any.
    pub fn reason(&self) -> Option<&'static str> {
        self.error.as_ref().map(ExtractError::reason)
    }
}
