// src/models/source.rs

//! Extraction target descriptors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of the most recent committed check of a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ValidationStatus {
    #[default]
    Pending,
    Success,
    Failure,
}

/// A configured extraction target.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Source {
    /// Unique identifier, also used as a storage path segment
    pub id: String,

    /// Display name
    pub name: String,

    /// Page to fetch
    pub url: String,

    /// Path-query evaluated against the fetched page
    pub query: String,

    /// Grouping used for the snapshot layout
    #[serde(default = "default_category")]
    pub category: String,

    /// Desired seconds between checks; read, never enforced
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval: u64,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_validated: Option<DateTime<Utc>>,

    #[serde(default)]
    pub validation_status: ValidationStatus,

    /// Reason string of the last failed check
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    /// Failed checks since the last success
    #[serde(default)]
    pub consecutive_failures: u32,
}

fn default_category() -> String {
    "uncategorized".to_string()
}

fn default_refresh_interval() -> u64 {
    86_400
}

fn default_enabled() -> bool {
    true
}

impl Source {
    /// Create a pending, enabled source.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        url: impl Into<String>,
        query: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            url: url.into(),
            query: query.into(),
            category: default_category(),
            refresh_interval: default_refresh_interval(),
            enabled: true,
            created_at: Utc::now(),
            last_validated: None,
            validation_status: ValidationStatus::Pending,
            last_error: None,
            consecutive_failures: 0,
        }
    }

    /// Set the category (builder style).
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    /// Whether the refresh interval has elapsed since the last check.
    ///
    /// Never-checked sources are always due.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.last_validated {
            None => true,
            Some(last) => {
                let secs = i64::try_from(self.refresh_interval).unwrap_or(i64::MAX);
                now.signed_duration_since(last).num_seconds() >= secs
            }
        }
    }

    /// Check descriptor fields that can be judged without the query dialect.
    ///
    /// Returns a human-readable problem description on failure.
    pub fn check_descriptor(&self) -> Result<url::Url, String> {
        if self.id.trim().is_empty() {
            return Err("source id is empty".to_string());
        }
        if !is_safe_segment(&self.id) {
            return Err(format!("source id '{}' is not a safe path segment", self.id));
        }
        if !is_safe_segment(&self.category) {
            return Err(format!(
                "category '{}' is not a safe path segment",
                self.category
            ));
        }
        if self.query.trim().is_empty() {
            return Err(format!("source '{}' has an empty query", self.id));
        }

        let parsed = url::Url::parse(&self.url)
            .map_err(|e| format!("source '{}' has invalid url '{}': {e}", self.id, self.url))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(format!(
                "source '{}' url must be http(s), got '{}'",
                self.id,
                parsed.scheme()
            ));
        }
        if parsed.host_str().is_none() {
            return Err(format!("source '{}' url has no host", self.id));
        }
        Ok(parsed)
    }
}

/// Segments become directory names in the snapshot store.
fn is_safe_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment != "."
        && segment != ".."
        && segment
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.'))
}
