// src/error.rs

//! Unified error handling for the extraction engine.
//!
//! Two layers live here:
//! - [`AppError`] for infrastructure faults (I/O, serialization, config loading).
//! - [`ExtractError`] / [`FetchError`] for the typed outcome of a single extraction.

use std::fmt;

use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client could not be built or a request failed outside the fetch layer
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Snapshot storage error
    #[error("Storage error for {context}: {message}")]
    Storage { context: String, message: String },

    /// Unknown source identifier
    #[error("Source not found: {0}")]
    SourceNotFound(String),
}

impl AppError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a storage error with context.
    pub fn storage(context: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Storage {
            context: context.into(),
            message: message.to_string(),
        }
    }
}

/// Terminal failure of a fetch after the retry loop gave up.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Server answered with a non-success status
    #[error("HTTP {status} from {url} after {attempts} attempt(s)")]
    Status {
        url: String,
        status: u16,
        attempts: u32,
    },

    /// Network, timeout or body read failure
    #[error("request to {url} failed after {attempts} attempt(s): {message}")]
    Transport {
        url: String,
        attempts: u32,
        message: String,
    },

    /// URL could not be parsed or has no origin
    #[error("invalid URL '{url}': {message}")]
    InvalidUrl { url: String, message: String },
}

impl FetchError {
    /// Number of attempts made before giving up.
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Status { attempts, .. } | Self::Transport { attempts, .. } => *attempts,
            Self::InvalidUrl { .. } => 0,
        }
    }

    /// Status code of the last response, if the server answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Why an extraction did not end in SUCCESS.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExtractError {
    /// Enforcement was requested and the exclusion policy disallows the URL
    #[error("policy_denied: {url} is disallowed by robots.txt")]
    PolicyDenied { url: String },

    /// Fetch failed after retries, or with a permanent status
    #[error("fetch_error: {0}")]
    Fetch(#[from] FetchError),

    /// Response body could not be turned into a document tree
    #[error("parse_error: {0}")]
    Parse(String),

    /// Query matched nothing on a well-formed document
    #[error("empty_result: query matched no values")]
    EmptyResult,

    /// Source descriptor or query is malformed
    #[error("config_error: {0}")]
    Config(String),
}

impl ExtractError {
    /// Stable reason string used in reports and the source registry.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::PolicyDenied { .. } => "policy_denied",
            Self::Fetch(_) => "fetch_error",
            Self::Parse(_) => "parse_error",
            Self::EmptyResult => "empty_result",
            Self::Config(_) => "config_error",
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_strings() {
        let denied = ExtractError::PolicyDenied {
            url: "http://example.org/".into(),
        };
        assert_eq!(denied.reason(), "policy_denied");
        assert_eq!(ExtractError::EmptyResult.reason(), "empty_result");
        assert_eq!(ExtractError::config("bad").reason(), "config_error");
        assert_eq!(ExtractError::Parse("x".into()).reason(), "parse_error");
    }

    #[test]
    fn test_fetch_error_accessors() {
        let err = FetchError::Status {
            url: "http://example.org/".into(),
            status: 503,
            attempts: 3,
        };
        assert_eq!(err.attempts(), 3);
        assert_eq!(err.status(), Some(503));

        let wrapped = ExtractError::from(err);
        assert_eq!(wrapped.reason(), "fetch_error");
        assert!(wrapped.to_string().contains("503"));
    }
}
