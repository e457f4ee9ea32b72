// src/models/mod.rs

//! Domain models for the extraction engine.
//!
//! This module contains the data structures shared across the engine,
//! organized by their primary purpose.

mod config;
mod snapshot;
mod source;

// Re-export all public types
pub use config::{
    Config, CrawlerConfig, LoggingConfig, Politeness, PolicyConfig, RegistryConfig,
    StorageConfig,
};
pub use snapshot::{ExtractionResult, ResponseMetadata, SAMPLE_LIMIT, Snapshot};
pub use source::{Source, ValidationStatus};
