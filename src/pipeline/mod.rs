//! Pipeline entry points.
//!
//! - `Extractor::extract`: one source, pre-flight or commit
//! - `run_batch`: many sources, grouped by origin
//! - `run_validate`: offline configuration and registry checks

pub mod batch;
pub mod extract;
pub mod validate;

pub use batch::{BatchReport, BatchSummary, SourceFailure, run_batch};
pub use extract::{ExtractOptions, ExtractionReport, Extractor, PipelineState};
pub use validate::{SourceIssue, run_validate, validate_sources};
