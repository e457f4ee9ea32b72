// src/pipeline/extract.rs

//! Single-source extraction pipeline.
//!
//! ```text
//! PENDING → POLICY_CHECK → FETCHING → PARSING → EVALUATING → {SUCCESS, EMPTY, FAILED}
//! ```
//!
//! Pre-flight and commit runs share every stage up to classification.
//! Only a committed SUCCESS writes a snapshot.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{ExtractError, Result};
use crate::models::{Config, ExtractionResult, ResponseMetadata, Snapshot, Source};
use crate::query::{self, CompiledQuery, Dialect, Document};
use crate::services::{FetchResponse, Fetcher, PolicyResolver};
use crate::storage::{LocalSnapshotStore, SnapshotStorage};

/// Per-call extraction settings.
///
/// There is no default: callers always state whether the exclusion policy
/// is enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractOptions {
    pub enforce_policy: bool,
    pub dialect: Dialect,
    /// Pre-flight: cap values to a sample and persist nothing
    pub validate_only: bool,
}

impl ExtractOptions {
    /// Commit-mode options.
    pub fn new(enforce_policy: bool, dialect: Dialect) -> Self {
        Self {
            enforce_policy,
            dialect,
            validate_only: false,
        }
    }

    /// Switch to pre-flight mode.
    pub fn validate_only(mut self) -> Self {
        self.validate_only = true;
        self
    }
}

/// Pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Pending,
    PolicyCheck,
    Fetching,
    Parsing,
    Evaluating,
    Success,
    Empty,
    Failed,
}

impl PipelineState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Empty | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::PolicyCheck => "POLICY_CHECK",
            Self::Fetching => "FETCHING",
            Self::Parsing => "PARSING",
            Self::Evaluating => "EVALUATING",
            Self::Success => "SUCCESS",
            Self::Empty => "EMPTY",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one extraction call.
#[derive(Debug, Clone)]
pub struct ExtractionReport {
    pub source_id: String,
    /// Terminal state
    pub state: PipelineState,
    pub result: ExtractionResult,
    /// Present only for a committed SUCCESS
    pub snapshot: Option<Snapshot>,
    pub validate_only: bool,
    /// Every state entered, in order, ending with `state`
    pub stages: Vec<PipelineState>,
    pub finished_at: DateTime<Utc>,
}

impl ExtractionReport {
    pub fn is_success(&self) -> bool {
        self.state == PipelineState::Success
    }

    pub fn reason(&self) -> Option<&'static str> {
        self.result.reason()
    }
}

/// States entered by one run; each entry is logged.
struct Trail<'a> {
    source_id: &'a str,
    stages: Vec<PipelineState>,
}

impl<'a> Trail<'a> {
    fn new(source_id: &'a str) -> Self {
        Self {
            source_id,
            stages: Vec::with_capacity(7),
        }
    }

    fn enter(&mut self, state: PipelineState) {
        log::debug!("[{}] {}", self.source_id, state);
        self.stages.push(state);
    }
}

/// Values and transport facts of a run that reached classification.
struct Evaluated {
    values: Vec<String>,
    response: FetchResponse,
}

/// Extraction context: configuration, shared session, policy cache and
/// snapshot store.
pub struct Extractor {
    config: Config,
    fetcher: Arc<Fetcher>,
    policy: PolicyResolver,
    storage: Arc<dyn SnapshotStorage>,
}

impl Extractor {
    /// Build an extractor writing snapshots under `storage.snapshot_dir`.
    pub fn new(config: Config) -> Result<Self> {
        let storage = Arc::new(LocalSnapshotStore::new(&config.storage.snapshot_dir));
        Self::with_storage(config, storage)
    }

    /// Build an extractor with a custom snapshot backend.
    pub fn with_storage(config: Config, storage: Arc<dyn SnapshotStorage>) -> Result<Self> {
        config.validate()?;
        let fetcher = Arc::new(Fetcher::new(&config.crawler)?);
        let policy = PolicyResolver::new(
            Arc::clone(&fetcher),
            config.crawler.user_agent.clone(),
            &config.policy,
        );
        Ok(Self {
            config,
            fetcher,
            policy,
            storage,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn policy(&self) -> &PolicyResolver {
        &self.policy
    }

    pub fn storage(&self) -> &dyn SnapshotStorage {
        self.storage.as_ref()
    }

    /// Run the pipeline for one source.
    ///
    /// Extraction failures are reported in the returned report. `Err` means
    /// the snapshot of a successful commit could not be persisted.
    pub async fn extract(
        &self,
        source: &Source,
        options: ExtractOptions,
    ) -> Result<ExtractionReport> {
        let mut trail = Trail::new(&source.id);
        trail.enter(PipelineState::Pending);

        let outcome = self.run_stages(source, options, &mut trail).await;
        let finished_at = Utc::now();

        let (state, result, snapshot) = match outcome {
            Err(error) => {
                log::warn!("[{}] {}: {}", source.id, PipelineState::Failed, error);
                (PipelineState::Failed, ExtractionResult::failed(error), None)
            }
            Ok(evaluated) if evaluated.values.is_empty() => {
                log::info!("[{}] {}: query matched nothing", source.id, PipelineState::Empty);
                (
                    PipelineState::Empty,
                    ExtractionResult::failed(ExtractError::EmptyResult),
                    None,
                )
            }
            Ok(evaluated) => {
                let result = ExtractionResult::matched(&evaluated.values);
                let snapshot = if options.validate_only {
                    None
                } else {
                    let snapshot = Self::snapshot(source, options.dialect, finished_at, evaluated);
                    self.storage.append(&snapshot).await?;
                    Some(snapshot)
                };
                log::info!(
                    "[{}] {}: {} value(s){}",
                    source.id,
                    PipelineState::Success,
                    result.matched_count,
                    if options.validate_only { " (pre-flight)" } else { "" }
                );
                (PipelineState::Success, result, snapshot)
            }
        };

        let mut stages = trail.stages;
        stages.push(state);

        Ok(ExtractionReport {
            source_id: source.id.clone(),
            state,
            result,
            snapshot,
            validate_only: options.validate_only,
            stages,
            finished_at,
        })
    }

    /// Stages shared by pre-flight and commit runs.
    async fn run_stages(
        &self,
        source: &Source,
        options: ExtractOptions,
        trail: &mut Trail<'_>,
    ) -> std::result::Result<Evaluated, ExtractError> {
        let compiled = Self::check_source(source, options.dialect)?;

        if options.enforce_policy {
            trail.enter(PipelineState::PolicyCheck);
            if !self.policy.is_allowed(&source.url).await {
                return Err(ExtractError::PolicyDenied {
                    url: source.url.clone(),
                });
            }
        }

        trail.enter(PipelineState::Fetching);
        let response = self.fetcher.fetch(&source.url).await?;

        let values = parse_and_evaluate(trail, &compiled, &response.body)?;

        Ok(Evaluated { values, response })
    }

    /// Descriptor and query checks; no network access.
    fn check_source(
        source: &Source,
        dialect: Dialect,
    ) -> std::result::Result<CompiledQuery, ExtractError> {
        source.check_descriptor().map_err(ExtractError::config)?;
        query::compile(&source.query, dialect)
            .map_err(|e| ExtractError::config(format!("invalid query: {e}")))
    }

    fn snapshot(
        source: &Source,
        dialect: Dialect,
        captured_at: DateTime<Utc>,
        evaluated: Evaluated,
    ) -> Snapshot {
        let Evaluated { values, response } = evaluated;
        Snapshot {
            snapshot_id: Snapshot::make_id(&source.id, &captured_at, &values),
            source_id: source.id.clone(),
            category: source.category.clone(),
            url: source.url.clone(),
            query_used: source.query.clone(),
            dialect,
            captured_at,
            values,
            response_metadata: ResponseMetadata {
                status_code: response.status_code,
                elapsed_ms: response.elapsed_ms,
                size_bytes: response.size_bytes,
                attempts: response.attempts,
            },
        }
    }
}

/// Parse a body and run the query against it.
///
/// Kept synchronous: the parsed tree is not `Send` and must not live across
/// an await point.
fn parse_and_evaluate(
    trail: &mut Trail<'_>,
    compiled: &CompiledQuery,
    body: &str,
) -> std::result::Result<Vec<String>, ExtractError> {
    trail.enter(PipelineState::Parsing);
    let document = Document::try_parse(body).map_err(ExtractError::Parse)?;
    log::debug!(
        "[{}] parsed {} nodes for {}",
        trail.source_id,
        document.node_count(),
        compiled.source()
    );

    trail.enter(PipelineState::Evaluating);
    compiled
        .evaluate(&document)
        .map_err(|e| ExtractError::config(format!("query evaluation failed: {e}")))
}
