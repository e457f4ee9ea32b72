// src/pipeline/batch.rs

//! Batch extraction over many sources.
//!
//! Sources sharing an origin run one after another; distinct origins run
//! concurrently, bounded by `crawler.max_concurrent`.

use futures::stream::{self, StreamExt};

use crate::error::AppError;
use crate::models::Source;
use crate::pipeline::extract::{ExtractOptions, ExtractionReport, Extractor, PipelineState};
use crate::utils::origin_str;

/// Terminal-state counts of a batch.
///
/// Sources whose snapshot could not be persisted count as failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub total: usize,
    pub success: usize,
    pub empty: usize,
    pub failed: usize,
}

impl BatchSummary {
    fn tally(reports: &[ExtractionReport], errors: &[SourceFailure]) -> Self {
        let mut summary = Self {
            total: reports.len() + errors.len(),
            failed: errors.len(),
            ..Self::default()
        };
        for report in reports {
            match report.state {
                PipelineState::Success => summary.success += 1,
                PipelineState::Empty => summary.empty += 1,
                _ => summary.failed += 1,
            }
        }
        summary
    }
}

/// A source whose successful extraction could not be persisted.
#[derive(Debug)]
pub struct SourceFailure {
    pub source_id: String,
    pub error: AppError,
}

/// Per-source outcomes in input order, plus counts.
#[derive(Debug)]
pub struct BatchReport {
    pub reports: Vec<ExtractionReport>,
    pub errors: Vec<SourceFailure>,
    pub summary: BatchSummary,
}

/// Group sources by origin, keeping first-seen order.
fn group_by_origin<'a>(sources: &'a [Source]) -> Vec<(String, Vec<(usize, &'a Source)>)> {
    let mut groups: Vec<(String, Vec<(usize, &Source)>)> = Vec::new();
    for (index, source) in sources.iter().enumerate() {
        let origin = origin_str(&source.url).unwrap_or_else(|| source.url.clone());
        match groups.iter_mut().find(|(key, _)| *key == origin) {
            Some((_, members)) => members.push((index, source)),
            None => groups.push((origin, vec![(index, source)])),
        }
    }
    groups
}

/// Extract every source.
///
/// A persistence failure affects only its own source: it is listed in
/// `errors` while every other report is kept.
pub async fn run_batch(
    extractor: &Extractor,
    sources: &[Source],
    options: ExtractOptions,
) -> BatchReport {
    let groups = group_by_origin(sources);
    let concurrency = extractor.config().crawler.max_concurrent.max(1);
    log::info!(
        "Extracting {} sources across {} origins ({} concurrent)",
        sources.len(),
        groups.len(),
        concurrency
    );

    let mut group_stream = stream::iter(groups)
        .map(|(origin, members)| async move {
            let mut outcomes = Vec::with_capacity(members.len());
            for (index, source) in members {
                let outcome = extractor
                    .extract(source, options)
                    .await
                    .map_err(|error| SourceFailure {
                        source_id: source.id.clone(),
                        error,
                    });
                outcomes.push((index, outcome));
            }
            log::debug!("Origin {} done ({} sources)", origin, outcomes.len());
            outcomes
        })
        .buffer_unordered(concurrency);

    let mut indexed = Vec::with_capacity(sources.len());
    while let Some(outcomes) = group_stream.next().await {
        indexed.extend(outcomes);
    }
    indexed.sort_by_key(|(index, _)| *index);

    let mut reports = Vec::with_capacity(indexed.len());
    let mut errors = Vec::new();
    for (_, outcome) in indexed {
        match outcome {
            Ok(report) => reports.push(report),
            Err(failure) => {
                log::error!("{}: {}", failure.source_id, failure.error);
                errors.push(failure);
            }
        }
    }

    let summary = BatchSummary::tally(&reports, &errors);
    log::info!(
        "Batch finished: {} success, {} empty, {} failed",
        summary.success,
        summary.empty,
        summary.failed
    );

    BatchReport {
        reports,
        errors,
        summary,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};

    use crate::error::Result;
    use crate::models::{Config, Snapshot};
    use crate::query::Dialect;
    use crate::storage::{LocalSnapshotStore, SnapshotStorage};
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_grouping_keeps_first_seen_order() {
        let sources = vec![
            Source::new("a1", "A1", "https://a.example/1", "//h1"),
            Source::new("b1", "B1", "https://b.example/1", "//h1"),
            Source::new("a2", "A2", "https://a.example/2", "//h1"),
            Source::new("a3", "A3", "http://a.example/3", "//h1"),
        ];
        let groups = group_by_origin(&sources);

        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0].0, "https://a.example");
        let ids: Vec<_> = groups[0].1.iter().map(|(_, s)| s.id.as_str()).collect();
        assert_eq!(ids, vec!["a1", "a2"]);
        assert_eq!(groups[2].0, "http://a.example");
    }

    #[tokio::test]
    async fn test_batch_reports_in_input_order_with_summary() {
        let first = MockServer::start().await;
        let second = MockServer::start().await;
        for server in [&first, &second] {
            Mock::given(method("GET"))
                .and(path("/ok"))
                .respond_with(ResponseTemplate::new(200).set_body_string("<h1>Hi</h1>"))
                .mount(server)
                .await;
            Mock::given(method("GET"))
                .and(path("/gone"))
                .respond_with(ResponseTemplate::new(410))
                .mount(server)
                .await;
        }

        let tmp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.crawler.min_delay_ms = Some(0);
        config.crawler.max_delay_ms = Some(0);
        config.crawler.max_concurrent = 2;
        config.storage.snapshot_dir = tmp.path().to_path_buf();
        let extractor = Extractor::new(config).unwrap();

        let sources = vec![
            Source::new("s1", "S1", format!("{}/ok", first.uri()), "//h1"),
            Source::new("s2", "S2", format!("{}/ok", second.uri()), "//h1"),
            Source::new("s3", "S3", format!("{}/gone", first.uri()), "//h1"),
            Source::new("s4", "S4", format!("{}/ok", second.uri()), "//table"),
        ];

        let batch = run_batch(
            &extractor,
            &sources,
            ExtractOptions::new(false, Dialect::Basic),
        )
        .await;

        let ids: Vec<_> = batch.reports.iter().map(|r| r.source_id.as_str()).collect();
        assert_eq!(ids, vec!["s1", "s2", "s3", "s4"]);
        assert_eq!(
            batch.summary,
            BatchSummary {
                total: 4,
                success: 2,
                empty: 1,
                failed: 1,
            }
        );
        assert_eq!(batch.reports[2].reason(), Some("fetch_error"));
        assert!(batch.errors.is_empty());
    }

    /// Local store that refuses to persist one source.
    struct RefusingStore {
        inner: LocalSnapshotStore,
        refused: &'static str,
    }

    #[async_trait]
    impl SnapshotStorage for RefusingStore {
        async fn append(&self, snapshot: &Snapshot) -> Result<String> {
            if snapshot.source_id == self.refused {
                return Err(AppError::storage(&snapshot.source_id, "disk full"));
            }
            self.inner.append(snapshot).await
        }

        async fn list_history(
            &self,
            source_id: &str,
            since: Option<DateTime<Utc>>,
        ) -> Result<Vec<Snapshot>> {
            self.inner.list_history(source_id, since).await
        }
    }

    #[tokio::test]
    async fn test_persistence_failure_keeps_other_reports() {
        let first = MockServer::start().await;
        let second = MockServer::start().await;
        for server in [&first, &second] {
            Mock::given(method("GET"))
                .and(path("/ok"))
                .respond_with(ResponseTemplate::new(200).set_body_string("<h1>Hi</h1>"))
                .mount(server)
                .await;
        }

        let tmp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.crawler.min_delay_ms = Some(0);
        config.crawler.max_delay_ms = Some(0);
        let store = Arc::new(RefusingStore {
            inner: LocalSnapshotStore::new(tmp.path()),
            refused: "bad",
        });
        let extractor = Extractor::with_storage(config, store).unwrap();

        let sources = vec![
            Source::new("bad", "Bad", format!("{}/ok", first.uri()), "//h1"),
            Source::new("good", "Good", format!("{}/ok", second.uri()), "//h1"),
        ];
        let batch = run_batch(
            &extractor,
            &sources,
            ExtractOptions::new(false, Dialect::Basic),
        )
        .await;

        assert_eq!(batch.reports.len(), 1);
        assert_eq!(batch.reports[0].source_id, "good");
        assert!(batch.reports[0].is_success());
        assert_eq!(batch.errors.len(), 1);
        assert_eq!(batch.errors[0].source_id, "bad");
        assert_eq!(batch.summary.total, 2);
        assert_eq!(batch.summary.success, 1);
        assert_eq!(batch.summary.failed, 1);

        let history = extractor.storage().list_history("good", None).await.unwrap();
        assert_eq!(history.len(), 1);
    }
}
