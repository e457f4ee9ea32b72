// src/pipeline/validate.rs

//! Offline checks of configuration and the source registry.

use std::collections::HashSet;

use crate::error::Result;
use crate::models::{Config, Source};
use crate::query::{self, Dialect};
use crate::storage::SourceRegistry;

/// A problem found in one source descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceIssue {
    pub source_id: String,
    pub message: String,
}

/// Check descriptors and queries without touching the network.
pub fn validate_sources(sources: &[Source], dialect: Dialect) -> Vec<SourceIssue> {
    let mut issues = Vec::new();
    let mut seen = HashSet::new();

    for source in sources {
        let mut report = |message: String| {
            issues.push(SourceIssue {
                source_id: source.id.clone(),
                message,
            })
        };

        if !seen.insert(source.id.as_str()) {
            report(format!("duplicate source id '{}'", source.id));
        }
        if let Err(message) = source.check_descriptor() {
            report(message);
        }
        if let Err(e) = query::compile(&source.query, dialect) {
            report(format!("query does not compile as {dialect}: {e}"));
        }
    }
    issues
}

/// Validate configuration and the registry it points at.
///
/// Returns the loaded registry and every source problem found.
pub async fn run_validate(
    config: &Config,
    dialect: Dialect,
) -> Result<(SourceRegistry, Vec<SourceIssue>)> {
    config.validate()?;
    log::info!(
        "Configuration OK (user agent: {}, timeout: {}s, attempts: {}, concurrency: {})",
        config.crawler.user_agent,
        config.crawler.timeout_secs,
        config.crawler.max_attempts,
        config.crawler.max_concurrent
    );

    let registry = SourceRegistry::load(
        &config.storage.registry_file,
        config.registry.max_consecutive_failures,
    )
    .await?;
    let issues = validate_sources(registry.sources(), dialect);

    log::info!(
        "Registry {:?}: {} sources, {} enabled, {} issue(s)",
        registry.path(),
        registry.sources().len(),
        registry.enabled().len(),
        issues.len()
    );
    for issue in &issues {
        log::warn!("{}: {}", issue.source_id, issue.message);
    }

    Ok((registry, issues))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_valid_sources_have_no_issues() {
        let sources = vec![
            Source::new("a", "A", "https://a.example/", "//h1/text()"),
            Source::new("b", "B", "https://b.example/", "//a/@href"),
        ];
        assert!(validate_sources(&sources, Dialect::Basic).is_empty());
    }

    #[test]
    fn test_issues_are_reported_per_source() {
        let sources = vec![
            Source::new("a", "A", "https://a.example/", "//h1"),
            Source::new("a", "A again", "https://a.example/", "//h1"),
            Source::new("b", "B", "mailto:someone@example.org", "//h1"),
            Source::new("c", "C", "https://c.example/", "count(//li)"),
        ];

        let issues = validate_sources(&sources, Dialect::Basic);
        let ids: Vec<_> = issues.iter().map(|i| i.source_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert!(issues[0].message.contains("duplicate"));

        // The extended dialect accepts the scalar query
        let issues = validate_sources(&sources[3..], Dialect::Extended);
        assert!(issues.is_empty());
    }

    #[tokio::test]
    async fn test_run_validate_loads_registry() {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.storage.registry_file = tmp.path().join("sources.json");

        let mut registry = SourceRegistry::new(&config.storage.registry_file, 3);
        registry.upsert(Source::new("a", "A", "https://a.example/", "//h1["));
        registry.save().await.unwrap();

        let (loaded, issues) = run_validate(&config, Dialect::Basic).await.unwrap();
        assert_eq!(loaded.sources().len(), 1);
        assert_eq!(issues.len(), 1);
    }

    #[tokio::test]
    async fn test_run_validate_rejects_bad_config() {
        let mut config = Config::default();
        config.crawler.max_attempts = 0;
        assert!(run_validate(&config, Dialect::Basic).await.is_err());
    }
}
