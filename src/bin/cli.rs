//! Harvest CLI
//!
//! Local entry point operating on a storage directory.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use harvest::{
    error::{AppError, Result},
    models::{Config, Source},
    pipeline::{self, ExtractOptions, ExtractionReport, Extractor},
    query::Dialect,
    storage::SourceRegistry,
};

/// Harvest - polite HTML extraction engine
#[derive(Parser, Debug)]
#[command(
    name = "harvest",
    version,
    about = "Polite HTML extraction with robots.txt compliance"
)]
struct Cli {
    /// Path to storage directory containing config.toml
    #[arg(short, long, default_value = "storage")]
    storage_dir: PathBuf,

    /// Config file (default: {storage_dir}/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

/// Whether the exclusion policy is enforced.
#[derive(ValueEnum, Clone, Copy, Debug)]
enum PolicyMode {
    Enforce,
    Ignore,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate configuration and the source registry
    Validate {
        #[arg(long, default_value = "basic")]
        dialect: Dialect,
    },

    /// Pre-flight one source: print up to 3 samples, persist nothing
    Check {
        source_id: String,
        #[arg(long, value_enum)]
        policy: PolicyMode,
        #[arg(long, default_value = "basic")]
        dialect: Dialect,
    },

    /// Extract one source and commit the snapshot
    Extract {
        source_id: String,
        #[arg(long, value_enum)]
        policy: PolicyMode,
        #[arg(long, default_value = "basic")]
        dialect: Dialect,
    },

    /// Extract all enabled sources
    Run {
        #[arg(long, value_enum)]
        policy: PolicyMode,
        #[arg(long, default_value = "basic")]
        dialect: Dialect,
        /// Only sources whose refresh interval has elapsed
        #[arg(long)]
        due_only: bool,
    },

    /// List snapshots of a source, oldest first
    History {
        source_id: String,
        /// Only snapshots captured at or after this RFC 3339 time
        #[arg(long)]
        since: Option<DateTime<Utc>>,
    },

    /// Evaluate the exclusion policy for a URL
    Allowed { url: String },
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool, configured: &str) {
    let level = if verbose { "debug" } else { configured };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

fn options(policy: PolicyMode, dialect: Dialect) -> ExtractOptions {
    ExtractOptions::new(matches!(policy, PolicyMode::Enforce), dialect)
}

async fn load_registry(config: &Config) -> Result<SourceRegistry> {
    SourceRegistry::load(
        &config.storage.registry_file,
        config.registry.max_consecutive_failures,
    )
    .await
}

fn find_source(registry: &SourceRegistry, source_id: &str) -> Result<Source> {
    registry
        .get(source_id)
        .cloned()
        .ok_or_else(|| AppError::SourceNotFound(source_id.to_string()))
}

fn print_report(report: &ExtractionReport) {
    match report.reason() {
        None => log::info!(
            "{}: {} ({} values)",
            report.source_id,
            report.state,
            report.result.matched_count
        ),
        Some(reason) => log::warn!("{}: {} ({})", report.source_id, report.state, reason),
    }
    if let Some(error) = &report.result.error {
        log::debug!("{}: {}", report.source_id, error);
    }
    for value in &report.result.sample {
        println!("  {value}");
    }
}

fn ensure_success(report: &ExtractionReport) -> Result<()> {
    if report.is_success() {
        Ok(())
    } else {
        Err(AppError::validation(format!(
            "{} ended in {}: {}",
            report.source_id,
            report.state,
            report.reason().unwrap_or("unknown")
        )))
    }
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| cli.storage_dir.join("config.toml"));
    let config = Config::load_or_default(&config_path);
    init_logging(cli.verbose, &config.logging.level);

    log::info!("Loaded configuration from {}", config_path.display());

    match cli.command {
        Command::Validate { dialect } => {
            let (_, issues) = pipeline::run_validate(&config, dialect).await?;
            if !issues.is_empty() {
                return Err(AppError::validation(format!(
                    "{} source issue(s) found",
                    issues.len()
                )));
            }
            log::info!("All validations passed!");
        }

        Command::Check {
            source_id,
            policy,
            dialect,
        } => {
            let registry = load_registry(&config).await?;
            let source = find_source(&registry, &source_id)?;
            let extractor = Extractor::new(config)?;

            let report = extractor
                .extract(&source, options(policy, dialect).validate_only())
                .await?;
            print_report(&report);
            ensure_success(&report)?;
        }

        Command::Extract {
            source_id,
            policy,
            dialect,
        } => {
            let mut registry = load_registry(&config).await?;
            let source = find_source(&registry, &source_id)?;
            let extractor = Extractor::new(config)?;

            let report = extractor.extract(&source, options(policy, dialect)).await?;
            print_report(&report);
            registry.record(&report)?;
            registry.save().await?;
            ensure_success(&report)?;
        }

        Command::Run {
            policy,
            dialect,
            due_only,
        } => {
            let mut registry = load_registry(&config).await?;
            let now = Utc::now();
            let sources: Vec<Source> = registry
                .enabled()
                .into_iter()
                .filter(|source| !due_only || source.is_due(now))
                .cloned()
                .collect();
            if sources.is_empty() {
                log::warn!("No sources to extract");
                return Ok(());
            }

            let extractor = Extractor::new(config)?;
            let batch = pipeline::run_batch(&extractor, &sources, options(policy, dialect)).await;
            for report in &batch.reports {
                print_report(report);
                registry.record(report)?;
            }
            registry.save().await?;

            log::info!(
                "{} sources: {} success, {} empty, {} failed",
                batch.summary.total,
                batch.summary.success,
                batch.summary.empty,
                batch.summary.failed
            );
            if let Some(failure) = batch.errors.into_iter().next() {
                return Err(failure.error);
            }
        }

        Command::History { source_id, since } => {
            let extractor = Extractor::new(config)?;
            let history = extractor.storage().list_history(&source_id, since).await?;
            log::info!("{} snapshot(s) for {}", history.len(), source_id);
            for snapshot in &history {
                println!(
                    "{}  {}  {} value(s)  [{}]",
                    snapshot.captured_at.to_rfc3339(),
                    snapshot.snapshot_id,
                    snapshot.values.len(),
                    snapshot.dialect
                );
            }
        }

        Command::Allowed { url } => {
            let extractor = Extractor::new(config)?;
            let allowed = extractor.policy().is_allowed(&url).await;
            println!("{}", if allowed { "allowed" } else { "disallowed" });
        }
    }

    log::info!("Done!");

    Ok(())
}
