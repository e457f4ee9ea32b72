//! Application configuration structures.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Root application configuration.
///
/// Supplied once at construction time and never mutated while extracting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// HTTP identity, pacing and retry settings
    #[serde(default)]
    pub crawler: CrawlerConfig,

    /// Exclusion-policy settings
    #[serde(default)]
    pub policy: PolicyConfig,

    /// Snapshot and registry locations
    #[serde(default)]
    pub storage: StorageConfig,

    /// Source registry behaviour
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            Self::default()
        })
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.crawler.user_agent.trim().is_empty() {
            return Err(AppError::config("crawler.user_agent is empty"));
        }
        if self.crawler.timeout_secs == 0 {
            return Err(AppError::config("crawler.timeout_secs must be > 0"));
        }
        if self.crawler.max_attempts == 0 {
            return Err(AppError::config("crawler.max_attempts must be > 0"));
        }
        if self.crawler.max_concurrent == 0 {
            return Err(AppError::config("crawler.max_concurrent must be > 0"));
        }
        let (min, max) = self.crawler.delay_bounds_ms();
        if min > max {
            return Err(AppError::config(format!(
                "crawler delay bounds are inverted ({min}ms > {max}ms)"
            )));
        }
        if self
            .policy
            .whitelist
            .iter()
            .any(|host| host.trim().is_empty())
        {
            return Err(AppError::config("policy.whitelist contains an empty host"));
        }
        if self.registry.max_consecutive_failures == 0 {
            return Err(AppError::config(
                "registry.max_consecutive_failures must be > 0",
            ));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            crawler: CrawlerConfig::default(),
            policy: PolicyConfig::default(),
            storage: StorageConfig::default(),
            registry: RegistryConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Request pacing profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Politeness {
    /// 0.5s - 1.5s between requests to the same origin
    #[default]
    Standard,
    /// 1.5s - 2.5s between requests to the same origin
    Strict,
}

impl Politeness {
    /// Delay bounds in milliseconds for this profile.
    pub fn delay_bounds_ms(self) -> (u64, u64) {
        match self {
            Politeness::Standard => (500, 1500),
            Politeness::Strict => (1500, 2500),
        }
    }
}

/// HTTP client, pacing and retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlerConfig {
    /// Fixed User-Agent sent with every request
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Per-attempt request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    /// Total attempts per fetch, including the first one
    #[serde(default = "defaults::max_attempts")]
    pub max_attempts: u32,

    /// Backoff unit; attempt `n` waits `n * backoff_base_ms` before retrying
    #[serde(default = "defaults::backoff_base")]
    pub backoff_base_ms: u64,

    /// Pacing profile
    #[serde(default)]
    pub politeness: Politeness,

    /// Optional override of the profile's lower delay bound
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_delay_ms: Option<u64>,

    /// Optional override of the profile's upper delay bound
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_delay_ms: Option<u64>,

    /// Maximum origins processed concurrently in batch runs
    #[serde(default = "defaults::max_concurrent")]
    pub max_concurrent: usize,
}

impl CrawlerConfig {
    /// Effective pacing bounds after applying overrides.
    pub fn delay_bounds_ms(&self) -> (u64, u64) {
        let (min, max) = self.politeness.delay_bounds_ms();
        (
            self.min_delay_ms.unwrap_or(min),
            self.max_delay_ms.unwrap_or(max),
        )
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            user_agent: defaults::user_agent(),
            timeout_secs: defaults::timeout(),
            max_attempts: defaults::max_attempts(),
            backoff_base_ms: defaults::backoff_base(),
            politeness: Politeness::default(),
            min_delay_ms: None,
            max_delay_ms: None,
            max_concurrent: defaults::max_concurrent(),
        }
    }
}

/// Exclusion-policy settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PolicyConfig {
    /// Hosts exempt from robots.txt evaluation (subdomains included)
    #[serde(default)]
    pub whitelist: Vec<String>,

    /// Re-fetch cached robots.txt after this many seconds; never when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_ttl_secs: Option<u64>,
}

/// Storage locations, relative to the working directory unless absolute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "defaults::snapshot_dir")]
    pub snapshot_dir: PathBuf,

    #[serde(default = "defaults::registry_file")]
    pub registry_file: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            snapshot_dir: defaults::snapshot_dir(),
            registry_file: defaults::registry_file(),
        }
    }
}

/// Source registry behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Disable a source after this many failed checks in a row
    #[serde(default = "defaults::max_consecutive_failures")]
    pub max_consecutive_failures: u32,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_consecutive_failures: defaults::max_consecutive_failures(),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when RUST_LOG is not set
    #[serde(default = "defaults::log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::log_level(),
        }
    }
}

mod defaults {
    use std::path::PathBuf;

    // Crawler defaults
    pub fn user_agent() -> String {
        "Mozilla/5.0 (compatible; harvest/0.1; +https://github.com/harvest-rs/harvest)".into()
    }
    pub fn timeout() -> u64 {
        30
    }
    pub fn max_attempts() -> u32 {
        3
    }
    pub fn backoff_base() -> u64 {
        1000
    }
    pub fn max_concurrent() -> usize {
        4
    }

    // Storage defaults
    pub fn snapshot_dir() -> PathBuf {
        PathBuf::from("storage/snapshots")
    }
    pub fn registry_file() -> PathBuf {
        PathBuf::from("storage/sources.json")
    }

    // Registry defaults
    pub fn max_consecutive_failures() -> u32 {
        3
    }

    pub fn log_level() -> String {
        "info".into()
    }
}
