// ABOUTME: Configuration loading and validation for the starhold process.
// ABOUTME: Reads STARHOLD_* environment variables with defaults; CLI flags may override fields afterwards.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("STARHOLD_SYNC_INTERVAL_SECS must be a positive integer, got {0:?}")]
    InvalidInterval(String),

    #[error("STARHOLD_SYNC_BATCH must be a positive integer, got {0:?}")]
    InvalidBatch(String),
}

/// Process configuration.
#[derive(Debug, Clone)]
pub struct StarholdConfig {
    pub home: PathBuf,
    pub db_path: PathBuf,
    /// Overrides the built-in game schemas when set.
    pub schema_path: Option<PathBuf>,
    pub sync_interval: Duration,
    pub sync_batch: usize,
}

impl StarholdConfig {
    /// Load configuration from environment variables with sensible defaults.
    ///
    /// Environment variables:
    /// - STARHOLD_HOME: data directory (default: ~/.starhold)
    /// - STARHOLD_DB: SQLite database path (default: $STARHOLD_HOME/world.db)
    /// - STARHOLD_SCHEMA: YAML schema registry path (optional)
    /// - STARHOLD_SYNC_INTERVAL_SECS: seconds between sync passes (default: 5)
    /// - STARHOLD_SYNC_BATCH: rows per backing-store call (default: 500)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).filter(|v| !v.is_empty());

        let home = var("STARHOLD_HOME").map(PathBuf::from).unwrap_or_else(|| {
            var("HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join(".starhold")
        });

        let db_path = var("STARHOLD_DB")
            .map(PathBuf::from)
            .unwrap_or_else(|| home.join("world.db"));

        let schema_path = var("STARHOLD_SCHEMA").map(PathBuf::from);

        let sync_interval = match var("STARHOLD_SYNC_INTERVAL_SECS") {
            Some(raw) => Duration::from_secs(
                parse_positive(&raw).ok_or(ConfigError::InvalidInterval(raw))? as u64,
            ),
            None => Duration::from_secs(5),
        };

        let sync_batch = match var("STARHOLD_SYNC_BATCH") {
            Some(raw) => parse_positive(&raw).ok_or(ConfigError::InvalidBatch(raw))?,
            None => 500,
        };

        Ok(Self {
            home,
            db_path,
            schema_path,
            sync_interval,
            sync_batch,
        })
    }
}

fn parse_positive(raw: &str) -> Option<usize> {
    raw.trim().parse::<usize>().ok().filter(|v| *v > 0)
}
