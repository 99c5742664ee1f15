//! Configuration management

use regex::Regex;
use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;

use crate::error::{IngestError, IngestResult};
use crate::file_state::{FilePattern, DEFAULT_FILE_EXTENSION, DEFAULT_FILE_PREFIX};
use crate::retry::RetryPolicy;

// ============================================================================
// Ingest Configuration Constants
// ============================================================================

/// Default directory holding the per-user source documents.
pub const DEFAULT_INPUT_DIR: &str = "./mixed";

/// Default path of the staged normalized artifact.
pub const DEFAULT_ARTIFACT_PATH: &str = "./processed_data.json";

/// Default path of the dataset statistics report.
pub const DEFAULT_STATS_PATH: &str = "./data_statistics.json";

/// Default destination table.
pub const DEFAULT_TABLE: &str = "processed_data";

/// Default rows per transactional batch.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Default database connection timeout in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default maximum connection attempts.
pub const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 5;

/// Default delay before the first reconnection attempt.
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 500;

/// Default ceiling for the doubling backoff delay.
pub const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 8000;

/// Default number of files between progress log lines.
pub const DEFAULT_PROGRESS_INTERVAL: usize = 100;

static TABLE_IDENTIFIER: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[a-z_][a-z0-9_]{0,62}$").ok());

/// Check that a table name is safe to splice into SQL
pub fn is_valid_table_name(name: &str) -> bool {
    TABLE_IDENTIFIER
        .as_ref()
        .is_some_and(|pattern| pattern.is_match(name))
}

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Connection string; only required by the upload stages
    pub database_url: Option<String>,
    pub input_dir: PathBuf,
    pub artifact_path: PathBuf,
    pub stats_path: PathBuf,
    pub table: String,
    pub batch_size: usize,
    pub file_prefix: String,
    pub file_extension: String,
    pub connect_timeout_secs: u64,
    pub retry_max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub progress_interval: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            input_dir: PathBuf::from(DEFAULT_INPUT_DIR),
            artifact_path: PathBuf::from(DEFAULT_ARTIFACT_PATH),
            stats_path: PathBuf::from(DEFAULT_STATS_PATH),
            table: DEFAULT_TABLE.to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            file_prefix: DEFAULT_FILE_PREFIX.to_string(),
            file_extension: DEFAULT_FILE_EXTENSION.to_string(),
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            retry_max_attempts: DEFAULT_RETRY_MAX_ATTEMPTS,
            retry_base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
            retry_max_delay_ms: DEFAULT_RETRY_MAX_DELAY_MS,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

impl IngestConfig {
    /// Load configuration from `.env`, the environment and defaults
    pub fn from_env() -> IngestResult<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();
        let config = Self {
            database_url: std::env::var("DATABASE_URL")
                .or_else(|_| std::env::var("HEROKU_DATABASE_URL"))
                .ok()
                .filter(|url| !url.trim().is_empty()),
            input_dir: std::env::var("INGEST_INPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.input_dir),
            artifact_path: std::env::var("INGEST_ARTIFACT_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.artifact_path),
            stats_path: std::env::var("INGEST_STATS_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.stats_path),
            table: std::env::var("INGEST_TABLE").unwrap_or(defaults.table),
            batch_size: env_parse("INGEST_BATCH_SIZE").unwrap_or(defaults.batch_size),
            file_prefix: std::env::var("INGEST_FILE_PREFIX").unwrap_or(defaults.file_prefix),
            file_extension: std::env::var("INGEST_FILE_EXTENSION")
                .unwrap_or(defaults.file_extension),
            connect_timeout_secs: env_parse("DB_CONNECT_TIMEOUT")
                .unwrap_or(defaults.connect_timeout_secs),
            retry_max_attempts: env_parse("INGEST_RETRY_MAX_ATTEMPTS")
                .unwrap_or(defaults.retry_max_attempts),
            retry_base_delay_ms: env_parse("INGEST_RETRY_BASE_DELAY_MS")
                .unwrap_or(defaults.retry_base_delay_ms),
            retry_max_delay_ms: env_parse("INGEST_RETRY_MAX_DELAY_MS")
                .unwrap_or(defaults.retry_max_delay_ms),
            progress_interval: env_parse("INGEST_PROGRESS_INTERVAL")
                .unwrap_or(defaults.progress_interval),
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> IngestResult<()> {
        if self.batch_size == 0 {
            return Err(IngestError::config("batch size must be greater than 0"));
        }

        if self.retry_max_attempts == 0 {
            return Err(IngestError::config("retry max attempts must be greater than 0"));
        }

        if self.retry_base_delay_ms > self.retry_max_delay_ms {
            return Err(IngestError::config(format!(
                "retry base delay ({} ms) cannot be greater than max delay ({} ms)",
                self.retry_base_delay_ms, self.retry_max_delay_ms
            )));
        }

        if !is_valid_table_name(&self.table) {
            return Err(IngestError::config(format!(
                "table name '{}' must be a lowercase SQL identifier",
                self.table
            )));
        }

        if self.file_prefix.is_empty() && self.file_extension.is_empty() {
            tracing::warn!("No file prefix or extension configured - any numeric file name matches");
        }

        Ok(())
    }

    /// Connection string, or a configuration error when none is set
    pub fn require_database_url(&self) -> IngestResult<&str> {
        self.database_url.as_deref().ok_or_else(|| {
            IngestError::config("DATABASE_URL (or HEROKU_DATABASE_URL) must be set to upload")
        })
    }

    pub fn file_pattern(&self) -> IngestResult<FilePattern> {
        FilePattern::new(&self.file_prefix, &self.file_extension)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_max_attempts,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: &[&str] = &[
        "DATABASE_URL",
        "HEROKU_DATABASE_URL",
        "INGEST_INPUT_DIR",
        "INGEST_TABLE",
        "INGEST_BATCH_SIZE",
        "INGEST_RETRY_MAX_ATTEMPTS",
        "INGEST_RETRY_BASE_DELAY_MS",
        "INGEST_RETRY_MAX_DELAY_MS",
    ];

    fn clear_env() {
        for var in VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn test_default_config() {
        let config = IngestConfig::default();
        assert_eq!(config.batch_size, 1000);
        assert_eq!(config.table, "processed_data");
        assert_eq!(config.retry_max_attempts, 5);
        assert!(config.database_url.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let zero_batch = IngestConfig {
            batch_size: 0,
            ..IngestConfig::default()
        };
        assert!(zero_batch.validate().is_err());

        let zero_attempts = IngestConfig {
            retry_max_attempts: 0,
            ..IngestConfig::default()
        };
        assert!(zero_attempts.validate().is_err());

        let inverted_delays = IngestConfig {
            retry_base_delay_ms: 10_000,
            retry_max_delay_ms: 100,
            ..IngestConfig::default()
        };
        assert!(inverted_delays.validate().is_err());

        let injected_table = IngestConfig {
            table: "processed_data; DROP TABLE users".to_string(),
            ..IngestConfig::default()
        };
        assert!(matches!(injected_table.validate(), Err(IngestError::Config(_))));
    }

    #[test]
    fn test_table_names() {
        assert!(is_valid_table_name("processed_data"));
        assert!(is_valid_table_name("_staging2"));
        assert!(!is_valid_table_name("Processed"));
        assert!(!is_valid_table_name("2fast"));
        assert!(!is_valid_table_name(""));
    }

    #[test]
    #[serial]
    fn test_from_env_overrides_and_fallback_url() {
        clear_env();
        std::env::set_var("HEROKU_DATABASE_URL", "postgres://heroku/db");
        std::env::set_var("INGEST_BATCH_SIZE", "250");
        std::env::set_var("INGEST_TABLE", "advocacy_rows");
        std::env::set_var("INGEST_INPUT_DIR", "/data/users");

        let config = IngestConfig::from_env().unwrap();
        assert_eq!(config.database_url.as_deref(), Some("postgres://heroku/db"));
        assert_eq!(config.batch_size, 250);
        assert_eq!(config.table, "advocacy_rows");
        assert_eq!(config.input_dir, PathBuf::from("/data/users"));

        std::env::set_var("DATABASE_URL", "postgres://primary/db");
        let config = IngestConfig::from_env().unwrap();
        assert_eq!(config.require_database_url().unwrap(), "postgres://primary/db");

        clear_env();
    }

    #[test]
    #[serial]
    fn test_from_env_rejects_invalid_batch_size() {
        clear_env();
        std::env::set_var("INGEST_BATCH_SIZE", "0");
        assert!(IngestConfig::from_env().is_err());

        // Unparsable values fall back to the default
        std::env::set_var("INGEST_BATCH_SIZE", "lots");
        assert_eq!(IngestConfig::from_env().unwrap().batch_size, DEFAULT_BATCH_SIZE);
        clear_env();
    }

    #[test]
    #[serial]
    fn test_missing_database_url_is_config_error() {
        clear_env();
        let config = IngestConfig {
            database_url: None,
            ..IngestConfig::default()
        };
        assert!(matches!(config.require_database_url(), Err(IngestError::Config(_))));
    }
}
