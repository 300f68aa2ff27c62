//! Configuration management
//!
//! Values come from the environment (a `.env` file is honoured) with the
//! defaults below. The CLI overrides the database URL.

use serde::{Deserialize, Serialize};
use std::time::Duration;

// ============================================================================
// Configuration Constants
// ============================================================================

/// Default database URL for local runs.
pub const DEFAULT_DATABASE_URL: &str = "sqlite://ncvoter.db";

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 4;

/// Default time a writer waits on a locked SQLite database, in seconds.
pub const DEFAULT_DATABASE_BUSY_TIMEOUT_SECS: u64 = 30;

/// Default number of buffered change records and bad-line ranges per flush.
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// Default cell delimiter of the statewide exports.
pub const DEFAULT_DELIMITER: char = '\t';

/// Default column carrying the stable registrant identifier.
pub const DEFAULT_IDENTIFIER_FIELD: &str = "ncid";

/// Default column carrying the snapshot date of each row.
pub const DEFAULT_SNAPSHOT_FIELD: &str = "snapshot_dt";

/// Columns whose changes alone never produce a MODIFY record.
pub const DEFAULT_IGNORED_FIELDS: &[&str] = &["age", "birth_age", "load_dt"];

pub const DEFAULT_INTEGER_FIELDS: &[&str] = &["county_id", "birth_age", "age"];
pub const DEFAULT_BOOLEAN_FIELDS: &[&str] = &["drivers_lic", "confidential_ind"];
pub const DEFAULT_DATE_FIELDS: &[&str] = &["registr_dt"];

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub ingest: IngestConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub busy_timeout_secs: u64,
}

impl DatabaseConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_secs(self.busy_timeout_secs)
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_DATABASE_URL.to_string(),
            max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
            busy_timeout_secs: DEFAULT_DATABASE_BUSY_TIMEOUT_SECS,
        }
    }
}

/// Settings that shape how a snapshot is parsed, hashed and diffed
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IngestConfig {
    /// Flush threshold for the batch writer
    pub batch_size: usize,
    pub delimiter: char,
    pub identifier_field: String,
    /// Parsed as the change timestamp and excluded from the content hash
    pub snapshot_field: String,
    pub ignored_fields: Vec<String>,
    pub integer_fields: Vec<String>,
    pub boolean_fields: Vec<String>,
    /// `MM/DD/YYYY` columns normalized to ISO dates
    pub date_fields: Vec<String>,
}

fn owned(fields: &[&str]) -> Vec<String> {
    fields.iter().map(|s| s.to_string()).collect()
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            delimiter: DEFAULT_DELIMITER,
            identifier_field: DEFAULT_IDENTIFIER_FIELD.to_string(),
            snapshot_field: DEFAULT_SNAPSHOT_FIELD.to_string(),
            ignored_fields: owned(DEFAULT_IGNORED_FIELDS),
            integer_fields: owned(DEFAULT_INTEGER_FIELDS),
            boolean_fields: owned(DEFAULT_BOOLEAN_FIELDS),
            date_fields: owned(DEFAULT_DATE_FIELDS),
        }
    }
}

impl IngestConfig {
    pub fn is_ignored(&self, field: &str) -> bool {
        self.ignored_fields.iter().any(|f| f == field)
    }

    /// Fields left out of the canonical serialization that is hashed
    pub fn hash_excluded_fields(&self) -> Vec<&str> {
        vec![self.snapshot_field.as_str()]
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.batch_size == 0 {
            anyhow::bail!("Ingest batch_size must be greater than 0");
        }
        if self.identifier_field.is_empty() {
            anyhow::bail!("Ingest identifier_field cannot be empty");
        }
        if self.identifier_field == self.snapshot_field {
            anyhow::bail!(
                "Identifier field and snapshot field must differ (both '{}')",
                self.identifier_field
            );
        }
        if self.delimiter == '\n' || self.delimiter == '\r' {
            anyhow::bail!("Delimiter cannot be a line terminator");
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Comma-separated list; an empty value yields an empty list
fn env_list(key: &str, default: &[&str]) -> Vec<String> {
    match std::env::var(key) {
        Ok(value) => value
            .split(',')
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect(),
        Err(_) => owned(default),
    }
}

fn env_delimiter() -> char {
    match std::env::var("INGEST_DELIMITER").ok().as_deref() {
        Some("\\t") | Some("tab") => '\t',
        Some(s) => s.chars().next().unwrap_or(DEFAULT_DELIMITER),
        None => DEFAULT_DELIMITER,
    }
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config {
            database: DatabaseConfig {
                url: std::env::var("DATABASE_URL")
                    .unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string()),
                max_connections: env_parse(
                    "DATABASE_MAX_CONNECTIONS",
                    DEFAULT_DATABASE_MAX_CONNECTIONS,
                ),
                busy_timeout_secs: env_parse(
                    "DATABASE_BUSY_TIMEOUT",
                    DEFAULT_DATABASE_BUSY_TIMEOUT_SECS,
                ),
            },
            ingest: IngestConfig {
                batch_size: env_parse("INGEST_BATCH_SIZE", DEFAULT_BATCH_SIZE),
                delimiter: env_delimiter(),
                identifier_field: std::env::var("INGEST_IDENTIFIER_FIELD")
                    .map(|s| s.to_lowercase())
                    .unwrap_or_else(|_| DEFAULT_IDENTIFIER_FIELD.to_string()),
                snapshot_field: std::env::var("INGEST_SNAPSHOT_FIELD")
                    .map(|s| s.to_lowercase())
                    .unwrap_or_else(|_| DEFAULT_SNAPSHOT_FIELD.to_string()),
                ignored_fields: env_list("INGEST_IGNORED_FIELDS", DEFAULT_IGNORED_FIELDS),
                integer_fields: env_list("INGEST_INTEGER_FIELDS", DEFAULT_INTEGER_FIELDS),
                boolean_fields: env_list("INGEST_BOOLEAN_FIELDS", DEFAULT_BOOLEAN_FIELDS),
                date_fields: env_list("INGEST_DATE_FIELDS", DEFAULT_DATE_FIELDS),
            },
        };

        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }
        if self.database.max_connections == 0 {
            anyhow::bail!("Database max_connections must be greater than 0");
        }
        self.ingest.validate()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config {
            database: DatabaseConfig::default(),
            ingest: IngestConfig::default(),
        };
        assert!(config.validate().is_ok());
        assert_eq!(config.ingest.batch_size, 500);
        assert!(config.ingest.is_ignored("age"));
        assert!(!config.ingest.is_ignored("last_name"));
        assert_eq!(config.ingest.hash_excluded_fields(), vec!["snapshot_dt"]);
    }

    #[test]
    fn test_validate_rejects_zero_batch() {
        let ingest = IngestConfig {
            batch_size: 0,
            ..Default::default()
        };
        assert!(ingest.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_same_identifier_and_snapshot() {
        let ingest = IngestConfig {
            snapshot_field: "ncid".to_string(),
            ..Default::default()
        };
        assert!(ingest.validate().is_err());
    }

    #[test]
    fn test_env_list_default_when_unset() {
        let list = env_list("NCVOTER_TEST_SURELY_UNSET_LIST", &["a", "b"]);
        assert_eq!(list, vec!["a".to_string(), "b".to_string()]);
    }
}
