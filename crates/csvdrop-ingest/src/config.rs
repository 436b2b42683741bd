//! Configuration management

use serde::{Deserialize, Serialize};
use sqlx::postgres::PgConnectOptions;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{IngestError, Result};
use crate::types::{ColumnTypes, TargetTable};

// ============================================================================
// Ingestion Configuration Constants
// ============================================================================

/// Default drop folder watched for new files.
pub const DEFAULT_WATCH_DIR: &str = "./dropbox";

/// Default folder successfully loaded files are moved to.
pub const DEFAULT_ARCHIVE_DIR: &str = "./archive";

/// Default target table.
pub const DEFAULT_TABLE: &str = "students_performance";

/// Columns dropped from every batch before insert (the identity column).
pub const DEFAULT_EXCLUDE_COLUMNS: &str = "id";

/// Only files with this suffix are ingested.
pub const DEFAULT_FILE_SUFFIX: &str = ".csv";

/// Default field delimiter.
pub const DEFAULT_DELIMITER: u8 = b',';

/// Default quiescence window before a file counts as fully written.
pub const DEFAULT_DEBOUNCE_MS: u64 = 500;

/// Default number of pipeline workers.
pub const DEFAULT_WORKERS: usize = 4;

/// Default capacity of the stabilized-path queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Default time allowed for in-flight files to finish on shutdown.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

// ============================================================================
// Database Configuration Constants
// ============================================================================

pub const DEFAULT_DB_HOST: &str = "localhost";
pub const DEFAULT_DB_PORT: u16 = 5432;
pub const DEFAULT_DB_NAME: &str = "csvdrop";
pub const DEFAULT_DB_USER: &str = "postgres";

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 10;

/// Default minimum database connections in the pool.
pub const DEFAULT_DATABASE_MIN_CONNECTIONS: u32 = 1;

/// Default database connection timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default database idle timeout in seconds (10 minutes).
pub const DEFAULT_DATABASE_IDLE_TIMEOUT_SECS: u64 = 600;

/// Ingester configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    pub watch: WatchConfig,
    pub table: TableConfig,
    pub database: DatabaseConfig,
    pub worker: WorkerConfig,
}

/// Folders and file selection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    pub watch_dir: PathBuf,
    pub archive_dir: PathBuf,
    /// Malformed files are moved here when set, otherwise left in place
    pub quarantine_dir: Option<PathBuf>,
    pub file_suffix: String,
    pub debounce_ms: u64,
}

/// Target table and how rows are decoded for it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableConfig {
    pub name: String,
    pub exclude_columns: Vec<String>,
    pub column_types: ColumnTypes,
    pub delimiter: u8,
    pub dedupe_by_checksum: bool,
}

/// Worker pool sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub workers: usize,
    pub queue_capacity: usize,
    pub shutdown_timeout_secs: u64,
}

/// Database configuration
///
/// `url` wins over the individual components when set.
#[derive(Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub name: String,
    pub user: String,
    pub password: Option<String>,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
    pub idle_timeout_secs: u64,
}

impl std::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("url", &self.url.as_ref().map(|_| "<redacted>"))
            .field("host", &self.host)
            .field("port", &self.port)
            .field("name", &self.name)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("max_connections", &self.max_connections)
            .field("min_connections", &self.min_connections)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("idle_timeout_secs", &self.idle_timeout_secs)
            .finish()
    }
}

impl DatabaseConfig {
    /// Connection options built from the URL or the individual components
    pub fn connect_options(&self) -> Result<PgConnectOptions> {
        if let Some(url) = &self.url {
            return PgConnectOptions::from_str(url)
                .map_err(|e| IngestError::Config(format!("invalid DATABASE_URL: {}", e)));
        }

        let mut options = PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .database(&self.name)
            .username(&self.user);
        if let Some(password) = &self.password {
            options = options.password(password);
        }
        Ok(options)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl TableConfig {
    pub fn target(&self) -> TargetTable {
        TargetTable::new(&self.name).with_excluded(self.exclude_columns.iter().cloned())
    }
}

impl WatchConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl WorkerConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.trim().is_empty())
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Parse a delimiter given as a single ASCII character or the word `tab`
pub fn parse_delimiter(value: &str) -> Result<u8> {
    match value {
        "tab" | "\\t" | "\t" => Ok(b'\t'),
        v if v.len() == 1 && v.is_ascii() => Ok(v.as_bytes()[0]),
        other => Err(IngestError::Config(format!(
            "delimiter must be a single ASCII character, got '{}'",
            other
        ))),
    }
}

impl IngestConfig {
    /// Load configuration from environment and defaults
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self::from_env()?;
        config.validate()?;

        Ok(config)
    }

    /// Read the environment without touching `.env` or validating
    pub fn from_env() -> Result<Self> {
        let column_types = match env_string("CSVDROP_COLUMN_TYPES") {
            Some(declared) => declared.parse()?,
            None => ColumnTypes::default(),
        };
        let delimiter = match std::env::var("CSVDROP_DELIMITER") {
            Ok(value) if !value.is_empty() => parse_delimiter(&value)?,
            _ => DEFAULT_DELIMITER,
        };

        Ok(Self {
            watch: WatchConfig {
                watch_dir: env_string("CSVDROP_WATCH_DIR")
                    .unwrap_or_else(|| DEFAULT_WATCH_DIR.to_string())
                    .into(),
                archive_dir: env_string("CSVDROP_ARCHIVE_DIR")
                    .unwrap_or_else(|| DEFAULT_ARCHIVE_DIR.to_string())
                    .into(),
                quarantine_dir: env_string("CSVDROP_QUARANTINE_DIR").map(PathBuf::from),
                file_suffix: std::env::var("CSVDROP_FILE_SUFFIX")
                    .unwrap_or_else(|_| DEFAULT_FILE_SUFFIX.to_string()),
                debounce_ms: env_parse("CSVDROP_DEBOUNCE_MS", DEFAULT_DEBOUNCE_MS),
            },
            table: TableConfig {
                name: std::env::var("CSVDROP_TABLE").unwrap_or_else(|_| DEFAULT_TABLE.to_string()),
                exclude_columns: split_list(
                    &std::env::var("CSVDROP_EXCLUDE_COLUMNS")
                        .unwrap_or_else(|_| DEFAULT_EXCLUDE_COLUMNS.to_string()),
                ),
                column_types,
                delimiter,
                dedupe_by_checksum: env_parse("CSVDROP_DEDUPE", true),
            },
            database: DatabaseConfig {
                url: env_string("DATABASE_URL"),
                host: std::env::var("DB_HOST").unwrap_or_else(|_| DEFAULT_DB_HOST.to_string()),
                port: env_parse("DB_PORT", DEFAULT_DB_PORT),
                name: std::env::var("DB_NAME").unwrap_or_else(|_| DEFAULT_DB_NAME.to_string()),
                user: std::env::var("DB_USER").unwrap_or_else(|_| DEFAULT_DB_USER.to_string()),
                password: std::env::var("DB_PASSWORD").ok(),
                max_connections: env_parse("DB_MAX_CONNECTIONS", DEFAULT_DATABASE_MAX_CONNECTIONS),
                min_connections: env_parse("DB_MIN_CONNECTIONS", DEFAULT_DATABASE_MIN_CONNECTIONS),
                connect_timeout_secs: env_parse(
                    "DB_CONNECT_TIMEOUT",
                    DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                ),
                idle_timeout_secs: env_parse("DB_IDLE_TIMEOUT", DEFAULT_DATABASE_IDLE_TIMEOUT_SECS),
            },
            worker: WorkerConfig {
                workers: env_parse("CSVDROP_WORKERS", DEFAULT_WORKERS),
                queue_capacity: env_parse("CSVDROP_QUEUE_CAPACITY", DEFAULT_QUEUE_CAPACITY),
                shutdown_timeout_secs: env_parse(
                    "CSVDROP_SHUTDOWN_TIMEOUT",
                    DEFAULT_SHUTDOWN_TIMEOUT_SECS,
                ),
            },
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.table.name.trim().is_empty() {
            return Err(IngestError::Config("Target table name cannot be empty".into()));
        }
        if self.table.name.split('.').any(|part| part.is_empty()) || self.table.name.split('.').count() > 2 {
            return Err(IngestError::Config(format!(
                "Target table '{}' must be 'table' or 'schema.table'",
                self.table.name
            )));
        }

        if self.watch.file_suffix.is_empty() {
            return Err(IngestError::Config("File suffix cannot be empty".into()));
        }

        if self.watch.watch_dir == self.watch.archive_dir {
            return Err(IngestError::Config(
                "Watch and archive directories must differ".into(),
            ));
        }
        if let Some(quarantine) = &self.watch.quarantine_dir {
            if quarantine == &self.watch.watch_dir {
                return Err(IngestError::Config(
                    "Watch and quarantine directories must differ".into(),
                ));
            }
        }

        if self.worker.workers == 0 {
            return Err(IngestError::Config("Worker count must be greater than 0".into()));
        }
        if self.worker.queue_capacity == 0 {
            return Err(IngestError::Config("Queue capacity must be greater than 0".into()));
        }

        if self.database.max_connections == 0 {
            return Err(IngestError::Config(
                "Database max_connections must be greater than 0".into(),
            ));
        }
        if self.database.min_connections > self.database.max_connections {
            return Err(IngestError::Config(format!(
                "Database min_connections ({}) cannot be greater than max_connections ({})",
                self.database.min_connections, self.database.max_connections
            )));
        }

        if self.watch.debounce_ms == 0 {
            tracing::warn!("Debounce window is 0 ms - partially written files may be picked up");
        }

        Ok(())
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            watch: WatchConfig {
                watch_dir: DEFAULT_WATCH_DIR.into(),
                archive_dir: DEFAULT_ARCHIVE_DIR.into(),
                quarantine_dir: None,
                file_suffix: DEFAULT_FILE_SUFFIX.to_string(),
                debounce_ms: DEFAULT_DEBOUNCE_MS,
            },
            table: TableConfig {
                name: DEFAULT_TABLE.to_string(),
                exclude_columns: split_list(DEFAULT_EXCLUDE_COLUMNS),
                column_types: ColumnTypes::default(),
                delimiter: DEFAULT_DELIMITER,
                dedupe_by_checksum: true,
            },
            database: DatabaseConfig {
                url: None,
                host: DEFAULT_DB_HOST.to_string(),
                port: DEFAULT_DB_PORT,
                name: DEFAULT_DB_NAME.to_string(),
                user: DEFAULT_DB_USER.to_string(),
                password: None,
                max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
                min_connections: DEFAULT_DATABASE_MIN_CONNECTIONS,
                connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                idle_timeout_secs: DEFAULT_DATABASE_IDLE_TIMEOUT_SECS,
            },
            worker: WorkerConfig {
                workers: DEFAULT_WORKERS,
                queue_capacity: DEFAULT_QUEUE_CAPACITY,
                shutdown_timeout_secs: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::types::ColumnType;
    use serial_test::serial;

    const VARS: &[&str] = &[
        "CSVDROP_WATCH_DIR",
        "CSVDROP_ARCHIVE_DIR",
        "CSVDROP_QUARANTINE_DIR",
        "CSVDROP_TABLE",
        "CSVDROP_EXCLUDE_COLUMNS",
        "CSVDROP_COLUMN_TYPES",
        "CSVDROP_DELIMITER",
        "CSVDROP_DEBOUNCE_MS",
        "CSVDROP_WORKERS",
        "CSVDROP_DEDUPE",
        "DATABASE_URL",
        "DB_HOST",
        "DB_PORT",
        "DB_PASSWORD",
    ];

    fn clear_env() {
        for var in VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn test_default_config() {
        let config = IngestConfig::default();
        assert_eq!(config.table.name, "students_performance");
        assert_eq!(config.table.exclude_columns, vec!["id".to_string()]);
        assert_eq!(config.watch.debounce(), Duration::from_millis(500));
        assert_eq!(config.watch.file_suffix, ".csv");
        assert!(config.table.dedupe_by_checksum);
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_config_from_env() {
        clear_env();
        std::env::set_var("CSVDROP_WATCH_DIR", "/data/in");
        std::env::set_var("CSVDROP_TABLE", "public.scores");
        std::env::set_var("CSVDROP_EXCLUDE_COLUMNS", "id, created_at");
        std::env::set_var("CSVDROP_COLUMN_TYPES", "score:integer");
        std::env::set_var("CSVDROP_DELIMITER", ";");
        std::env::set_var("CSVDROP_DEBOUNCE_MS", "250");
        std::env::set_var("CSVDROP_DEDUPE", "false");

        let config = IngestConfig::from_env().unwrap();
        assert_eq!(config.watch.watch_dir, PathBuf::from("/data/in"));
        assert_eq!(config.watch.archive_dir, PathBuf::from(DEFAULT_ARCHIVE_DIR));
        assert_eq!(config.table.exclude_columns, vec!["id", "created_at"]);
        assert_eq!(config.table.column_types.type_of("score"), ColumnType::Integer);
        assert_eq!(config.table.delimiter, b';');
        assert_eq!(config.watch.debounce_ms, 250);
        assert!(!config.table.dedupe_by_checksum);
        assert_eq!(config.table.target().quoted_name(), "\"public\".\"scores\"");

        clear_env();
    }

    #[test]
    #[serial]
    fn test_invalid_numbers_fall_back_to_defaults() {
        clear_env();
        std::env::set_var("CSVDROP_WORKERS", "many");
        std::env::set_var("DB_PORT", "-1");

        let config = IngestConfig::from_env().unwrap();
        assert_eq!(config.worker.workers, DEFAULT_WORKERS);
        assert_eq!(config.database.port, DEFAULT_DB_PORT);

        clear_env();
    }

    #[test]
    #[serial]
    fn test_bad_column_types_rejected() {
        clear_env();
        std::env::set_var("CSVDROP_COLUMN_TYPES", "score:money");
        assert!(IngestConfig::from_env().is_err());
        clear_env();
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = IngestConfig::default();
        config.table.name = "  ".into();
        assert!(config.validate().is_err());

        let mut config = IngestConfig::default();
        config.table.name = "a.b.c".into();
        assert!(config.validate().is_err());

        let mut config = IngestConfig::default();
        config.watch.archive_dir = config.watch.watch_dir.clone();
        assert!(config.validate().is_err());

        let mut config = IngestConfig::default();
        config.worker.workers = 0;
        assert!(config.validate().is_err());

        let mut config = IngestConfig::default();
        config.database.min_connections = 20;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_delimiter() {
        assert_eq!(parse_delimiter(";").unwrap(), b';');
        assert_eq!(parse_delimiter("tab").unwrap(), b'\t');
        assert!(parse_delimiter(";;").is_err());
        assert!(parse_delimiter("é").is_err());
    }

    #[test]
    fn test_debug_redacts_password() {
        let mut config = IngestConfig::default();
        config.database.password = Some("hunter2".into());
        config.database.url = Some("postgres://u:hunter2@h/db".into());
        let rendered = format!("{:?}", config.database);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_connect_options_from_url() {
        let mut config = IngestConfig::default();
        config.database.url = Some("postgres://u:p@db.internal:6543/scores".into());
        let options = config.database.connect_options().unwrap();
        assert_eq!(options.get_host(), "db.internal");
        assert_eq!(options.get_port(), 6543);
        assert_eq!(options.get_database(), Some("scores"));

        config.database.url = Some("not a url".into());
        assert!(config.database.connect_options().is_err());
    }
}
