//! Configuration loading and constants.
//!
//! Loads application configuration from TOML files and defines constants for
//! HTTP cache headers, race harness defaults, logging format, and default paths.
//! `AppConfig` is the root configuration struct containing all settings.

use const_format::formatcp;
use serde::Deserialize;
use std::path::Path;

// =============================================================================
// HTTP Response Cache Control
// =============================================================================

/// Ping responses must never be served from a cache; probes want a live answer
pub const CACHE_CONTROL_PING: &str = "no-store";

/// Seconds to wait for open connections to drain on shutdown
pub const SHUTDOWN_GRACE_SECS: u64 = 30;

// =============================================================================
// Race Harness Defaults
// =============================================================================

/// Number of concurrent workers spawned by a race run
pub const DEFAULT_RACE_WORKERS: usize = 16;

/// Upper bound on workers; each one holds its own database connection
pub const MAX_RACE_WORKERS: usize = 1024;

/// Table holding the single counter row
pub const COUNTER_TABLE: &str = "race_counter";

/// Table holding one row per claim
pub const LEDGER_TABLE: &str = "race_ledger";

/// SQLite busy timeout in milliseconds
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5000;

// =============================================================================
// Default Paths and Strings
// =============================================================================

/// Default configuration file path
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

const DEFAULT_PG_HOST: &str = "localhost";
const DEFAULT_PG_USER: &str = "postgres";
const DEFAULT_PG_DBNAME: &str = "dingo";

/// Default Postgres connection string
pub const DEFAULT_DATABASE_URL: &str = formatcp!(
    "host={} user={} dbname={}",
    DEFAULT_PG_HOST,
    DEFAULT_PG_USER,
    DEFAULT_PG_DBNAME
);

/// Default SQLite database file
pub const DEFAULT_SQLITE_PATH: &str = "dingo.sqlite3";

const CRATE_NAME: &str = env!("CARGO_CRATE_NAME");

/// Default log filter when RUST_LOG is not set
pub const DEFAULT_LOG_FILTER: &str = formatcp!("{}=debug,tower_http=debug", CRATE_NAME);

/// Default log format (text or json)
pub const DEFAULT_LOG_FORMAT: &str = "text";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    /// HTTP server configuration
    #[serde(default)]
    pub http: HttpServerConfig,
    /// Store used by the race harness
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Race harness settings
    #[serde(default)]
    pub race: RaceConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct HttpServerConfig {
    #[serde(default = "HttpServerConfig::default_host")]
    pub host: String,
    #[serde(default = "HttpServerConfig::default_port")]
    pub port: u16,
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            host: Self::default_host(),
            port: Self::default_port(),
        }
    }
}

impl HttpServerConfig {
    fn default_host() -> String {
        "127.0.0.1".to_string()
    }

    fn default_port() -> u16 {
        8000
    }
}

/// Which relational store backs the race harness
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Postgres,
    Sqlite,
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Postgres => "postgres",
            Backend::Sqlite => "sqlite",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub backend: Backend,
    /// Postgres connection string (key=value or URL form)
    #[serde(default = "DatabaseConfig::default_url")]
    pub url: String,
    /// SQLite database file
    #[serde(default = "DatabaseConfig::default_sqlite_path")]
    pub sqlite_path: String,
    /// How long a SQLite connection waits on a locked database
    #[serde(default = "DatabaseConfig::default_busy_timeout")]
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            url: Self::default_url(),
            sqlite_path: Self::default_sqlite_path(),
            busy_timeout_ms: Self::default_busy_timeout(),
        }
    }
}

impl DatabaseConfig {
    fn default_url() -> String {
        DEFAULT_DATABASE_URL.to_string()
    }

    fn default_sqlite_path() -> String {
        DEFAULT_SQLITE_PATH.to_string()
    }

    fn default_busy_timeout() -> u64 {
        DEFAULT_BUSY_TIMEOUT_MS
    }
}

/// Transaction isolation requested for the worker's write-and-verify step.
///
/// `Default` leaves the store's own default in place (READ COMMITTED on Postgres).
/// SQLite transactions are always serializable, so only `Default` is meaningful there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Isolation {
    #[default]
    Default,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RaceConfig {
    /// Number of concurrent workers (default: 16)
    #[serde(default = "RaceConfig::default_workers")]
    pub workers: usize,
    #[serde(default)]
    pub isolation: Isolation,
    /// Lock the selected ledger row before updating it
    #[serde(default)]
    pub lock_rows: bool,
}

impl Default for RaceConfig {
    fn default() -> Self {
        Self {
            workers: Self::default_workers(),
            isolation: Isolation::default(),
            lock_rows: false,
        }
    }
}

impl RaceConfig {
    fn default_workers() -> usize {
        DEFAULT_RACE_WORKERS
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "text" (human-readable, default) or "json" (structured)
    #[serde(default = "LoggingConfig::default_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: DEFAULT_LOG_FORMAT.to_string(),
        }
    }
}

impl LoggingConfig {
    fn default_format() -> String {
        DEFAULT_LOG_FORMAT.to_string()
    }

    pub fn is_json(&self) -> bool {
        self.format.eq_ignore_ascii_case("json")
    }
}

/// Race settings given on the command line; `None` keeps the file's value.
#[derive(Debug, Clone, Copy, Default)]
pub struct RaceOverrides {
    pub backend: Option<Backend>,
    pub workers: Option<usize>,
    pub isolation: Option<Isolation>,
    /// Only ever turns locking on; a file setting of `true` stays in force
    pub lock_rows: bool,
}

impl AppConfig {
    /// Merge command-line overrides into the race settings and re-validate.
    pub fn apply_race_overrides(&mut self, overrides: RaceOverrides) -> Result<(), ConfigError> {
        if let Some(backend) = overrides.backend {
            self.database.backend = backend;
        }
        if let Some(workers) = overrides.workers {
            self.race.workers = workers;
        }
        if let Some(isolation) = overrides.isolation {
            self.race.isolation = isolation;
        }
        self.race.lock_rows |= overrides.lock_rows;
        self.validate()
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.race.workers == 0 || self.race.workers > MAX_RACE_WORKERS {
            return Err(ConfigError::Validation(format!(
                "race.workers must be between 1 and {}, got {}",
                MAX_RACE_WORKERS, self.race.workers
            )));
        }

        // SQLite transactions are always serializable; a requested level would be ignored
        if self.database.backend == Backend::Sqlite && self.race.isolation != Isolation::Default {
            return Err(ConfigError::Validation(format!(
                "race.isolation {:?} is not supported by the sqlite backend; use lock_rows instead",
                self.race.isolation
            )));
        }

        if self.database.backend == Backend::Sqlite && self.database.sqlite_path.trim().is_empty() {
            return Err(ConfigError::Validation(
                "database.sqlite_path is required for the sqlite backend".to_string(),
            ));
        }

        if !matches!(self.logging.format.to_ascii_lowercase().as_str(), "text" | "json") {
            return Err(ConfigError::Validation(format!(
                "logging.format must be \"text\" or \"json\", got {:?}",
                self.logging.format
            )));
        }

        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Configuration error: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = AppConfig::from_toml("").unwrap();
        assert_eq!(config.http.host, "127.0.0.1");
        assert_eq!(config.http.port, 8000);
        assert_eq!(config.database.backend, Backend::Postgres);
        assert_eq!(config.database.url, "host=localhost user=postgres dbname=dingo");
        assert_eq!(config.race.workers, 16);
        assert_eq!(config.race.isolation, Isolation::Default);
        assert!(!config.race.lock_rows);
        assert!(!config.logging.is_json());
    }

    #[test]
    fn test_parses_all_sections() {
        let config = AppConfig::from_toml(
            r#"
            [http]
            host = "0.0.0.0"
            port = 9000

            [database]
            backend = "postgres"
            url = "host=db user=race dbname=race"
            sqlite_path = "/tmp/race.db"
            busy_timeout_ms = 250

            [race]
            workers = 4
            isolation = "repeatable-read"
            lock_rows = true

            [logging]
            format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(config.http.host, "0.0.0.0");
        assert_eq!(config.http.port, 9000);
        assert_eq!(config.database.backend, Backend::Postgres);
        assert_eq!(config.database.url, "host=db user=race dbname=race");
        assert_eq!(config.database.sqlite_path, "/tmp/race.db");
        assert_eq!(config.database.busy_timeout_ms, 250);
        assert_eq!(config.race.workers, 4);
        assert_eq!(config.race.isolation, Isolation::RepeatableRead);
        assert!(config.race.lock_rows);
        assert!(config.logging.is_json());
    }

    #[test]
    fn test_zero_workers_rejected() {
        let err = AppConfig::from_toml("[race]\nworkers = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_sqlite_requires_path() {
        let err =
            AppConfig::from_toml("[database]\nbackend = \"sqlite\"\nsqlite_path = \"\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_unknown_log_format_rejected() {
        let err = AppConfig::from_toml("[logging]\nformat = \"xml\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_unknown_isolation_is_parse_error() {
        let err = AppConfig::from_toml("[race]\nisolation = \"snapshot\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_worker_upper_bound() {
        let err = AppConfig::from_toml("[race]\nworkers = 1025\n").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(AppConfig::from_toml("[race]\nworkers = 1024\n").is_ok());
    }

    #[test]
    fn test_sqlite_rejects_isolation_level() {
        let err = AppConfig::from_toml(
            "[database]\nbackend = \"sqlite\"\n[race]\nisolation = \"serializable\"\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_overrides_replace_file_values() {
        let mut config = AppConfig::from_toml("[race]\nworkers = 4\n").unwrap();
        config
            .apply_race_overrides(RaceOverrides {
                backend: Some(Backend::Sqlite),
                workers: Some(2),
                isolation: None,
                lock_rows: true,
            })
            .unwrap();
        assert_eq!(config.database.backend, Backend::Sqlite);
        assert_eq!(config.race.workers, 2);
        assert_eq!(config.race.isolation, Isolation::Default);
        assert!(config.race.lock_rows);
    }

    #[test]
    fn test_zero_workers_override_rejected() {
        let mut config = AppConfig::default();
        let err = config
            .apply_race_overrides(RaceOverrides {
                workers: Some(0),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_lock_rows_from_file_survives_overrides() {
        let mut config = AppConfig::from_toml("[race]\nlock_rows = true\n").unwrap();
        config.apply_race_overrides(RaceOverrides::default()).unwrap();
        assert!(config.race.lock_rows);
    }

    #[test]
    fn test_isolation_override_checked_against_backend() {
        let mut config =
            AppConfig::from_toml("[database]\nbackend = \"sqlite\"\n").unwrap();
        let err = config
            .apply_race_overrides(RaceOverrides {
                isolation: Some(Isolation::RepeatableRead),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = AppConfig::load("/nonexistent/dingo.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn test_default_log_filter_names_crate() {
        assert_eq!(DEFAULT_LOG_FILTER, "dingo=debug,tower_http=debug");
    }
}
