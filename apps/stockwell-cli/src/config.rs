//! CLI configuration.
//!
//! Layered with the `config` crate, later layers winning:
//!
//! ```text
//! built-in defaults
//!   └─► stockwell.toml in the working directory (optional)
//!         or the file given with --config (required)
//!           └─► STOCKWELL_* environment variables
//!                 e.g. STOCKWELL_DATABASE_PATH=/var/lib/stockwell.db
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use stockwell_core::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
use stockwell_db::{DbConfig, RetryPolicy};

/// Path value that selects a throwaway in-memory database.
pub const IN_MEMORY_PATH: &str = ":memory:";

/// Stockwell CLI configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockwellConfig {
    /// SQLite database file, or `:memory:`
    pub database_path: PathBuf,

    /// Pool size
    pub max_connections: u32,

    /// Pool acquire timeout in seconds
    pub connect_timeout_secs: u64,

    /// How long a writer waits on a locked database, in milliseconds
    pub busy_timeout_ms: u64,

    /// Attempts per transaction on contention, including the first
    pub retry_max_attempts: u32,

    /// Linear retry backoff step in milliseconds
    pub retry_backoff_ms: u64,

    /// Page size for `history` when --limit is not given
    pub default_page_size: u32,

    /// Largest page `history` may request
    pub max_page_size: u32,

    /// `tracing` filter directive; `RUST_LOG` wins when set
    pub log_filter: String,

    /// Date expiry is judged against (defaults to today, UTC)
    #[serde(default)]
    pub business_date: Option<NaiveDate>,
}

impl StockwellConfig {
    /// Loads defaults, then the config file, then the environment.
    ///
    /// With `path = None` a `stockwell.toml` in the working directory is
    /// used if present.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => ::config::File::from(path).required(true),
            None => ::config::File::with_name("stockwell").required(false),
        };

        let settings = ::config::Config::builder()
            .set_default("database_path", "stockwell.db")?
            .set_default("max_connections", 5)?
            .set_default("connect_timeout_secs", 30)?
            .set_default("busy_timeout_ms", 5000)?
            .set_default("retry_max_attempts", 3)?
            .set_default("retry_backoff_ms", 25)?
            .set_default("default_page_size", DEFAULT_PAGE_SIZE as i64)?
            .set_default("max_page_size", MAX_PAGE_SIZE as i64)?
            .set_default("log_filter", "stockwell=info,stockwell_db=info")?
            .add_source(file)
            .add_source(::config::Environment::with_prefix("STOCKWELL").try_parsing(true))
            .build()?;

        let config: StockwellConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database_path.as_os_str().is_empty() {
            return Err(ConfigError::MissingRequired("database_path".to_string()));
        }
        if self.max_connections == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_connections".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.retry_max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "retry_max_attempts".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.max_page_size == 0 || self.max_page_size > MAX_PAGE_SIZE {
            return Err(ConfigError::InvalidValue {
                field: "max_page_size".to_string(),
                reason: format!("must be between 1 and {MAX_PAGE_SIZE}"),
            });
        }
        if self.default_page_size == 0 || self.default_page_size > self.max_page_size {
            return Err(ConfigError::InvalidValue {
                field: "default_page_size".to_string(),
                reason: format!("must be between 1 and max_page_size ({})", self.max_page_size),
            });
        }
        Ok(())
    }

    pub fn is_in_memory(&self) -> bool {
        self.database_path.as_os_str() == IN_MEMORY_PATH
    }

    pub fn db_config(&self) -> DbConfig {
        let base = if self.is_in_memory() {
            DbConfig::in_memory()
        } else {
            DbConfig::new(&self.database_path).max_connections(self.max_connections)
        };
        base.connect_timeout(Duration::from_secs(self.connect_timeout_secs))
            .busy_timeout(Duration::from_millis(self.busy_timeout_ms))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_max_attempts, Duration::from_millis(self.retry_backoff_ms))
    }

    /// Page size for a listing, clamped to the configured maximum.
    pub fn page_size(&self, requested: Option<u32>) -> u32 {
        requested
            .unwrap_or(self.default_page_size)
            .clamp(1, self.max_page_size)
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_file_overrides_defaults() {
        let file = write_config(
            r#"
            database_path = "/tmp/shop.db"
            retry_max_attempts = 7
            business_date = "2024-12-01"
            "#,
        );

        let config = StockwellConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.database_path, PathBuf::from("/tmp/shop.db"));
        assert_eq!(config.retry_max_attempts, 7);
        assert_eq!(config.busy_timeout_ms, 5000);
        assert_eq!(config.business_date, NaiveDate::from_ymd_opt(2024, 12, 1));
        assert_eq!(config.retry_policy().max_attempts, 7);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let err = StockwellConfig::load(Some(Path::new("/nonexistent/stockwell.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Load(_)));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let file = write_config("max_connections = 0\n");
        let err = StockwellConfig::load(Some(file.path())).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "max_connections"));

        let file = write_config("default_page_size = 100\nmax_page_size = 10\n");
        let err = StockwellConfig::load(Some(file.path())).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "default_page_size"));
    }

    #[test]
    fn test_in_memory_and_page_size() {
        let file = write_config("database_path = \":memory:\"\nmax_page_size = 20\ndefault_page_size = 5\n");
        let config = StockwellConfig::load(Some(file.path())).unwrap();

        assert!(config.is_in_memory());
        assert!(config.db_config().is_in_memory());
        assert_eq!(config.page_size(None), 5);
        assert_eq!(config.page_size(Some(1000)), 20);
        assert_eq!(config.page_size(Some(0)), 1);
    }
}
