//! Configuration loading and resolution
//!
//! Bootstrap configuration lives in a small TOML file. Resolution order:
//! 1. Command-line argument (highest priority)
//! 2. `PAWSCOPE_CONFIG` environment variable
//! 3. Platform config directory (`<config dir>/pawscope/config.toml`)
//! 4. Built-in defaults (fallback)
//!
//! `PAWSCOPE_DATABASE_PATH` overrides `database.path` whichever source won.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "PAWSCOPE_CONFIG";

/// Environment variable overriding the database path
pub const DATABASE_PATH_ENV_VAR: &str = "PAWSCOPE_DATABASE_PATH";

/// Top-level bootstrap configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PawscopeConfig {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Relational store connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database file, or `:memory:`
    #[serde(default = "default_database_path")]
    pub path: PathBuf,

    /// Connection pool size
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// SQLite busy timeout in milliseconds
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

/// Telemetry pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Tag written to every prediction_log row
    #[serde(default = "default_model_version")]
    pub model_version: String,

    /// Records buffered between request handlers and the writer task.
    /// When full, new records are dropped rather than waited on.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Upper bound for a single persistence attempt
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("pawscope").join("pawscope.db"))
        .unwrap_or_else(|| PathBuf::from("./pawscope_data/pawscope.db"))
}

fn default_max_connections() -> u32 {
    5
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

fn default_model_version() -> String {
    "unversioned".to_string()
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_write_timeout_ms() -> u64 {
    2000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            max_connections: default_max_connections(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

impl DatabaseConfig {
    /// In-memory database, single connection (every connection would otherwise
    /// see its own empty database)
    pub fn in_memory() -> Self {
        Self {
            path: PathBuf::from(":memory:"),
            max_connections: 1,
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }

    pub fn is_in_memory(&self) -> bool {
        self.path.as_os_str() == ":memory:"
    }

    pub fn busy_timeout(&self) -> Duration {
        crate::time::millis_to_duration(self.busy_timeout_ms)
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            model_version: default_model_version(),
            queue_capacity: default_queue_capacity(),
            write_timeout_ms: default_write_timeout_ms(),
        }
    }
}

impl TelemetryConfig {
    pub fn write_timeout(&self) -> Duration {
        crate::time::millis_to_duration(self.write_timeout_ms)
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl PawscopeConfig {
    /// Parse configuration from TOML text and validate it
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: PawscopeConfig = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.database.max_connections == 0 {
            return Err(Error::Config(
                "database.max_connections must be greater than 0".to_string(),
            ));
        }
        if self.telemetry.queue_capacity == 0 {
            return Err(Error::Config(
                "telemetry.queue_capacity must be greater than 0".to_string(),
            ));
        }
        if self.telemetry.model_version.trim().is_empty() {
            return Err(Error::Config(
                "telemetry.model_version must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Locate the config file following the resolution order.
///
/// Returns `None` when nothing was requested explicitly and the platform
/// default does not exist.
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: Platform config directory
    dirs::config_dir()
        .map(|d| d.join("pawscope").join("config.toml"))
        .filter(|p| p.exists())
}

/// Load configuration, falling back to built-in defaults when no file is found.
///
/// An explicitly requested file (CLI or environment) that cannot be read is an error;
/// a missing platform default is not.
pub fn load_config(cli_arg: Option<&Path>) -> Result<PawscopeConfig> {
    let mut config = match resolve_config_path(cli_arg) {
        Some(path) => {
            let content = std::fs::read_to_string(&path).map_err(|e| {
                Error::Config(format!("Read config {} failed: {}", path.display(), e))
            })?;
            info!("Loaded configuration from {}", path.display());
            PawscopeConfig::from_toml_str(&content)?
        }
        None => {
            warn!("No configuration file found, using built-in defaults");
            PawscopeConfig::default()
        }
    };

    if let Ok(db_path) = std::env::var(DATABASE_PATH_ENV_VAR) {
        if !db_path.trim().is_empty() {
            info!("Database path overridden by {}", DATABASE_PATH_ENV_VAR);
            config.database.path = PathBuf::from(db_path);
        }
    }

    Ok(config)
}
