//! # Configuration Loading
//!
//! Environment variable loading (12-factor app principles) and TOML file
//! loading.
//!
//! # Environment Variables
//! - `FI_LOG_LEVEL`: Logging level (trace/debug/info/warn/error)
//! - `FI_TRACING_ENABLED`: Enable tracing spans (true/false)
//! - `PG_HOST`: Database host (default: "localhost")
//! - `PG_PORT`: Database port (default: 5432)
//! - `PG_DATABASE`: Database name (default: "fleet_inventory")
//! - `PG_USERNAME`: Database user (default: "postgres")
//! - `PG_PASSWORD`: Database password (default: "")
//! - `PG_POOL_SIZE`: Connection pool size (default: 10)
//! - `PG_TIMEOUT_SECONDS`: Connection timeout in seconds (default: 30)

use std::env;
use std::path::Path;

use thiserror::Error;

use crate::config::Config;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {reason}")]
    FileRead { path: String, reason: String },

    #[error("failed to parse config file {path}: {reason}")]
    FileParse { path: String, reason: String },

    #[error("invalid value for {variable}: {value}")]
    InvalidEnvValue { variable: String, value: String },
}

/// Load configuration from environment variables. Unset variables keep
/// their defaults; set-but-unparsable variables are an error rather than a
/// silent fallback.
pub fn load_from_env() -> Result<Config, ConfigError> {
    let mut config = Config::default();

    if let Ok(level) = env::var("FI_LOG_LEVEL") {
        config.observability.logging_level = level;
    }
    if let Ok(enabled) = env::var("FI_TRACING_ENABLED") {
        config.observability.tracing_enabled = parse_env("FI_TRACING_ENABLED", &enabled)?;
    }

    let postgres = &mut config.providers.postgres;
    if let Ok(host) = env::var("PG_HOST") {
        postgres.host = host;
    }
    if let Ok(port) = env::var("PG_PORT") {
        postgres.port = parse_env("PG_PORT", &port)?;
    }
    if let Ok(database) = env::var("PG_DATABASE") {
        postgres.database = database;
    }
    if let Ok(username) = env::var("PG_USERNAME") {
        postgres.username = username;
    }
    if let Ok(password) = env::var("PG_PASSWORD") {
        postgres.password = password;
    }
    if let Ok(pool_size) = env::var("PG_POOL_SIZE") {
        postgres.pool_size = parse_env("PG_POOL_SIZE", &pool_size)?;
    }
    if let Ok(timeout) = env::var("PG_TIMEOUT_SECONDS") {
        postgres.timeout_seconds = parse_env("PG_TIMEOUT_SECONDS", &timeout)?;
    }

    Ok(config)
}

/// Load configuration from a TOML file.
pub fn load_from_file(path: &Path) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;

    toml::from_str(&contents).map_err(|e| ConfigError::FileParse {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

fn parse_env<T: std::str::FromStr>(variable: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidEnvValue {
        variable: variable.to_string(),
        value: value.to_string(),
    })
}
