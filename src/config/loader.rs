// Configuration Loading
// TOML file -> environment overrides -> validation

use crate::config::AppConfig;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_PATH_ENV: &str = "DEVLINK_CONFIG";

/// File name searched for in the working directory
pub const CONFIG_FILE_NAME: &str = "devlink.toml";

/// Errors from configuration loading
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Locate the config file.
///
/// Search order:
/// 1. `DEVLINK_CONFIG` environment variable (must exist if set)
/// 2. `./devlink.toml`
///
/// Returns `Ok(None)` when no file is present; built-in defaults apply then.
pub fn find_config_file() -> Result<Option<PathBuf>, ConfigError> {
    if let Ok(env_path) = env::var(CONFIG_PATH_ENV) {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(Some(path));
        }
        return Err(ConfigError::FileNotFound(format!(
            "{} points at {}, which does not exist",
            CONFIG_PATH_ENV,
            path.display()
        )));
    }

    let local = env::current_dir()?.join(CONFIG_FILE_NAME);
    if local.exists() {
        return Ok(Some(local));
    }
    Ok(None)
}

/// Load, override and validate the configuration
pub fn load_config(config_path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let config_file = match config_path {
        Some(path) => {
            if !path.exists() {
                return Err(ConfigError::FileNotFound(path.display().to_string()));
            }
            Some(path.to_path_buf())
        }
        None => find_config_file()?,
    };

    let mut config = match config_file {
        Some(path) => {
            debug!(path = %path.display(), "loading configuration");
            parse_config(&fs::read_to_string(&path)?)?
        }
        None => AppConfig::default(),
    };

    apply_environment_overrides(&mut config);
    config.validate()?;
    Ok(config)
}

/// Parse a TOML document; missing keys take their defaults
pub fn parse_config(content: &str) -> Result<AppConfig, ConfigError> {
    Ok(toml::from_str(content)?)
}

/// Apply environment variable overrides
///
/// Supported variables:
/// - `DEVLINK_SETTLE_DELAY_MS` -> `connection.settle_delay_ms`
/// - `DEVLINK_REPLY_TIMEOUT_MS` -> `connection.reply_timeout_ms`
/// - `DEVLINK_STREAM_POLL_TIMEOUT_MS` -> `connection.stream_poll_timeout_ms`
/// - `DEVLINK_LOG_LEVEL` -> `logging.level`
pub fn apply_environment_overrides(config: &mut AppConfig) {
    if let Some(ms) = env_millis("DEVLINK_SETTLE_DELAY_MS") {
        config.connection.settle_delay_ms = ms;
    }
    if let Some(ms) = env_millis("DEVLINK_REPLY_TIMEOUT_MS") {
        config.connection.reply_timeout_ms = ms;
    }
    if let Some(ms) = env_millis("DEVLINK_STREAM_POLL_TIMEOUT_MS") {
        config.connection.stream_poll_timeout_ms = ms;
    }
    if let Ok(level) = env::var("DEVLINK_LOG_LEVEL") {
        config.logging.level = level;
    }
}

fn env_millis(name: &str) -> Option<u64> {
    let value = env::var(name).ok()?;
    match value.trim().parse() {
        Ok(ms) => Some(ms),
        Err(_) => {
            warn!(variable = name, value = %value, "ignoring non-numeric override");
            None
        }
    }
}
