// Config module - SETTINGS
// TOML-backed configuration with environment overrides

mod loader;
mod types;

pub use loader::{
    apply_environment_overrides, find_config_file, load_config, parse_config, ConfigError,
    CONFIG_FILE_NAME, CONFIG_PATH_ENV,
};
pub use types::{AppConfig, ConnectionConfig, EndpointDefaults, LoggingConfig, ShellConfig};
