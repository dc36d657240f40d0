// Configuration Types
// Connection timing, trigger vocabulary, endpoint defaults, shell and logging settings

use crate::config::ConfigError;
use crate::connection::{TriggerTable, DEFAULT_QUEUE_CAPACITY};
use crate::transport::{DEFAULT_BAUD_RATE, DEFAULT_READ_BUFFER_SIZE, DEFAULT_RFCOMM_CHANNEL};
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ============================================================================
// CONNECTION CONFIG
// ============================================================================

/// Timing and buffering for a `Connection`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// How long `connect` waits for a welcome banner
    pub welcome_timeout_ms: u64,
    /// Pause between transmitting a command and polling for its reply
    pub settle_delay_ms: u64,
    /// How long a command waits for its reply after the settle delay
    pub reply_timeout_ms: u64,
    /// Poll interval of the stream listener; bounds cancellation latency
    pub stream_poll_timeout_ms: u64,
    /// How long stopping a stream waits for the listener to finish
    pub stop_join_timeout_ms: u64,
    /// Upper bound for a single socket read
    pub read_buffer_size: usize,
    /// Streamed chunks kept for consumers; the oldest is dropped when full
    pub queue_capacity: usize,
    /// Substrings that switch streaming mode on and off
    pub triggers: TriggerTable,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            welcome_timeout_ms: 2000,
            settle_delay_ms: 500,
            reply_timeout_ms: 2000,
            stream_poll_timeout_ms: 500,
            stop_join_timeout_ms: 2000,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            triggers: TriggerTable::default(),
        }
    }
}

impl ConnectionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_welcome_timeout_ms(mut self, ms: u64) -> Self {
        self.welcome_timeout_ms = ms;
        self
    }

    pub fn with_settle_delay_ms(mut self, ms: u64) -> Self {
        self.settle_delay_ms = ms;
        self
    }

    pub fn with_reply_timeout_ms(mut self, ms: u64) -> Self {
        self.reply_timeout_ms = ms;
        self
    }

    pub fn with_stream_poll_timeout_ms(mut self, ms: u64) -> Self {
        self.stream_poll_timeout_ms = ms;
        self
    }

    pub fn with_stop_join_timeout_ms(mut self, ms: u64) -> Self {
        self.stop_join_timeout_ms = ms;
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_triggers(mut self, triggers: TriggerTable) -> Self {
        self.triggers = triggers;
        self
    }

    pub fn welcome_timeout(&self) -> Duration {
        Duration::from_millis(self.welcome_timeout_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout_ms)
    }

    pub fn stream_poll_timeout(&self) -> Duration {
        Duration::from_millis(self.stream_poll_timeout_ms)
    }

    pub fn stop_join_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_join_timeout_ms)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let timeouts = [
            ("reply_timeout_ms", self.reply_timeout_ms),
            ("stream_poll_timeout_ms", self.stream_poll_timeout_ms),
            ("stop_join_timeout_ms", self.stop_join_timeout_ms),
        ];
        for (name, value) in timeouts {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{} cannot be 0", name)));
            }
        }
        if self.read_buffer_size == 0 {
            return Err(ConfigError::Invalid("read_buffer_size cannot be 0".to_string()));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid("queue_capacity cannot be 0".to_string()));
        }
        self.triggers.validate()
    }
}

// ============================================================================
// ENDPOINT DEFAULTS
// ============================================================================

/// Defaults applied when the command line leaves them out
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointDefaults {
    pub rfcomm_channel: u8,
    pub baud_rate: u32,
}

impl Default for EndpointDefaults {
    fn default() -> Self {
        Self {
            rfcomm_channel: DEFAULT_RFCOMM_CHANNEL,
            baud_rate: DEFAULT_BAUD_RATE,
        }
    }
}

// ============================================================================
// SHELL CONFIG
// ============================================================================

/// Interactive driver settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShellConfig {
    /// Input line that ends the session (case-insensitive)
    pub exit_command: String,
    /// Appended to every command before it is sent
    pub line_ending: String,
    pub prompt: String,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            exit_command: "exit".to_string(),
            line_ending: String::new(),
            prompt: "> ".to_string(),
        }
    }
}

impl ShellConfig {
    pub fn with_line_ending(mut self, line_ending: &str) -> Self {
        self.line_ending = line_ending.to_string();
        self
    }

    pub fn with_prompt(mut self, prompt: &str) -> Self {
        self.prompt = prompt.to_string();
        self
    }
}

// ============================================================================
// LOGGING CONFIG
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default `tracing` filter when `RUST_LOG` is unset
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

// ============================================================================
// APP CONFIG
// ============================================================================

/// Everything the `devlink` binary reads from `devlink.toml`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub connection: ConnectionConfig,
    pub endpoint: EndpointDefaults,
    pub shell: ShellConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.connection.validate()?;
        if self.shell.exit_command.trim().is_empty() {
            return Err(ConfigError::Invalid("shell.exit_command cannot be empty".to_string()));
        }
        Ok(())
    }
}
