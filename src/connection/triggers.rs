// Trigger Table
// Substring vocabulary that flips streaming mode as a side effect of sending a command

use crate::config::ConfigError;
use serde::{Deserialize, Serialize};

/// Mode transition requested by a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeChange {
    StartStreaming,
    StopStreaming,
}

/// Case-insensitive substrings recognised in outgoing commands.
///
/// The device has no framing protocol; whether its output is a reply or
/// telemetry is inferred from what was last sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerTable {
    pub start: Vec<String>,
    pub stop: Vec<String>,
}

impl Default for TriggerTable {
    fn default() -> Self {
        Self::new(
            &["sensors start", "start_sensors", "debugging"],
            &["sensors stop", "stop_sensors", "stopping"],
        )
    }
}

impl TriggerTable {
    pub fn new(start: &[&str], stop: &[&str]) -> Self {
        Self {
            start: start.iter().map(|s| s.to_string()).collect(),
            stop: stop.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// A table that never changes mode
    pub fn empty() -> Self {
        Self {
            start: Vec::new(),
            stop: Vec::new(),
        }
    }

    pub fn with_start(mut self, trigger: &str) -> Self {
        self.start.push(trigger.to_string());
        self
    }

    pub fn with_stop(mut self, trigger: &str) -> Self {
        self.stop.push(trigger.to_string());
        self
    }

    /// Classify a command. A command matching both lists stops streaming.
    pub fn classify(&self, command: &str) -> Option<ModeChange> {
        let command = command.to_lowercase();
        let hit = |triggers: &[String]| {
            triggers
                .iter()
                .any(|t| !t.is_empty() && command.contains(&t.to_lowercase()))
        };

        if hit(&self.stop) {
            Some(ModeChange::StopStreaming)
        } else if hit(&self.start) {
            Some(ModeChange::StartStreaming)
        } else {
            None
        }
    }

    /// Reject blank triggers; a blank substring would match every command
    pub fn validate(&self) -> Result<(), ConfigError> {
        for trigger in self.start.iter().chain(&self.stop) {
            if trigger.trim().is_empty() {
                return Err(ConfigError::Invalid("trigger strings cannot be empty".to_string()));
            }
        }
        Ok(())
    }
}
