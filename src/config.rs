//! Runtime configuration for the plugin host
//!
//! Settings are loaded from a TOML file (or defaults) and handed to the
//! `PluginManager` at construction time. Every field has a conservative
//! default so a host can run without any configuration file at all.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while loading runtime settings
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse settings: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Settings that shape plugin lifecycle behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    /// Upper bound, in seconds, on how long a single plugin's `init` may run
    /// before the manager marks it failed. `None` waits indefinitely.
    pub activation_timeout_secs: Option<u64>,

    /// Whether the manager publishes `plugin:activated`, `plugin:failed` and
    /// `plugin:disabled` announcements on the event bus.
    pub announce_lifecycle_events: bool,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            activation_timeout_secs: Some(30),
            announce_lifecycle_events: true,
        }
    }
}

impl RuntimeSettings {
    /// The activation timeout as a [`Duration`], if one is configured
    pub fn activation_timeout(&self) -> Option<Duration> {
        self.activation_timeout_secs.map(Duration::from_secs)
    }

    /// Parse settings from a TOML document
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    /// Load settings from a TOML file on disk
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }
}
