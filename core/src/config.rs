// Configuration for the transport factory and the notification dispatcher
//
// Stored as JSON; every field is optional and falls back to its default.

use crate::error::TransportError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Transport layer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// RSSI discovery filter applied before discovery starts (dBm, `None` disables it)
    pub discovery_rssi_threshold: Option<i16>,

    /// List devices whose RSSI reads 0, i.e. not seen in the current discovery
    pub include_silent_devices: bool,

    /// Notification dispatcher settings
    pub dispatcher: DispatcherConfig,
}

/// Notification dispatcher configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Upper bound of concurrently running listener threads
    pub max_threads: usize,

    /// Name given to listener threads
    pub thread_name: String,

    /// Idle time before a listener thread exits (milliseconds)
    pub keep_alive_ms: u64,

    /// How long a draining shutdown waits for queued notifications (milliseconds)
    pub drain_timeout_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            discovery_rssi_threshold: Some(-100),
            include_silent_devices: false,
            dispatcher: DispatcherConfig::default(),
        }
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_threads: 512,
            thread_name: "bluebridge-notify".to_string(),
            keep_alive_ms: 10_000,
            drain_timeout_ms: 5_000,
        }
    }
}

impl TransportConfig {
    /// Parse and validate a JSON configuration document
    pub fn from_json(json: &str) -> Result<Self, TransportError> {
        let config: TransportConfig =
            serde_json::from_str(json).map_err(|e| TransportError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = Self::from_json(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Save configuration to a JSON file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path.as_ref(), contents).context("Failed to write config file")?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), TransportError> {
        if let Some(threshold) = self.discovery_rssi_threshold {
            if !(-127..=20).contains(&threshold) {
                return Err(TransportError::InvalidConfig(format!(
                    "discovery_rssi_threshold {} dBm is outside -127..=20",
                    threshold
                )));
            }
        }
        self.dispatcher.validate()
    }
}

impl DispatcherConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), TransportError> {
        if self.max_threads == 0 {
            return Err(TransportError::InvalidConfig(
                "dispatcher.max_threads must be > 0".to_string(),
            ));
        }
        if self.thread_name.is_empty() {
            return Err(TransportError::InvalidConfig(
                "dispatcher.thread_name must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
