use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::{path::Path, time::Duration};

use crate::{core::session::EngineConfig, protocol::device::DEFAULT_CHANNEL_PREFIX};

/// Route used to deliver device commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchRoute {
    /// Through the backend's command endpoint
    #[default]
    Http,
    /// Published straight to the device channel on the broker
    Mqtt,
}

/// Backend REST settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Base URL, e.g. `http://localhost:8080/api`. No backend means offline
    /// session ids and no remote finalize.
    pub base_url: Option<String>,
    pub request_timeout_ms: u64,
    /// Send the device channel name along with each command
    pub include_channel: bool,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            request_timeout_ms: 10_000,
            include_channel: false,
        }
    }
}

/// Pub/sub broker settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub url: String,
    pub client_prefix: String,
    pub keep_alive_secs: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: "mqtt://localhost:1883".to_string(),
            client_prefix: "reflex-hub".to_string(),
            keep_alive_secs: 30,
        }
    }
}

/// Device fleet settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DevicesConfig {
    pub count: u8,
    pub channel_prefix: String,
}

impl Default for DevicesConfig {
    fn default() -> Self {
        Self {
            count: 5,
            channel_prefix: DEFAULT_CHANNEL_PREFIX.to_string(),
        }
    }
}

/// Session timing settings (milliseconds)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub reaction_timeout_ms: u64,
    pub settle_delay_ms: u64,
    pub round_pause_ms: u64,
    pub tick_interval_ms: u64,
    pub start_command: String,
    pub monitor_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reaction_timeout_ms: 3000,
            settle_delay_ms: 1000,
            round_pause_ms: 2000,
            tick_interval_ms: 1000,
            start_command: "start".to_string(),
            monitor_capacity: 500,
        }
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub backend: BackendConfig,
    pub broker: BrokerConfig,
    pub devices: DevicesConfig,
    pub session: SessionConfig,
    pub dispatch: DispatchRoute,
}

impl AppConfig {
    /// Parse configuration from a JSON string
    pub fn from_json(json_str: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: Self = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Read configuration from a file; `.json` files are JSON, anything
    /// else is TOML.
    pub fn from_file(file_path: impl AsRef<Path>) -> Result<Self> {
        let path = file_path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|err| anyhow!("Failed to read config {}: {err}", path.display()))?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json(&content),
            _ => Self::from_toml(&content),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.devices.count == 0 {
            return Err(anyhow!("devices.count must be between 1 and 255"));
        }
        if self.devices.channel_prefix.is_empty() {
            return Err(anyhow!("devices.channel_prefix must not be empty"));
        }
        let durations = [
            ("session.reaction_timeout_ms", self.session.reaction_timeout_ms),
            ("session.tick_interval_ms", self.session.tick_interval_ms),
            ("backend.request_timeout_ms", self.backend.request_timeout_ms),
        ];
        for (name, value) in durations {
            if value == 0 {
                return Err(anyhow!("{name} must be positive"));
            }
        }
        if self.session.start_command.trim().is_empty() {
            return Err(anyhow!("session.start_command must not be empty"));
        }
        if self.dispatch == DispatchRoute::Http && self.backend.base_url.is_none() {
            log::warn!("HTTP dispatch without a backend URL: commands will only be logged");
        }
        Ok(())
    }

    pub fn engine_config(&self, random_seed: Option<u64>) -> EngineConfig {
        EngineConfig {
            settle_delay: Duration::from_millis(self.session.settle_delay_ms),
            round_pause: Duration::from_millis(self.session.round_pause_ms),
            tick_interval: Duration::from_millis(self.session.tick_interval_ms),
            start_command: self.session.start_command.clone(),
            random_seed,
            monitor_capacity: self.session.monitor_capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.devices.count, 5);
        assert_eq!(config.devices.channel_prefix, "esp32-");
        assert_eq!(config.session.reaction_timeout_ms, 3000);
        assert_eq!(config.session.settle_delay_ms, 1000);
        assert_eq!(config.session.round_pause_ms, 2000);
        assert_eq!(config.dispatch, DispatchRoute::Http);
        assert!(!config.backend.include_channel);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml() -> Result<()> {
        let config = AppConfig::from_toml(
            r#"
            dispatch = "mqtt"

            [backend]
            base_url = "http://localhost:8080/api"

            [devices]
            count = 3

            [session]
            reaction_timeout_ms = 1500
            "#,
        )?;
        assert_eq!(config.dispatch, DispatchRoute::Mqtt);
        assert_eq!(config.backend.base_url.as_deref(), Some("http://localhost:8080/api"));
        assert_eq!(config.devices.count, 3);
        assert_eq!(config.devices.channel_prefix, "esp32-");
        assert_eq!(config.session.reaction_timeout_ms, 1500);
        assert_eq!(config.session.round_pause_ms, 2000);
        Ok(())
    }

    #[test]
    fn test_json_serialization() -> Result<()> {
        let mut config = AppConfig::default();
        config.backend.include_channel = true;
        config.session.start_command = "go".to_string();

        let json = config.to_json()?;
        let parsed = AppConfig::from_json(&json)?;
        assert_eq!(parsed, config);
        Ok(())
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert!(AppConfig::from_toml("[devices]\ncount = 0").is_err());
        assert!(AppConfig::from_toml("[session]\nreaction_timeout_ms = 0").is_err());
        assert!(AppConfig::from_toml("[session]\ntick_interval_ms = 0").is_err());
        // An unbounded request would stall the engine thread.
        assert!(AppConfig::from_toml("[backend]\nrequest_timeout_ms = 0").is_err());
        assert!(AppConfig::from_toml("[devices]\ncount = 300").is_err());
    }

    #[test]
    fn test_engine_config() {
        let config = AppConfig::default();
        let engine = config.engine_config(Some(7));
        assert_eq!(engine.settle_delay, Duration::from_secs(1));
        assert_eq!(engine.round_pause, Duration::from_secs(2));
        assert_eq!(engine.start_command, "start");
        assert_eq!(engine.random_seed, Some(7));
    }
}
