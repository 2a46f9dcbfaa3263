//! Agent configuration.
//!
//! Loaded from a TOML file at the OS config location, overridable with
//! `MONICA_NODE_CONFIG`. The shipped example values are deliberately
//! non-functional: the key and the endpoint list must be supplied explicitly
//! or the agent refuses to start.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Configuration failures. All fatal at startup: the agent never runs on a
/// missing or unusable configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found at {0}; set MONICA_NODE_CONFIG or create it (see config.example.toml)")]
    NotFound(String),
    #[error("cannot read config file {0}: {1}")]
    Unreadable(String, #[source] std::io::Error),
    #[error("invalid config file {0}: {1}")]
    Parse(String, #[source] toml::de::Error),
    #[error("controller_endpoints must list at least one controller")]
    NoEndpoints,
    #[error("heartbeat_interval_secs must be greater than zero")]
    ZeroInterval,
}

/// Top-level node configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Fleet pre-shared key, base64-encoded 32 bytes. Identical on every
    /// node and controller. Validated by the cipher channel at startup.
    pub encryption_key: String,
    /// Controller report endpoints in priority order. All of them are
    /// attempted every cycle for redundancy.
    pub controller_endpoints: Vec<String>,
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
    #[serde(default = "default_command_timeout")]
    pub default_command_timeout_secs: u64,
    #[serde(default = "default_max_command_timeout")]
    pub max_command_timeout_secs: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Services whose status rides along in every heartbeat.
    #[serde(default)]
    pub watched_services: Vec<String>,
    /// Identity file location, relative to the working directory.
    #[serde(default = "default_identity_path")]
    pub identity_path: PathBuf,
    /// Inbound command channel; the agent runs heartbeat-only when absent.
    #[serde(default)]
    pub command_channel: Option<CommandChannelConfig>,
}

/// MQTT settings for the inbound command channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandChannelConfig {
    pub broker_host: String,
    #[serde(default = "default_broker_port")]
    pub broker_port: u16,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u16,
}

fn default_heartbeat_interval() -> u64 {
    30
}

fn default_command_timeout() -> u64 {
    30
}

fn default_max_command_timeout() -> u64 {
    300
}

fn default_request_timeout() -> u64 {
    10
}

fn default_identity_path() -> PathBuf {
    PathBuf::from(".monica_node_id")
}

fn default_broker_port() -> u16 {
    1883
}

fn default_keep_alive() -> u16 {
    30
}

impl NodeConfig {
    /// Load and validate the configuration from disk.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::config_file_path();
        let shown = path.display().to_string();

        if !path.exists() {
            return Err(ConfigError::NotFound(shown));
        }
        let content =
            std::fs::read_to_string(&path).map_err(|e| ConfigError::Unreadable(shown.clone(), e))?;
        Self::from_toml(&content, &shown)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml(content: &str, origin: &str) -> Result<Self, ConfigError> {
        let config: NodeConfig =
            toml::from_str(content).map_err(|e| ConfigError::Parse(origin.to_string(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Config file location: `MONICA_NODE_CONFIG` wins, then the OS config
    /// directory.
    pub fn config_file_path() -> PathBuf {
        if let Ok(path) = std::env::var("MONICA_NODE_CONFIG") {
            return PathBuf::from(path);
        }
        let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push("monica-node");
        path.push("config.toml");
        path
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.controller_endpoints.is_empty() {
            return Err(ConfigError::NoEndpoints);
        }
        if self.heartbeat_interval_secs == 0 {
            return Err(ConfigError::ZeroInterval);
        }
        Ok(())
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn default_command_timeout(&self) -> Duration {
        Duration::from_secs(self.default_command_timeout_secs)
    }

    pub fn max_command_timeout(&self) -> Duration {
        Duration::from_secs(self.max_command_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"
        encryption_key = "c29tZS1yZWFsLWtleS1nb2VzLWhlcmUtMzItYnl0ZXMhIQ=="
        controller_endpoints = ["https://controller.example/api/v1/report"]
    "#;

    #[test]
    fn minimal_config_gets_defaults() {
        let config = NodeConfig::from_toml(VALID, "test").unwrap();
        assert_eq!(config.heartbeat_interval_secs, 30);
        assert_eq!(config.max_command_timeout_secs, 300);
        assert_eq!(config.identity_path, PathBuf::from(".monica_node_id"));
        assert!(config.command_channel.is_none());
        assert!(config.watched_services.is_empty());
    }

    #[test]
    fn empty_endpoint_list_is_rejected() {
        let toml = r#"
            encryption_key = "abc"
            controller_endpoints = []
        "#;
        assert!(matches!(
            NodeConfig::from_toml(toml, "test"),
            Err(ConfigError::NoEndpoints)
        ));
    }

    #[test]
    fn zero_interval_is_rejected() {
        let toml = r#"
            encryption_key = "abc"
            controller_endpoints = ["https://c.example/report"]
            heartbeat_interval_secs = 0
        "#;
        assert!(matches!(
            NodeConfig::from_toml(toml, "test"),
            Err(ConfigError::ZeroInterval)
        ));
    }

    #[test]
    fn command_channel_section_is_optional_with_port_default() {
        let toml = r#"
            encryption_key = "abc"
            controller_endpoints = ["https://c.example/report"]

            [command_channel]
            broker_host = "controller.example"
        "#;
        let config = NodeConfig::from_toml(toml, "test").unwrap();
        let channel = config.command_channel.unwrap();
        assert_eq!(channel.broker_host, "controller.example");
        assert_eq!(channel.broker_port, 1883);
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        assert!(matches!(
            NodeConfig::from_toml("not toml at all [", "test"),
            Err(ConfigError::Parse(_, _))
        ));
    }
}
