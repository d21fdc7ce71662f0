// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Node configuration.

use crate::frame::DEFAULT_MAX_MESSAGE_SIZE;
use crate::header::DEFAULT_MAX_HEADER_SIZE;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// TCPROS node configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Fully qualified node name, sent as `callerid` (default: /hdds_tcpros)
    #[serde(default = "default_name")]
    pub name: String,

    /// Address to bind the TCPROS listener to (default: 0.0.0.0)
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,

    /// TCP port to listen on (0 = ephemeral)
    #[serde(default)]
    pub port: u16,

    /// Queue size used by subscriptions that do not pick one
    #[serde(default = "default_queue_size")]
    pub default_queue_size: usize,

    /// Maximum accepted connection header size (bytes)
    #[serde(default = "default_max_header_size")]
    pub max_header_size: usize,

    /// Maximum accepted message body size (bytes)
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Outbound connect timeout in milliseconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Per-subscriber broadcast write timeout in milliseconds (0 = none)
    #[serde(default = "default_write_timeout")]
    pub write_timeout_ms: u64,

    /// Request TCP_NODELAY from publishers we subscribe to
    #[serde(default)]
    pub tcp_nodelay: bool,
}

fn default_name() -> String {
    "/hdds_tcpros".to_string()
}

fn default_bind_address() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_queue_size() -> usize {
    100
}

fn default_max_header_size() -> usize {
    DEFAULT_MAX_HEADER_SIZE
}

fn default_max_message_size() -> usize {
    DEFAULT_MAX_MESSAGE_SIZE
}

fn default_connect_timeout() -> u64 {
    5000
}

fn default_write_timeout() -> u64 {
    2000
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            bind_address: default_bind_address(),
            port: 0,
            default_queue_size: default_queue_size(),
            max_header_size: default_max_header_size(),
            max_message_size: default_max_message_size(),
            connect_timeout_ms: default_connect_timeout(),
            write_timeout_ms: default_write_timeout(),
            tcp_nodelay: false,
        }
    }
}

impl NodeConfig {
    /// Default configuration under another node name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Save configuration to a JSON file.
    pub fn to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Broadcast write timeout, `None` when disabled.
    pub fn write_timeout(&self) -> Option<Duration> {
        (self.write_timeout_ms > 0).then(|| Duration::from_millis(self.write_timeout_ms))
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.name.starts_with('/') || self.name.len() < 2 {
            return Err(ConfigError::InvalidValue(format!(
                "name must be a fully qualified graph name, got '{}'",
                self.name
            )));
        }
        if self.default_queue_size == 0 {
            return Err(ConfigError::InvalidValue(
                "default_queue_size cannot be 0".into(),
            ));
        }
        if self.max_header_size == 0 {
            return Err(ConfigError::InvalidValue(
                "max_header_size cannot be 0".into(),
            ));
        }
        if self.max_message_size == 0 || self.max_message_size > u32::MAX as usize {
            return Err(ConfigError::InvalidValue(format!(
                "max_message_size must be in 1..={}",
                u32::MAX
            )));
        }
        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "connect_timeout_ms cannot be 0".into(),
            ));
        }
        Ok(())
    }
}

/// Configuration error types.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid value: {0}")]
    InvalidValue(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = NodeConfig::default();
        assert_eq!(config.port, 0);
        assert_eq!(config.default_queue_size, 100);
        assert_eq!(config.write_timeout(), Some(Duration::from_secs(2)));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: NodeConfig =
            serde_json::from_str(r#"{"name": "/talker", "port": 11411}"#).unwrap();
        assert_eq!(config.name, "/talker");
        assert_eq!(config.port, 11411);
        assert_eq!(config.connect_timeout_ms, 5000);
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.json");

        let config = NodeConfig {
            write_timeout_ms: 0,
            tcp_nodelay: true,
            ..NodeConfig::named("/bridge")
        };
        config.to_file(&path).unwrap();

        let loaded = NodeConfig::from_file(&path).unwrap();
        assert_eq!(loaded.name, "/bridge");
        assert!(loaded.tcp_nodelay);
        assert_eq!(loaded.write_timeout(), None);
    }

    #[test]
    fn test_missing_file() {
        let err = NodeConfig::from_file(Path::new("/nonexistent/node.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn test_validation_rejects_relative_name() {
        assert!(NodeConfig::named("talker").validate().is_err());
        assert!(NodeConfig::named("/").validate().is_err());
    }

    #[test]
    fn test_validation_queue_size_zero() {
        let config = NodeConfig {
            default_queue_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
