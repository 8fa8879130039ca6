// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Agent configuration loaded from a JSON file.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// Indicates the configuration file could not be read or parsed.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file could not be opened or read
    #[error(transparent)]
    FileReadError(#[from] std::io::Error),
    /// The JSON data could not be parsed
    #[error(transparent)]
    JsonParseError(#[from] serde_json::Error),
}

/// One adapter connection the agent maintains.
#[derive(Debug, Clone, Deserialize)]
pub struct AdapterConfig {
    /// Device name or uuid from the devices file this adapter feeds
    pub device: String,
    /// Adapter hostname
    pub host: String,
    /// Adapter SHDR port
    pub port: u16,
}

/// Top-level agent configuration.
#[derive(Debug, Deserialize)]
pub struct AgentConfig {
    /// Path to the MTConnect device description XML
    pub devices_file: PathBuf,
    /// HTTP listen port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Sample buffer capacity
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Asset buffer capacity
    #[serde(default = "default_asset_buffer_size")]
    pub asset_buffer_size: usize,
    /// Value reported in the `sender` header attribute
    #[serde(default = "default_sender")]
    pub sender: String,
    /// Adapters to connect to
    #[serde(default)]
    pub adapters: Vec<AdapterConfig>,
}

fn default_port() -> u16 {
    5000
}

fn default_buffer_size() -> usize {
    mtconnect_agent_store::data_store::DEFAULT_BUFFER_SIZE
}

fn default_asset_buffer_size() -> usize {
    mtconnect_agent_store::asset_store::DEFAULT_ASSET_BUFFER_SIZE
}

fn default_sender() -> String {
    "mtconnect-agent".to_string()
}

impl AgentConfig {
    /// Reads the configuration from a JSON file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_applied() {
        let config: AgentConfig =
            serde_json::from_str(r#"{ "devices_file": "devices.xml" }"#).unwrap();
        assert_eq!(config.port, 5000);
        assert_eq!(config.buffer_size, 10);
        assert_eq!(config.asset_buffer_size, 1024);
        assert_eq!(config.sender, "mtconnect-agent");
        assert!(config.adapters.is_empty());
    }

    #[test]
    fn test_full_config() {
        let config: AgentConfig = serde_json::from_str(
            r#"{
                "devices_file": "/etc/mtconnect/devices.xml",
                "port": 5001,
                "buffer_size": 131072,
                "asset_buffer_size": 2048,
                "sender": "shop-floor-agent",
                "adapters": [
                    { "device": "VMC-3Axis", "host": "192.168.0.10", "port": 7878 }
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(config.buffer_size, 131_072);
        assert_eq!(config.adapters.len(), 1);
        assert_eq!(config.adapters[0].device, "VMC-3Axis");
    }

    #[test]
    fn test_missing_devices_file_rejected() {
        assert!(serde_json::from_str::<AgentConfig>("{}").is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let result = AgentConfig::load(Path::new("/nonexistent/agent.json"));
        assert!(matches!(result, Err(ConfigError::FileReadError(_))));
    }
}
