//! Balance configuration
//!
//! Settings are plain JSON, every field optional:
//!
//! ```json
//! {
//!   "serial": { "port_name": "/dev/ttyUSB0", "baud_rate": 9600 },
//!   "channel": { "timeout_ms": 5000 }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::protocol::{ChannelConfig, ProtocolError, Result, SerialConfig};

/// Complete configuration for one balance
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BalanceConfig {
    pub serial: SerialConfig,
    pub channel: ChannelConfig,
}

impl BalanceConfig {
    /// Parse configuration from a JSON string
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| ProtocolError::Config(e.to_string()))
    }

    /// Load configuration from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ProtocolError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&content)
    }

    /// Save configuration as pretty-printed JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| ProtocolError::Config(e.to_string()))?;
        std::fs::write(path, json)
            .map_err(|e| ProtocolError::Config(format!("{}: {}", path.display(), e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_json_gives_defaults() {
        let config = BalanceConfig::from_json_str("{}").unwrap();
        assert_eq!(config, BalanceConfig::default());
        assert_eq!(config.channel.timeout_ms, 5000);
        assert_eq!(config.serial.baud_rate, 9600);
    }

    #[test]
    fn test_partial_override() {
        let config =
            BalanceConfig::from_json_str(r#"{"serial": {"port_name": "COM4"}, "channel": {"timeout_ms": 250}}"#)
                .unwrap();
        assert_eq!(config.serial.port_name, "COM4");
        assert_eq!(config.serial.baud_rate, 9600);
        assert_eq!(config.channel.timeout_ms, 250);
        assert_eq!(config.channel.read_chunk, 128);
    }

    #[test]
    fn test_invalid_json() {
        let err = BalanceConfig::from_json_str("{serial").unwrap_err();
        assert!(matches!(err, ProtocolError::Config(_)));
    }
}
