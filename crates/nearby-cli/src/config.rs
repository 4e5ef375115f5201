//! CLI configuration
//!
//! Loaded from an optional TOML file. Every field has a default, so a file
//! only needs the values it changes:
//!
//! ```toml
//! sender_name = "Bob"
//! chunk_size = 1024
//!
//! [nearby]
//! strict_activation = true
//! terminal_retention = { secs = 10, nanos = 0 }
//! ```

use std::path::Path;

use nearby_core::NearbyConfig;
use serde::{Deserialize, Serialize};

use crate::error::{CliError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Name the sending node connects with
    pub sender_name: String,
    /// Name the receiving node advertises
    pub receiver_name: String,
    /// Loopback chunk size in bytes
    pub chunk_size: usize,
    /// Seconds to wait for each step of the demo
    pub step_timeout_secs: u64,
    pub nearby: NearbyConfig,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            sender_name: "Sender".to_string(),
            receiver_name: "Receiver".to_string(),
            chunk_size: 4096,
            step_timeout_secs: 10,
            nearby: NearbyConfig::default(),
        }
    }
}

impl CliConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: CliConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(CliError::Config("chunk_size must be positive".to_string()));
        }
        if self.step_timeout_secs == 0 {
            return Err(CliError::Config(
                "step_timeout_secs must be positive".to_string(),
            ));
        }
        self.nearby.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = CliConfig::from_toml(
            r#"
            sender_name = "Bob"

            [nearby]
            strict_activation = true
            terminal_retention = { secs = 10, nanos = 0 }
            "#,
        )
        .unwrap();

        assert_eq!(config.sender_name, "Bob");
        assert_eq!(config.receiver_name, "Receiver");
        assert!(config.nearby.strict_activation);
        assert_eq!(config.nearby.terminal_retention, Duration::from_secs(10));
        assert_eq!(config.nearby.event_buffer_size, 256);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            CliConfig::from_toml("chunk_size = 0"),
            Err(CliError::Config(_))
        ));
        assert!(matches!(
            CliConfig::from_toml("[nearby]\nevent_buffer_size = 0"),
            Err(CliError::Nearby(_))
        ));
        assert!(matches!(
            CliConfig::from_toml("chunk_size = \"big\""),
            Err(CliError::TomlParsing(_))
        ));
    }

    #[test]
    fn test_default_config_survives_toml() {
        let config = CliConfig::default();
        let text = config.to_toml().unwrap();
        assert_eq!(CliConfig::from_toml(&text).unwrap(), config);
    }
}
