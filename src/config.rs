//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.

use serde::de::Error;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::Path;

use crate::codec::AES_KEY_SIZE;
use crate::error::{Result, UplinkError};
use crate::uplink::ChannelKind;

/// Highest number of input channels a device logs
pub const MAX_INPUTS: usize = 21;

/// Main configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,

    pub datalog: DatalogConfig,

    #[serde(default)]
    pub channels: Vec<ChannelConfig>,

    #[serde(rename = "uplink", default)]
    pub uplinks: Vec<UplinkConfig>,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is not set
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for daily rolling log files; console only when unset
    #[serde(default)]
    pub dir: Option<String>,

    #[serde(default = "default_log_file_prefix")]
    pub file_prefix: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            dir: None,
            file_prefix: default_log_file_prefix(),
        }
    }
}

/// Energy log source
#[derive(Debug, Deserialize, Clone)]
pub struct DatalogConfig {
    /// JSON-lines file the device logger appends to
    pub path: String,

    #[serde(default = "default_refresh_interval_s")]
    pub refresh_interval_s: u32,
}

/// One physical input channel
#[derive(Debug, Deserialize, Clone)]
pub struct ChannelConfig {
    pub index: usize,

    #[serde(default)]
    pub kind: ChannelKind,
}

/// Transport variant for an uplink
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    /// Bearer token, form-encoded body
    #[default]
    Plain,
    /// AES-128-CBC body, HMAC credential, digest-checked response
    Secure,
}

/// Derived output column: sum of the listed channels' averages
#[derive(Debug, Deserialize, Clone)]
pub struct OutputConfig {
    /// 1-based column in the posted row
    pub index: usize,

    pub channels: Vec<usize>,
}

/// One EmonCMS endpoint
#[derive(Debug, Deserialize, Clone)]
pub struct UplinkConfig {
    #[serde(default = "default_uplink_name")]
    pub name: String,

    /// Base URL, e.g. `https://emoncms.org`
    pub url: String,

    pub node: String,

    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_interval_s")]
    pub interval_s: u32,

    #[serde(default = "default_bulk_send")]
    pub bulk_send: u32,

    #[serde(default)]
    pub transport: TransportMode,

    #[serde(default)]
    pub username: String,

    /// 32 hex characters
    #[serde(default)]
    pub crypto_key: String,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    #[serde(default)]
    pub outputs: Vec<OutputConfig>,
}

// Default value functions
fn default_log_level() -> String { "info".to_string() }
fn default_log_file_prefix() -> String { "emon-uplink.log".to_string() }

fn default_refresh_interval_s() -> u32 { 5 }

fn default_uplink_name() -> String { "emoncms".to_string() }
fn default_interval_s() -> u32 { 10 }
fn default_bulk_send() -> u32 { 1 }
fn default_request_timeout_ms() -> u64 { 1000 }

fn invalid(message: impl std::fmt::Display) -> UplinkError {
    UplinkError::Config(toml::de::Error::custom(message))
}

impl UplinkConfig {
    /// Decode the shared secret
    ///
    /// # Errors
    ///
    /// Returns error unless `crypto_key` is exactly 32 hex characters
    pub fn crypto_key_bytes(&self) -> Result<[u8; AES_KEY_SIZE]> {
        let bytes = hex::decode(self.crypto_key.trim())
            .map_err(|e| invalid(format!("uplink '{}': crypto_key is not hex: {}", self.name, e)))?;

        bytes.try_into().map_err(|b: Vec<u8>| {
            invalid(format!(
                "uplink '{}': crypto_key must be {} bytes, got {}",
                self.name,
                AES_KEY_SIZE,
                b.len()
            ))
        })
    }

    fn validate(&self) -> Result<()> {
        if !(self.url.starts_with("http://") || self.url.starts_with("https://")) {
            return Err(invalid(format!("uplink '{}': url must start with http:// or https://", self.name)));
        }

        if self.node.trim().is_empty() {
            return Err(invalid(format!("uplink '{}': node cannot be empty", self.name)));
        }

        if self.interval_s < 5 || self.interval_s > 3600 {
            return Err(invalid(format!("uplink '{}': interval_s must be between 5 and 3600", self.name)));
        }

        if self.bulk_send == 0 || self.bulk_send > 10 {
            return Err(invalid(format!("uplink '{}': bulk_send must be between 1 and 10", self.name)));
        }

        if self.request_timeout_ms == 0 || self.request_timeout_ms > 60000 {
            return Err(invalid(format!(
                "uplink '{}': request_timeout_ms must be between 1 and 60000",
                self.name
            )));
        }

        // The input/get resume query always uses the bearer token
        if self.api_key.is_empty() {
            return Err(invalid(format!("uplink '{}': api_key cannot be empty", self.name)));
        }

        if self.transport == TransportMode::Secure {
            if self.username.is_empty() {
                return Err(invalid(format!(
                    "uplink '{}': username is required for secure transport",
                    self.name
                )));
            }
            self.crypto_key_bytes()?;
        }

        let mut seen = HashSet::new();
        for output in &self.outputs {
            if output.index == 0 {
                return Err(invalid(format!("uplink '{}': output index starts at 1", self.name)));
            }
            if !seen.insert(output.index) {
                return Err(invalid(format!(
                    "uplink '{}': duplicate output index {}",
                    self.name, output.index
                )));
            }
            if let Some(&bad) = output.channels.iter().find(|&&c| c >= MAX_INPUTS) {
                return Err(invalid(format!(
                    "uplink '{}': output {} references channel {} (must be 0-{})",
                    self.name,
                    output.index,
                    bad,
                    MAX_INPUTS - 1
                )));
            }
        }

        Ok(())
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use emon_uplink::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse and validate configuration text
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.datalog.path.is_empty() {
            return Err(invalid("datalog path cannot be empty"));
        }

        if self.datalog.refresh_interval_s == 0 || self.datalog.refresh_interval_s > 3600 {
            return Err(invalid("datalog refresh_interval_s must be between 1 and 3600"));
        }

        let mut seen = HashSet::new();
        for channel in &self.channels {
            if channel.index >= MAX_INPUTS {
                return Err(invalid(format!(
                    "channel index {} is out of bounds (must be 0-{})",
                    channel.index,
                    MAX_INPUTS - 1
                )));
            }
            if !seen.insert(channel.index) {
                return Err(invalid(format!("duplicate channel index {}", channel.index)));
            }
        }

        if self.uplinks.is_empty() {
            return Err(invalid("at least one [[uplink]] section is required"));
        }

        let mut names = HashSet::new();
        for uplink in &self.uplinks {
            if !names.insert(uplink.name.as_str()) {
                return Err(invalid(format!("duplicate uplink name '{}'", uplink.name)));
            }
            uplink.validate()?;
        }

        Ok(())
    }

    /// Channel kinds index-aligned with the device, `None` where unconfigured
    pub fn channel_layout(&self) -> Vec<Option<ChannelKind>> {
        let width = self.channels.iter().map(|c| c.index + 1).max().unwrap_or(0);
        let mut layout = vec![None; width];
        for channel in &self.channels {
            layout[channel.index] = Some(channel.kind);
        }
        layout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"
[datalog]
path = "/var/lib/iota/log.jsonl"

[[channels]]
index = 0
kind = "voltage"

[[channels]]
index = 2
kind = "power"

[[uplink]]
url = "https://emoncms.org"
node = "5"
api_key = "0123456789abcdef"
"#;

    fn create_valid_config() -> Config {
        Config::from_toml(VALID).unwrap()
    }

    #[test]
    fn test_defaults_applied() {
        let config = create_valid_config();

        assert_eq!(config.logging.level, "info");
        assert!(config.logging.dir.is_none());
        assert_eq!(config.datalog.refresh_interval_s, 5);

        let uplink = &config.uplinks[0];
        assert_eq!(uplink.name, "emoncms");
        assert_eq!(uplink.interval_s, 10);
        assert_eq!(uplink.bulk_send, 1);
        assert_eq!(uplink.transport, TransportMode::Plain);
        assert_eq!(uplink.request_timeout_ms, 1000);
        assert!(uplink.outputs.is_empty());
    }

    #[test]
    fn test_channel_layout_is_index_aligned() {
        let config = create_valid_config();
        assert_eq!(
            config.channel_layout(),
            vec![Some(ChannelKind::Voltage), None, Some(ChannelKind::Power)]
        );
    }

    #[test]
    fn test_load_config_from_file() {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(VALID.as_bytes()).unwrap();
        temp_file.flush().unwrap();

        let result = Config::load(temp_file.path());
        assert!(result.is_ok());
    }

    #[test]
    fn test_load_missing_file() {
        assert!(matches!(
            Config::load("/nonexistent/emon-uplink.toml"),
            Err(UplinkError::Io(_))
        ));
    }

    #[test]
    fn test_no_uplinks() {
        let mut config = create_valid_config();
        config.uplinks.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_datalog_path() {
        let mut config = create_valid_config();
        config.datalog.path = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_refresh_interval_zero() {
        let mut config = create_valid_config();
        config.datalog.refresh_interval_s = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_channel_index_out_of_bounds() {
        let mut config = create_valid_config();
        config.channels.push(ChannelConfig {
            index: MAX_INPUTS,
            kind: ChannelKind::Power,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_channel_index() {
        let mut config = create_valid_config();
        config.channels.push(ChannelConfig {
            index: 0,
            kind: ChannelKind::Power,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_url_scheme() {
        let mut config = create_valid_config();
        config.uplinks[0].url = "emoncms.org".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_node() {
        let mut config = create_valid_config();
        config.uplinks[0].node = " ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_interval_bounds() {
        for (interval, ok) in [(4, false), (5, true), (300, true), (3600, true), (3601, false)] {
            let mut config = create_valid_config();
            config.uplinks[0].interval_s = interval;
            assert_eq!(config.validate().is_ok(), ok, "interval_s = {}", interval);
        }
    }

    #[test]
    fn test_bulk_send_bounds() {
        for (bulk, ok) in [(0, false), (1, true), (10, true), (11, false)] {
            let mut config = create_valid_config();
            config.uplinks[0].bulk_send = bulk;
            assert_eq!(config.validate().is_ok(), ok, "bulk_send = {}", bulk);
        }
    }

    #[test]
    fn test_missing_api_key() {
        let mut config = create_valid_config();
        config.uplinks[0].api_key = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_secure_requires_username_and_key() {
        let mut config = create_valid_config();
        config.uplinks[0].transport = TransportMode::Secure;
        assert!(config.validate().is_err());

        config.uplinks[0].username = "meter".to_string();
        config.uplinks[0].crypto_key = "00112233".to_string();
        assert!(config.validate().is_err());

        config.uplinks[0].crypto_key = "000102030405060708090a0b0c0d0e0f".to_string();
        assert!(config.validate().is_ok());
        assert_eq!(
            config.uplinks[0].crypto_key_bytes().unwrap(),
            [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15]
        );
    }

    #[test]
    fn test_crypto_key_not_hex() {
        let mut config = create_valid_config();
        config.uplinks[0].crypto_key = "zz0102030405060708090a0b0c0d0e0f".to_string();
        assert!(config.uplinks[0].crypto_key_bytes().is_err());
    }

    #[test]
    fn test_output_indices() {
        let mut config = create_valid_config();
        config.uplinks[0].outputs = vec![
            OutputConfig { index: 1, channels: vec![0] },
            OutputConfig { index: 3, channels: vec![1, 2] },
        ];
        assert!(config.validate().is_ok());

        config.uplinks[0].outputs.push(OutputConfig { index: 3, channels: vec![] });
        assert!(config.validate().is_err());

        config.uplinks[0].outputs = vec![OutputConfig { index: 0, channels: vec![0] }];
        assert!(config.validate().is_err());

        config.uplinks[0].outputs = vec![OutputConfig { index: 1, channels: vec![MAX_INPUTS] }];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_uplink_names() {
        let mut config = create_valid_config();
        let second = config.uplinks[0].clone();
        config.uplinks.push(second);
        assert!(config.validate().is_err());

        config.uplinks[1].name = "backup".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_full_file() {
        let config = Config::from_toml(
            r#"
[logging]
level = "debug"
dir = "/var/log/emon"

[datalog]
path = "log.jsonl"
refresh_interval_s = 2

[[uplink]]
name = "secure"
url = "http://emoncms.local"
node = "iota"
api_key = "k"
interval_s = 60
bulk_send = 6
transport = "secure"
username = "meter"
crypto_key = "2b7e151628aed2a6abf7158809cf4f3c"

[[uplink.outputs]]
index = 2
channels = [0, 1]
"#,
        )
        .unwrap();

        assert_eq!(config.logging.dir.as_deref(), Some("/var/log/emon"));
        let uplink = &config.uplinks[0];
        assert_eq!(uplink.transport, TransportMode::Secure);
        assert_eq!(uplink.bulk_send, 6);
        assert_eq!(uplink.outputs[0].channels, vec![0, 1]);
        assert!(config.channel_layout().is_empty());
    }

    #[test]
    fn test_unknown_transport_rejected() {
        let text = VALID.replace("api_key = \"0123456789abcdef\"", "api_key = \"k\"\ntransport = \"udp\"");
        assert!(Config::from_toml(&text).is_err());
    }

    #[test]
    fn test_default_functions() {
        assert_eq!(default_log_level(), "info");
        assert_eq!(default_log_file_prefix(), "emon-uplink.log");
        assert_eq!(default_refresh_interval_s(), 5);
        assert_eq!(default_uplink_name(), "emoncms");
        assert_eq!(default_interval_s(), 10);
        assert_eq!(default_bulk_send(), 1);
        assert_eq!(default_request_timeout_ms(), 1000);
    }
}
