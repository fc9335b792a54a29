//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::can::protocol::CAN_STANDARD_ID_MAX;
use crate::error::{BridgeError, Result};
use crate::slcan::codec::SLCAN_BITRATES;

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub can: CanConfig,
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub ble: BleConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// CAN bus addressing
#[derive(Debug, Deserialize, Clone)]
pub struct CanConfig {
    #[serde(default = "default_ecu_id")]
    pub ecu_id: u8,

    #[serde(default = "default_request_base")]
    pub request_base: u32,

    #[serde(default = "default_response_base")]
    pub response_base: u32,

    #[serde(default = "default_button_box_address")]
    pub button_box_address: u32,

    #[serde(default = "default_button_category")]
    pub button_category: u8,

    #[serde(default = "default_bitrate")]
    pub bitrate: u32,
}

/// SLCAN adapter serial port
#[derive(Debug, Deserialize, Clone)]
pub struct SerialConfig {
    #[serde(default = "default_serial_port")]
    pub port: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
}

/// BLE peripheral
#[derive(Debug, Deserialize, Clone)]
pub struct BleConfig {
    #[serde(default = "default_device_name")]
    pub device_name: String,

    #[serde(default = "default_advertising_restart_delay_ms")]
    pub advertising_restart_delay_ms: u64,
}

/// Control loop
#[derive(Debug, Deserialize, Clone)]
pub struct BridgeConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_event_queue_capacity")]
    pub event_queue_capacity: usize,
}

/// Logging output
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for daily rotated log files; console only when unset
    #[serde(default)]
    pub log_dir: Option<String>,
}

// Default value functions
fn default_ecu_id() -> u8 { 1 }
fn default_request_base() -> u32 { 0x700 }
fn default_response_base() -> u32 { 0x720 }
fn default_button_box_address() -> u32 { 0x711 }
fn default_button_category() -> u8 { 27 }
fn default_bitrate() -> u32 { 500_000 }

fn default_serial_port() -> String { "/dev/ttyACM0".to_string() }
fn default_baud_rate() -> u32 { 115_200 }

fn default_device_name() -> String { "ESP32 Dashboard".to_string() }
fn default_advertising_restart_delay_ms() -> u64 { 500 }

fn default_poll_interval_ms() -> u64 { 1 }
fn default_event_queue_capacity() -> usize { 32 }

fn default_log_level() -> String { "info".to_string() }

impl Default for CanConfig {
    fn default() -> Self {
        Self {
            ecu_id: default_ecu_id(),
            request_base: default_request_base(),
            response_base: default_response_base(),
            button_box_address: default_button_box_address(),
            button_category: default_button_category(),
            bitrate: default_bitrate(),
        }
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: default_serial_port(),
            baud_rate: default_baud_rate(),
        }
    }
}

impl Default for BleConfig {
    fn default() -> Self {
        Self {
            device_name: default_device_name(),
            advertising_restart_delay_ms: default_advertising_restart_delay_ms(),
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            event_queue_capacity: default_event_queue_capacity(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            log_dir: None,
        }
    }
}

impl CanConfig {
    /// Variable request identifier (request base + ECU id)
    pub fn request_id(&self) -> u32 {
        self.request_base.saturating_add(self.ecu_id as u32)
    }

    /// Variable response identifier (response base + ECU id)
    pub fn response_id(&self) -> u32 {
        self.response_base.saturating_add(self.ecu_id as u32)
    }
}

fn invalid(msg: impl std::fmt::Display) -> BridgeError {
    BridgeError::Config(toml::de::Error::custom(msg))
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// * `Result<Config>` - Loaded and validated configuration
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
    /// use buttonbox_bridge::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        // CAN addressing: everything must fit in 11-bit identifiers
        let can = &self.can;
        if can.button_box_address > CAN_STANDARD_ID_MAX {
            return Err(invalid("button_box_address must be at most 0x7FF"));
        }

        if can.request_id() > CAN_STANDARD_ID_MAX {
            return Err(invalid("request_base + ecu_id must be at most 0x7FF"));
        }

        if can.response_id() > CAN_STANDARD_ID_MAX {
            return Err(invalid("response_base + ecu_id must be at most 0x7FF"));
        }

        if can.request_id() == can.response_id() {
            return Err(invalid("request and response identifiers must differ"));
        }

        if can.button_box_address == can.request_id() || can.button_box_address == can.response_id() {
            return Err(invalid("button_box_address collides with the variable protocol identifiers"));
        }

        if !SLCAN_BITRATES.iter().any(|(rate, _)| *rate == can.bitrate) {
            return Err(invalid(
                "bitrate must be one of: 10000, 20000, 50000, 100000, 125000, 250000, 500000, 800000, 1000000",
            ));
        }

        // Serial port
        if self.serial.port.is_empty() {
            return Err(invalid("serial port cannot be empty"));
        }

        if ![9600, 19200, 38400, 57600, 115200, 230400, 460800, 921600, 1_000_000, 2_000_000, 3_000_000]
            .contains(&self.serial.baud_rate)
        {
            return Err(invalid(
                "baud_rate must be one of: 9600, 19200, 38400, 57600, 115200, 230400, 460800, 921600, 1000000, 2000000, 3000000",
            ));
        }

        // BLE: a legacy advertising packet leaves 29 bytes for the local name
        if self.ble.device_name.is_empty() || self.ble.device_name.len() > 29 {
            return Err(invalid("device_name must be between 1 and 29 bytes"));
        }

        if self.ble.advertising_restart_delay_ms > 10000 {
            return Err(invalid("advertising_restart_delay_ms must be at most 10000"));
        }

        // Control loop
        if self.bridge.poll_interval_ms == 0 || self.bridge.poll_interval_ms > 1000 {
            return Err(invalid("poll_interval_ms must be between 1 and 1000"));
        }

        if self.bridge.event_queue_capacity == 0 || self.bridge.event_queue_capacity > 1024 {
            return Err(invalid("event_queue_capacity must be between 1 and 1024"));
        }

        // Logging
        if !["trace", "debug", "info", "warn", "error"].contains(&self.logging.level.as_str()) {
            return Err(invalid("log level must be one of: trace, debug, info, warn, error"));
        }

        if matches!(&self.logging.log_dir, Some(dir) if dir.is_empty()) {
            return Err(invalid("log_dir cannot be empty when set"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shipped_config_matches_defaults() {
        let shipped = Config::from_toml(include_str!("../config/default.toml")).unwrap();
        assert_eq!(shipped.can.request_id(), Config::default().can.request_id());
        assert_eq!(shipped.ble.device_name, "ESP32 Dashboard");
        assert_eq!(shipped.logging.log_dir, None);
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.can.request_id(), 0x701);
        assert_eq!(config.can.response_id(), 0x721);
    }

    #[test]
    fn test_load_config_from_file() {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let toml_content = r#"
[can]
ecu_id = 2
bitrate = 250000

[serial]
port = "/dev/ttyUSB0"

[ble]
device_name = "Dash"

[bridge]

[logging]
level = "debug"
log_dir = "./logs"
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();
        temp_file.flush().unwrap();

        let config = Config::load(temp_file.path()).unwrap();
        assert_eq!(config.can.request_id(), 0x702);
        assert_eq!(config.can.response_id(), 0x722);
        assert_eq!(config.can.bitrate, 250_000);
        assert_eq!(config.serial.port, "/dev/ttyUSB0");
        assert_eq!(config.ble.device_name, "Dash");
        assert_eq!(config.logging.log_dir.as_deref(), Some("./logs"));
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.can.ecu_id, 1);
        assert_eq!(config.serial.baud_rate, 115_200);
        assert_eq!(config.ble.advertising_restart_delay_ms, 500);
    }

    #[test]
    fn test_hex_addresses() {
        let config = Config::from_toml("[can]\nbutton_box_address = 0x650\n").unwrap();
        assert_eq!(config.can.button_box_address, 0x650);
    }

    #[test]
    fn test_missing_file() {
        let result = Config::load("/nonexistent/buttonbox.toml");
        assert!(matches!(result, Err(BridgeError::Io(_))));
    }

    #[test]
    fn test_malformed_toml() {
        let result = Config::from_toml("[can\necu_id = 1");
        assert!(matches!(result, Err(BridgeError::Config(_))));
    }

    #[test]
    fn test_button_box_address_too_high() {
        let mut config = Config::default();
        config.can.button_box_address = 0x800;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_request_id_too_high() {
        let mut config = Config::default();
        config.can.request_base = 0x7FF;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_response_id_too_high() {
        let mut config = Config::default();
        config.can.response_base = 0x7FF;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_request_equals_response() {
        let mut config = Config::default();
        config.can.response_base = config.can.request_base;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_button_box_collides_with_request() {
        let mut config = Config::default();
        config.can.button_box_address = 0x701;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_bitrate() {
        let mut config = Config::default();
        config.can.bitrate = 83_333;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_valid_bitrates() {
        for &(rate, _) in SLCAN_BITRATES.iter() {
            let mut config = Config::default();
            config.can.bitrate = rate;
            assert!(config.validate().is_ok(), "Bitrate {} should be valid", rate);
        }
    }

    #[test]
    fn test_empty_serial_port() {
        let mut config = Config::default();
        config.serial.port = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_baud_rate() {
        let mut config = Config::default();
        config.serial.baud_rate = 420_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_device_name_bounds() {
        let mut config = Config::default();
        config.ble.device_name = String::new();
        assert!(config.validate().is_err());

        config.ble.device_name = "x".repeat(30);
        assert!(config.validate().is_err());

        config.ble.device_name = "x".repeat(29);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_advertising_restart_delay_too_high() {
        let mut config = Config::default();
        config.ble.advertising_restart_delay_ms = 10001;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_advertising_restart_delay_zero_allowed() {
        let mut config = Config::default();
        config.ble.advertising_restart_delay_ms = 0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_poll_interval_bounds() {
        let mut config = Config::default();
        config.bridge.poll_interval_ms = 0;
        assert!(config.validate().is_err());

        config.bridge.poll_interval_ms = 1001;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_event_queue_capacity_bounds() {
        let mut config = Config::default();
        config.bridge.event_queue_capacity = 0;
        assert!(config.validate().is_err());

        config.bridge.event_queue_capacity = 1025;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = Config::default();
        config.logging.level = "verbose".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_log_dir() {
        let mut config = Config::default();
        config.logging.log_dir = Some(String::new());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_functions() {
        assert_eq!(default_ecu_id(), 1);
        assert_eq!(default_request_base(), 0x700);
        assert_eq!(default_response_base(), 0x720);
        assert_eq!(default_button_box_address(), 0x711);
        assert_eq!(default_button_category(), 27);
        assert_eq!(default_bitrate(), 500_000);
        assert_eq!(default_serial_port(), "/dev/ttyACM0");
        assert_eq!(default_baud_rate(), 115_200);
        assert_eq!(default_device_name(), "ESP32 Dashboard");
        assert_eq!(default_advertising_restart_delay_ms(), 500);
        assert_eq!(default_poll_interval_ms(), 1);
        assert_eq!(default_event_queue_capacity(), 32);
        assert_eq!(default_log_level(), "info");
    }
}
