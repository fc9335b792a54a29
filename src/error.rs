//! # Error Types
//!
//! Custom error types for Buttonbox Bridge using `thiserror`.

use thiserror::Error;

/// Main error type for Buttonbox Bridge
#[derive(Debug, Error)]
pub enum BridgeError {
    /// CAN frame codec errors
    #[error("CAN codec error: {0}")]
    Codec(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serial (SLCAN adapter) errors
    #[error("Serial error: {0}")]
    Serial(String),

    /// None of the candidate serial devices could be opened
    #[error("No SLCAN adapter found (tried: {0})")]
    SerialPortNotFound(String),

    /// BLE peripheral errors
    #[error("BLE error: {0}")]
    Ble(String),
}

#[cfg(feature = "bluez")]
impl From<bluer::Error> for BridgeError {
    fn from(e: bluer::Error) -> Self {
        BridgeError::Ble(e.to_string())
    }
}

/// Result type alias for Buttonbox Bridge
pub type Result<T> = std::result::Result<T, BridgeError>;
