//! Error handling for the taplink CLI

use thiserror::Error;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    #[error("Terminal error: {0}")]
    Terminal(#[from] taplink_core::TaplinkError),

    #[error("BLE transport error: {0}")]
    Ble(#[from] taplink_ble::BleTransportError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParsing(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),

    #[error("Invalid UUID: {0}")]
    Uuid(#[from] uuid::Error),
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;
