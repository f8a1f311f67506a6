//! taplink CLI configuration
//!
//! Configuration is layered: defaults, then an optional TOML file, then
//! command-line flags. A file looks like:
//!
//! ```toml
//! [terminal]
//! service_uuid = "0000ffe0-0000-1000-8000-00805f9b34fb"
//! receive_separator = "\n"
//! max_chunk_len = 20
//!
//! [terminal.tap]
//! price_cents = 450
//! accepted_rfids = [1234]
//!
//! [ble]
//! write_with_response = false
//! scan_timeout = { secs = 10, nanos = 0 }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use taplink_ble::BleTransportConfig;
use taplink_core::{parse_separator, short_uuid, TerminalConfig};
use uuid::Uuid;

use crate::cli::Cli;
use crate::error::{CliError, Result};

// ----------------------------------------------------------------------------
// CLI Application Configuration
// ----------------------------------------------------------------------------

/// Complete configuration for the CLI application
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Terminal session configuration
    pub terminal: TerminalConfig,
    /// BLE transport configuration
    pub ble: BleTransportConfig,
}

impl AppConfig {
    /// Parse a TOML document
    pub fn from_toml(source: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let source = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            CliError::Config(format!("Failed to read {}: {}", path.as_ref().display(), e))
        })?;
        Self::from_toml(&source)
    }

    /// Apply command-line overrides on top of the loaded values
    pub fn apply_overrides(&mut self, cli: &Cli) -> Result<()> {
        if let Some(service) = &cli.service {
            self.terminal.service_uuid = parse_uuid(service)?;
        }
        if let Some(characteristic) = &cli.characteristic {
            self.terminal.characteristic_uuid = parse_uuid(characteristic)?;
        }
        if let Some(separator) = &cli.receive_separator {
            self.terminal.receive_separator = parse_separator(separator)?;
        }
        if let Some(separator) = &cli.send_separator {
            self.terminal.send_separator = parse_separator(separator)?;
        }
        if let Some(prefix) = &cli.name_prefix {
            self.terminal.device_name_prefix = Some(prefix.clone());
        }
        self.validate()
    }

    /// Render as TOML
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        self.terminal
            .validate()
            .map_err(|e| CliError::Config(e.to_string()))?;
        if self.ble.scan_timeout.is_zero() {
            return Err(CliError::Config("BLE scan timeout must be positive".into()));
        }
        Ok(())
    }
}

/// Parse a full UUID or a 16-bit short form such as `ffe0` or `0xFFE0`
pub fn parse_uuid(value: &str) -> Result<Uuid> {
    let trimmed = value.trim();
    let short = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    if short.len() <= 4 {
        return u16::from_str_radix(short, 16)
            .map(short_uuid)
            .map_err(|e| CliError::Config(format!("Invalid short UUID '{}': {}", value, e)));
    }

    Ok(Uuid::parse_str(trimmed)?)
}
