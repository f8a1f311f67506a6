//! Terminal and tap configuration

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{Result, ValidationError};

// ----------------------------------------------------------------------------
// Constants
// ----------------------------------------------------------------------------

/// Bluetooth base UUID that 16-bit assigned numbers expand onto
const BLUETOOTH_BASE_UUID: u128 = 0x0000_0000_0000_1000_8000_0080_5F9B_34FB;

/// Default serial service (HM-10 style modules)
pub const DEFAULT_SERVICE_UUID: Uuid = short_uuid(0xFFE0);

/// Default read/write/notify characteristic of the serial service
pub const DEFAULT_CHARACTERISTIC_UUID: Uuid = short_uuid(0xFFE1);

/// Default payload limit of a single characteristic write
pub const DEFAULT_MAX_CHUNK_LEN: usize = 20;

/// Expand a 16-bit Bluetooth assigned number into a full UUID
pub const fn short_uuid(short: u16) -> Uuid {
    Uuid::from_u128(BLUETOOTH_BASE_UUID | ((short as u128) << 96))
}

/// Validate that a separator string holds exactly one character
pub fn parse_separator(separator: &str) -> Result<char> {
    let mut chars = separator.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(c),
        _ => Err(ValidationError::Separator {
            len: separator.chars().count(),
        }
        .into()),
    }
}

// ----------------------------------------------------------------------------
// Tap Configuration
// ----------------------------------------------------------------------------

/// Values the host answers device queries with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TapConfig {
    /// Pour volume answered to command 42 (ml)
    pub volume_ml: u32,
    /// Price answered to command 43 (cents)
    pub price_cents: u32,
    /// User balance answered to command 44 (cents)
    pub balance_cents: u32,
    /// Tap side answered to command 41
    pub tap_side: u32,
    /// Device ids allowed to pour; empty accepts every device
    pub accepted_devices: Vec<u32>,
    /// RFID tags allowed to pour; empty accepts every tag
    pub accepted_rfids: Vec<u32>,
}

impl Default for TapConfig {
    fn default() -> Self {
        Self {
            volume_ml: 500,
            price_cents: 450,
            balance_cents: 2000,
            tap_side: 1,
            accepted_devices: Vec::new(),
            accepted_rfids: Vec::new(),
        }
    }
}

// ----------------------------------------------------------------------------
// Terminal Configuration
// ----------------------------------------------------------------------------

/// Configuration for a terminal session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminalConfig {
    /// GATT service carrying the serial characteristic
    pub service_uuid: Uuid,
    /// Characteristic used for both writes and notifications
    pub characteristic_uuid: Uuid,
    /// Character delimiting inbound text messages
    pub receive_separator: char,
    /// Character appended to outbound text messages
    pub send_separator: char,
    /// Maximum bytes per characteristic write
    pub max_chunk_len: usize,
    /// Only offer devices whose advertised name starts with this prefix
    pub device_name_prefix: Option<String>,
    /// Tap query answers and acceptance lists
    pub tap: TapConfig,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            service_uuid: DEFAULT_SERVICE_UUID,
            characteristic_uuid: DEFAULT_CHARACTERISTIC_UUID,
            receive_separator: '\n',
            send_separator: '\n',
            max_chunk_len: DEFAULT_MAX_CHUNK_LEN,
            device_name_prefix: None,
            tap: TapConfig::default(),
        }
    }
}

impl TerminalConfig {
    /// Create a new configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set service UUID
    pub fn with_service_uuid(mut self, uuid: Uuid) -> Self {
        self.service_uuid = uuid;
        self
    }

    /// Set characteristic UUID
    pub fn with_characteristic_uuid(mut self, uuid: Uuid) -> Self {
        self.characteristic_uuid = uuid;
        self
    }

    /// Set receive separator
    pub fn with_receive_separator(mut self, separator: char) -> Self {
        self.receive_separator = separator;
        self
    }

    /// Set send separator
    pub fn with_send_separator(mut self, separator: char) -> Self {
        self.send_separator = separator;
        self
    }

    /// Set maximum chunk length
    pub fn with_max_chunk_len(mut self, len: usize) -> Self {
        self.max_chunk_len = len;
        self
    }

    /// Set device name prefix used by the device chooser
    pub fn with_device_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.device_name_prefix = Some(prefix.into());
        self
    }

    /// Set tap configuration
    pub fn with_tap(mut self, tap: TapConfig) -> Self {
        self.tap = tap;
        self
    }

    /// Check values that would otherwise only fail at send time
    pub fn validate(&self) -> Result<()> {
        if self.max_chunk_len == 0 {
            return Err(ValidationError::ChunkLength.into());
        }
        Ok(())
    }
}
