//! Error types for BLE transport

use taplink_core::{TaplinkError, TransportError};
use thiserror::Error;

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// Errors specific to the BLE transport
#[derive(Error, Debug)]
pub enum BleTransportError {
    #[error("BLE adapter not available")]
    AdapterNotAvailable,

    #[error("No BLE adapter at index {index} ({available} available)")]
    AdapterIndex { index: usize, available: usize },

    #[error("No matching device found within {timeout_ms}ms")]
    NoDeviceFound { timeout_ms: u64 },

    #[error("Scan failed: {0}")]
    ScanFailed(String),

    #[error("Failed to connect to device: {0}")]
    ConnectionFailed(String),

    #[error("Connection timeout after {timeout_ms}ms")]
    ConnectionTimeout { timeout_ms: u64 },

    #[error("Service not found: {service}")]
    ServiceNotFound { service: String },

    #[error("Characteristic not found: {characteristic}")]
    CharacteristicNotFound { characteristic: String },

    #[error("Failed to subscribe to notifications: {0}")]
    SubscriptionFailed(String),

    #[error("Failed to write to characteristic: {0}")]
    WriteFailed(String),

    #[error("Failed to get BLE events: {0}")]
    EventStreamFailed(String),

    #[error("Failed to get notifications stream: {0}")]
    NotificationStreamFailed(String),

    #[error("BLE error: {0}")]
    Btleplug(#[from] btleplug::Error),
}

impl From<BleTransportError> for TransportError {
    fn from(err: BleTransportError) -> Self {
        let reason = err.to_string();
        match err {
            BleTransportError::AdapterNotAvailable | BleTransportError::AdapterIndex { .. } => {
                TransportError::Unavailable { reason }
            }
            BleTransportError::NoDeviceFound { .. } | BleTransportError::ScanFailed(_) => {
                TransportError::DeviceRequest { reason }
            }
            BleTransportError::ConnectionFailed(_) => TransportError::Connect { reason },
            BleTransportError::ConnectionTimeout { timeout_ms } => {
                TransportError::Timeout { duration_ms: timeout_ms }
            }
            BleTransportError::ServiceNotFound { service } => {
                TransportError::ServiceNotFound { service }
            }
            BleTransportError::CharacteristicNotFound { characteristic } => {
                TransportError::CharacteristicNotFound { characteristic }
            }
            BleTransportError::SubscriptionFailed(_)
            | BleTransportError::NotificationStreamFailed(_) => {
                TransportError::Subscribe { reason }
            }
            BleTransportError::WriteFailed(_) => TransportError::Write { reason },
            BleTransportError::EventStreamFailed(_) | BleTransportError::Btleplug(_) => {
                TransportError::Unavailable { reason }
            }
        }
    }
}

impl From<BleTransportError> for TaplinkError {
    fn from(err: BleTransportError) -> Self {
        TaplinkError::Transport(err.into())
    }
}
