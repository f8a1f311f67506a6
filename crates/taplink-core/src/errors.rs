//! Error types for the taplink messaging layer
//!
//! Errors fall into four families. Validation and state errors are returned
//! immediately and never retried. Disconnects and transport failures surface to
//! the caller through the returned future. Protocol errors describe malformed
//! control traffic; they are logged by the session and never returned from the
//! public API, so the link stays up.

// ----------------------------------------------------------------------------
// Specific Error Types
// ----------------------------------------------------------------------------

/// Input rejected before any transport operation took place
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Separator must be exactly one character, got {len}")]
    Separator { len: usize },
    #[error("Message is empty")]
    EmptyMessage,
    #[error("Chunk length must be greater than zero")]
    ChunkLength,
}

/// Failures reported by the underlying transport
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Device request failed: {reason}")]
    DeviceRequest { reason: String },
    #[error("Connection failed: {reason}")]
    Connect { reason: String },
    #[error("Service {service} not found")]
    ServiceNotFound { service: String },
    #[error("Characteristic {characteristic} not found")]
    CharacteristicNotFound { characteristic: String },
    #[error("Failed to subscribe to notifications: {reason}")]
    Subscribe { reason: String },
    #[error("Write failed: {reason}")]
    Write { reason: String },
    #[error("Transport is not available: {reason}")]
    Unavailable { reason: String },
    #[error("Transport timeout after {duration_ms}ms")]
    Timeout { duration_ms: u64 },
}

/// Malformed or unexpected control traffic
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("Control frame too short (expected at least {expected}, got {actual})")]
    ShortFrame { expected: usize, actual: usize },
    #[error("Unexpected frame marker {marker}")]
    UnexpectedMarker { marker: u8 },
    #[error("Unknown command {command}")]
    UnknownCommand { command: u8 },
}

// ----------------------------------------------------------------------------
// Main Error Type
// ----------------------------------------------------------------------------

/// Unified error type for the messaging layer
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaplinkError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Device is disconnected")]
    Disconnected,

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Invalid session state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl TaplinkError {
    /// Shorthand for an invalid state error
    pub fn invalid_state(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::InvalidState {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Whether the caller may reasonably retry the failed operation
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Disconnected)
    }
}

pub type Result<T> = core::result::Result<T, TaplinkError>;
