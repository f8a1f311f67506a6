//! Bluetooth Low Energy transport for the taplink terminal
//!
//! This crate implements the `Transport` trait from `taplink-core` on top of
//! btleplug, so a [`TerminalFacade`](taplink_core::TerminalFacade) can talk to
//! a real serial-over-BLE device.
//!
//! ## Architecture
//!
//! - [`config`] - Transport configuration and settings
//! - [`error`] - Error types specific to BLE transport
//! - [`peripheral`] - Device, connection and characteristic handles
//! - [`discovery`] - Adapter setup and the device chooser
//! - [`connection`] - Notification forwarding and disconnect watching
//! - [`transport`] - Main transport implementation
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use taplink_ble::{BleTransport, BleTransportConfig};
//! use taplink_core::{NullEvents, TerminalConfig, TerminalFacade};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = BleTransport::new(BleTransportConfig::new()).await?;
//! let terminal = TerminalFacade::new(transport, TerminalConfig::default(), Arc::new(NullEvents));
//!
//! terminal.connect().await?;
//! terminal.send("hello").await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod discovery;
pub mod error;
pub mod peripheral;
pub mod transport;

// Public API exports
pub use config::BleTransportConfig;
pub use error::BleTransportError;
pub use peripheral::{BleCharacteristic, BleConnection, BleDevice, BleService};
pub use transport::BleTransport;

// Re-export Transport trait for convenience
pub use taplink_core::transport::Transport;
