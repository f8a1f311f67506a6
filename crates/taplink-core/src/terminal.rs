//! Terminal facade: the public entry point for hosts

use std::sync::Arc;

use uuid::Uuid;

use crate::config::{parse_separator, TerminalConfig};
use crate::device::{Command, DeviceState};
use crate::errors::Result;
use crate::events::TerminalEvents;
use crate::policy::TapPolicy;
use crate::session::{ConnectionSession, SessionState, SessionStats};
use crate::transport::Transport;

/// Whole-message terminal over a chunked notify/write characteristic
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use taplink_core::{ChannelEvents, SimDevice, SimulatedTransport, TerminalConfig, TerminalFacade};
///
/// # async fn example() -> taplink_core::Result<()> {
/// let (events, _inbound) = ChannelEvents::new();
/// let transport = SimulatedTransport::new(SimDevice::new("AA:BB", "Tap-01"));
/// let terminal = TerminalFacade::new(transport, TerminalConfig::default(), Arc::new(events));
///
/// terminal.set_receive_separator("\n").await?;
/// terminal.connect().await?;
/// terminal.send("status").await?;
/// # Ok(())
/// # }
/// ```
pub struct TerminalFacade<T: Transport> {
    session: ConnectionSession<T>,
}

impl<T: Transport> TerminalFacade<T> {
    pub fn new(transport: T, config: TerminalConfig, events: Arc<dyn TerminalEvents>) -> Self {
        Self {
            session: ConnectionSession::new(transport, config, events),
        }
    }

    pub fn with_policy(
        transport: T,
        config: TerminalConfig,
        events: Arc<dyn TerminalEvents>,
        policy: Arc<dyn TapPolicy>,
    ) -> Self {
        Self {
            session: ConnectionSession::with_policy(transport, config, events, policy),
        }
    }

    /// The session behind the facade
    pub fn session(&self) -> &ConnectionSession<T> {
        &self.session
    }

    pub async fn set_service_id(&self, service: Uuid) {
        self.session.configure(|c| c.service_uuid = service).await;
    }

    pub async fn set_characteristic_id(&self, characteristic: Uuid) {
        self.session
            .configure(|c| c.characteristic_uuid = characteristic)
            .await;
    }

    /// Set the character that ends inbound messages
    pub async fn set_receive_separator(&self, separator: &str) -> Result<()> {
        let separator = parse_separator(separator)?;
        self.session
            .configure(|c| c.receive_separator = separator)
            .await;
        Ok(())
    }

    /// Set the character appended to outbound messages
    pub async fn set_send_separator(&self, separator: &str) -> Result<()> {
        let separator = parse_separator(separator)?;
        self.session.configure(|c| c.send_separator = separator).await;
        Ok(())
    }

    pub async fn connect(&self) -> Result<()> {
        self.session.connect().await
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.session.disconnect().await
    }

    /// Send a text message; the send separator is appended
    pub async fn send(&self, message: &str) -> Result<()> {
        self.session.send(message).await
    }

    /// Name of the connected device, or an empty string
    pub async fn device_name(&self) -> String {
        self.session.device_name().await
    }

    /// Tell the tap to start pouring for the scanned tag
    pub async fn start_pour(&self) -> Result<()> {
        self.session.send_control(Command::RfidScanned, 1).await
    }

    /// Close the tap valve
    pub async fn close_tap(&self) -> Result<()> {
        self.session.send_control(Command::CloseTap, 1).await
    }

    pub async fn state(&self) -> SessionState {
        self.session.state().await
    }

    pub async fn device_state(&self) -> DeviceState {
        self.session.device_state().await
    }

    pub async fn stats(&self) -> SessionStats {
        self.session.stats().await
    }
}
