//! Connection session: lifecycle, routing and reconnection
//!
//! A [`ConnectionSession`] owns at most one live link to a device and walks it
//! through `Idle → Discovering → Connecting → SubscribingNotifications →
//! Active`. Once active, a background pump task reads the notification and
//! disconnect channels of the link:
//!
//! - eleven-byte notifications carrying a frame marker are decoded as control
//!   frames and dispatched; any reply is written back on the same
//!   characteristic
//! - everything else is fed to the reassembly buffer and completed messages
//!   are handed to [`TerminalEvents::receive`]
//! - an unsolicited disconnect triggers a single reconnect attempt on the
//!   remembered device, without running the device chooser again
//!
//! All mutable session data lives behind one mutex that is never held across
//! a transport call. Two counters order concurrent operations: `generation`
//! changes whenever a connect starts or an explicit disconnect happens, and
//! `link_epoch` changes whenever a link is installed. Work started under an
//! older value finds out on its next step and stops with
//! [`TaplinkError::Disconnected`].

use std::fmt;
use std::sync::{Arc, Weak};

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::chunking::ChunkSplitter;
use crate::config::TerminalConfig;
use crate::device::{Command, DeviceState};
use crate::dispatcher::CommandDispatcher;
use crate::errors::{ProtocolError, Result, TaplinkError, ValidationError};
use crate::events::{Journal, TerminalEvents};
use crate::frame::{ControlFrame, FrameCodec, MIN_DECODE_LEN};
use crate::policy::{StaticTapPolicy, TapPolicy};
use crate::reassembly::ReassemblyBuffer;
use crate::transport::{DeviceFilter, DeviceHandle, DisconnectEvents, Notifications, Transport};

// ----------------------------------------------------------------------------
// Session State
// ----------------------------------------------------------------------------

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Discovering,
    Connecting,
    SubscribingNotifications,
    Active,
    Reconnecting,
    Disconnected,
}

impl SessionState {
    /// Whether `connect()` may be called in this state
    pub fn can_connect(self) -> bool {
        matches!(self, Self::Idle | Self::Disconnected)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Discovering => "discovering",
            Self::Connecting => "connecting",
            Self::SubscribingNotifications => "subscribing",
            Self::Active => "active",
            Self::Reconnecting => "reconnecting",
            Self::Disconnected => "disconnected",
        };
        f.write_str(name)
    }
}

/// Counters kept for the lifetime of a session object
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub frames_dispatched: u64,
    pub protocol_errors: u64,
    pub messages_delivered: u64,
    pub chunks_written: u64,
    pub reconnect_attempts: u64,
}

// ----------------------------------------------------------------------------
// Internal State
// ----------------------------------------------------------------------------

struct Link<T: Transport> {
    connection: T::Connection,
    characteristic: T::Characteristic,
    epoch: u64,
}

impl<T: Transport> Clone for Link<T> {
    fn clone(&self) -> Self {
        Self {
            connection: self.connection.clone(),
            characteristic: self.characteristic.clone(),
            epoch: self.epoch,
        }
    }
}

/// A link that finished subscribing but is not installed yet
struct Opened<T: Transport> {
    connection: T::Connection,
    characteristic: T::Characteristic,
    notifications: Notifications,
    disconnects: DisconnectEvents,
}

struct Shared<T: Transport> {
    config: TerminalConfig,
    state: SessionState,
    generation: u64,
    link_epoch: u64,
    device: Option<T::Device>,
    link: Option<Link<T>>,
    reassembly: ReassemblyBuffer,
    device_state: DeviceState,
    stats: SessionStats,
    pump: Option<JoinHandle<()>>,
}

impl<T: Transport> Drop for Shared<T> {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}

struct SessionInner<T: Transport> {
    transport: T,
    dispatcher: CommandDispatcher,
    journal: Journal,
    shared: Mutex<Shared<T>>,
}

// ----------------------------------------------------------------------------
// Connection Session
// ----------------------------------------------------------------------------

/// Owns the active transport link and routes traffic over it
pub struct ConnectionSession<T: Transport> {
    inner: Arc<SessionInner<T>>,
}

impl<T: Transport> ConnectionSession<T> {
    /// Create a session whose tap decisions come from `config.tap`
    pub fn new(transport: T, config: TerminalConfig, events: Arc<dyn TerminalEvents>) -> Self {
        let policy = Arc::new(StaticTapPolicy::new(config.tap.clone()));
        Self::with_policy(transport, config, events, policy)
    }

    /// Create a session with a custom tap policy
    pub fn with_policy(
        transport: T,
        config: TerminalConfig,
        events: Arc<dyn TerminalEvents>,
        policy: Arc<dyn TapPolicy>,
    ) -> Self {
        let shared = Shared {
            reassembly: ReassemblyBuffer::new(config.receive_separator),
            config,
            state: SessionState::Idle,
            generation: 0,
            link_epoch: 0,
            device: None,
            link: None,
            device_state: DeviceState::default(),
            stats: SessionStats::default(),
            pump: None,
        };

        Self {
            inner: Arc::new(SessionInner {
                transport,
                dispatcher: CommandDispatcher::new(policy),
                journal: Journal::new(events),
                shared: Mutex::new(shared),
            }),
        }
    }

    /// Underlying transport
    pub fn transport(&self) -> &T {
        &self.inner.transport
    }

    /// Current lifecycle state
    pub async fn state(&self) -> SessionState {
        self.inner.shared.lock().await.state
    }

    /// Snapshot of what the device reported
    pub async fn device_state(&self) -> DeviceState {
        self.inner.shared.lock().await.device_state.clone()
    }

    /// Snapshot of the session counters
    pub async fn stats(&self) -> SessionStats {
        self.inner.shared.lock().await.stats.clone()
    }

    /// Snapshot of the configuration
    pub async fn config(&self) -> TerminalConfig {
        self.inner.shared.lock().await.config.clone()
    }

    /// Modify the configuration
    ///
    /// Service and characteristic changes take effect on the next connect;
    /// separators and chunk length apply immediately.
    pub async fn configure<F>(&self, update: F)
    where
        F: FnOnce(&mut TerminalConfig),
    {
        let mut shared = self.inner.shared.lock().await;
        update(&mut shared.config);
        let separator = shared.config.receive_separator;
        shared.reassembly.set_separator(separator);
    }

    /// Use `device` for the next connect instead of asking the chooser
    pub async fn remember_device(&self, device: T::Device) {
        self.inner.shared.lock().await.device = Some(device);
    }

    /// Name of the connected device, empty unless the session is `Active`
    pub async fn device_name(&self) -> String {
        let shared = self.inner.shared.lock().await;
        if shared.state != SessionState::Active || shared.link.is_none() {
            return String::new();
        }
        shared
            .device
            .as_ref()
            .and_then(|device| device.name())
            .unwrap_or_default()
    }

    /// Connect, resolve the characteristic and start notifications
    ///
    /// Resolves once notifications are active. On failure the session returns
    /// to `Idle`, the chosen device is forgotten and the error is returned.
    pub async fn connect(&self) -> Result<()> {
        self.inner.connect().await
    }

    /// Tear down the link; a no-op (logged) when already disconnected
    pub async fn disconnect(&self) -> Result<()> {
        self.inner.disconnect().await
    }

    /// Send a text message, split into sequential chunk writes
    pub async fn send(&self, message: &str) -> Result<()> {
        self.inner.send(message).await
    }

    /// Write a host-initiated control frame
    pub async fn send_control(&self, command: Command, value: u32) -> Result<()> {
        self.inner
            .write_control(ControlFrame::outbound(command.code(), value))
            .await
    }
}

impl<T: Transport> SessionInner<T> {
    // ------------------------------------------------------------------------
    // State Helpers
    // ------------------------------------------------------------------------

    fn set_state(&self, shared: &mut Shared<T>, state: SessionState) {
        if shared.state != state {
            self.journal
                .debug(&format!("Session state {} -> {}", shared.state, state));
            shared.state = state;
            self.journal.events().state_changed(state);
        }
    }

    /// Move a connect attempt forward unless it was cancelled meanwhile
    async fn advance(&self, generation: u64, state: SessionState) -> Result<()> {
        let mut shared = self.shared.lock().await;
        if shared.generation != generation {
            return Err(TaplinkError::Disconnected);
        }
        self.set_state(&mut shared, state);
        Ok(())
    }

    /// Snapshot the active link for a write
    async fn active_link(&self) -> Result<Link<T>> {
        let shared = self.shared.lock().await;
        match (&shared.link, shared.state) {
            (Some(link), SessionState::Active) => Ok(link.clone()),
            _ => Err(TaplinkError::Disconnected),
        }
    }

    // ------------------------------------------------------------------------
    // Connect
    // ------------------------------------------------------------------------

    async fn connect(self: &Arc<Self>) -> Result<()> {
        let (generation, device, config) = {
            let mut shared = self.shared.lock().await;
            if !shared.state.can_connect() {
                return Err(TaplinkError::invalid_state(
                    "idle or disconnected",
                    shared.state.to_string(),
                ));
            }
            shared.config.validate()?;
            shared.generation += 1;
            shared.reassembly.clear();
            shared.device_state.reset();
            (
                shared.generation,
                shared.device.clone(),
                shared.config.clone(),
            )
        };

        match self.establish(generation, device, &config).await {
            Ok(()) => Ok(()),
            Err(err) => {
                {
                    let mut shared = self.shared.lock().await;
                    if shared.generation == generation {
                        shared.device = None;
                        shared.link = None;
                        self.set_state(&mut shared, SessionState::Idle);
                    }
                }
                self.journal.error(&format!("Connection failed: {}", err));
                Err(err)
            }
        }
    }

    async fn establish(
        self: &Arc<Self>,
        generation: u64,
        device: Option<T::Device>,
        config: &TerminalConfig,
    ) -> Result<()> {
        let device = match device {
            Some(device) => device,
            None => {
                self.advance(generation, SessionState::Discovering).await?;
                self.journal.info("Requesting device...");
                let filter = DeviceFilter {
                    services: vec![config.service_uuid],
                    name_prefix: config.device_name_prefix.clone(),
                };
                let device = self.transport.scan(&filter).await?;
                self.journal.info(&format!(
                    "Device \"{}\" selected",
                    device.name().unwrap_or_else(|| device.id())
                ));

                let mut shared = self.shared.lock().await;
                if shared.generation != generation {
                    return Err(TaplinkError::Disconnected);
                }
                shared.device = Some(device.clone());
                device
            }
        };

        self.advance(generation, SessionState::Connecting).await?;
        let opened = self.open_link(&device, config, Some(generation)).await?;

        let Opened {
            connection,
            characteristic,
            notifications,
            disconnects,
        } = opened;

        let mut shared = self.shared.lock().await;
        if shared.generation != generation {
            drop(shared);
            self.close_quietly(&connection).await;
            return Err(TaplinkError::Disconnected);
        }

        shared.link_epoch += 1;
        let epoch = shared.link_epoch;
        shared.link = Some(Link {
            connection,
            characteristic,
            epoch,
        });
        // A pump still finishing an abandoned reconnect cleans up after itself
        shared.pump = Some(tokio::spawn(pump(
            Arc::downgrade(self),
            epoch,
            notifications,
            disconnects,
        )));
        self.set_state(&mut shared, SessionState::Active);
        drop(shared);

        self.journal.info("Notifications started");
        Ok(())
    }

    /// Connect to `device`, resolve the characteristic and subscribe
    ///
    /// `generation` is checked between steps when this runs as part of an
    /// explicit connect; reconnects pass `None`. On failure any connection
    /// opened here is closed again.
    async fn open_link(
        &self,
        device: &T::Device,
        config: &TerminalConfig,
        generation: Option<u64>,
    ) -> Result<Opened<T>> {
        self.journal.info("Connecting to GATT server...");
        let connection = self.transport.connect(device).await?;

        match self
            .resolve_and_subscribe(&connection, config, generation)
            .await
        {
            Ok((characteristic, notifications, disconnects)) => Ok(Opened {
                connection,
                characteristic,
                notifications,
                disconnects,
            }),
            Err(err) => {
                self.close_quietly(&connection).await;
                Err(err)
            }
        }
    }

    async fn resolve_and_subscribe(
        &self,
        connection: &T::Connection,
        config: &TerminalConfig,
        generation: Option<u64>,
    ) -> Result<(T::Characteristic, Notifications, DisconnectEvents)> {
        let disconnects = self.transport.on_disconnect(connection).await?;

        self.journal.info("Getting primary service...");
        let service = self
            .transport
            .discover_service(connection, config.service_uuid)
            .await?;

        self.journal.info("Getting characteristic...");
        let characteristic = self
            .transport
            .resolve_characteristic(&service, config.characteristic_uuid)
            .await?;

        if let Some(generation) = generation {
            self.advance(generation, SessionState::SubscribingNotifications)
                .await?;
        }

        self.journal.info("Starting notifications...");
        let notifications = self.transport.subscribe(&characteristic).await?;

        Ok((characteristic, notifications, disconnects))
    }

    async fn close_quietly(&self, connection: &T::Connection) {
        if let Err(err) = self.transport.disconnect(connection).await {
            self.journal
                .debug(&format!("Closing abandoned connection failed: {}", err));
        }
    }

    // ------------------------------------------------------------------------
    // Disconnect
    // ------------------------------------------------------------------------

    async fn disconnect(&self) -> Result<()> {
        let (link, pump) = {
            let mut shared = self.shared.lock().await;
            let connecting = !shared.state.can_connect();
            if !connecting && shared.link.is_none() {
                self.journal.info("Device is already disconnected");
                shared.device = None;
                self.set_state(&mut shared, SessionState::Disconnected);
                return Ok(());
            }

            // A reconnecting pump sees the new generation and closes its link
            let pump = if shared.state == SessionState::Reconnecting {
                None
            } else {
                shared.pump.take()
            };
            shared.generation += 1;
            shared.device = None;
            shared.reassembly.clear();
            shared.device_state.reset();
            self.set_state(&mut shared, SessionState::Disconnected);
            (shared.link.take(), pump)
        };

        if let Some(pump) = pump {
            pump.abort();
        }

        let Some(link) = link else {
            self.journal.info("Connection attempt cancelled");
            return Ok(());
        };

        if let Err(err) = self.transport.unsubscribe(&link.characteristic).await {
            self.journal
                .warn(&format!("Failed to stop notifications: {}", err));
        }

        if self.transport.is_connected(&link.connection).await {
            self.journal.info("Disconnecting from device...");
            if let Err(err) = self.transport.disconnect(&link.connection).await {
                self.journal.error(&format!("Disconnect failed: {}", err));
            }
        } else {
            self.journal.info("Device is already disconnected");
        }

        Ok(())
    }

    // ------------------------------------------------------------------------
    // Outbound
    // ------------------------------------------------------------------------

    async fn send(&self, message: &str) -> Result<()> {
        if message.is_empty() {
            return Err(ValidationError::EmptyMessage.into());
        }

        let link = self.active_link().await?;
        let splitter = {
            let shared = self.shared.lock().await;
            ChunkSplitter::new(shared.config.max_chunk_len, shared.config.send_separator)?
        };

        for chunk in splitter.split(message) {
            self.write_chunk(link.epoch, chunk.as_bytes()).await?;
        }

        self.journal.debug(&format!("Sent: {}", message));
        Ok(())
    }

    async fn write_control(&self, frame: ControlFrame) -> Result<()> {
        let link = self.active_link().await?;
        self.write_chunk(link.epoch, &frame.to_bytes()).await?;
        self.journal.debug(&format!("Control frame written: {}", frame));
        Ok(())
    }

    /// Write one chunk on the link installed at `epoch`
    async fn write_chunk(&self, epoch: u64, data: &[u8]) -> Result<()> {
        let link = self.active_link().await?;
        if link.epoch != epoch {
            return Err(TaplinkError::Disconnected);
        }

        if let Err(err) = self.transport.write(&link.characteristic, data).await {
            if !self.transport.is_connected(&link.connection).await {
                return Err(TaplinkError::Disconnected);
            }
            return Err(err);
        }

        self.shared.lock().await.stats.chunks_written += 1;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Inbound
    // ------------------------------------------------------------------------

    async fn handle_notification(&self, epoch: u64, data: Vec<u8>) {
        let (messages, notices, reply) = {
            let mut shared = self.shared.lock().await;
            let current = shared.link.as_ref().map(|link| link.epoch);
            if current != Some(epoch) || shared.state != SessionState::Active {
                self.journal
                    .debug("Dropping notification from a stale link");
                return;
            }

            if FrameCodec::is_control_frame(&data) {
                (Vec::new(), Vec::new(), self.route_control(&mut shared, &data))
            } else {
                let messages = shared.reassembly.feed_bytes(&data);
                shared.stats.messages_delivered += messages.len() as u64;
                (messages.into_vec(), shared.reassembly.take_notices(), None)
            }
        };

        for notice in notices {
            self.journal.warn(&notice.to_string());
        }

        for message in messages {
            self.journal.debug(&format!("Received: {}", message));
            self.journal.events().receive(message);
        }

        if let Some(reply) = reply {
            if let Err(err) = self.write_chunk(epoch, &reply.to_bytes()).await {
                self.journal
                    .error(&format!("Failed to write reply {}: {}", reply, err));
            }
        }
    }

    fn route_control(&self, shared: &mut Shared<T>, data: &[u8]) -> Option<ControlFrame> {
        let Some(frame) = FrameCodec::decode(data) else {
            let err = ProtocolError::ShortFrame {
                expected: MIN_DECODE_LEN,
                actual: data.len(),
            };
            shared.stats.protocol_errors += 1;
            self.journal.warn(&format!("Discarding control frame: {}", err));
            return None;
        };

        match self.dispatcher.dispatch(&frame, &mut shared.device_state) {
            Ok(dispatched) => {
                shared.stats.frames_dispatched += 1;
                let (level, record) = dispatched.describe(&shared.device_state);
                self.journal.log(level, &record);
                self.journal
                    .events()
                    .control(&dispatched, &shared.device_state);
                dispatched.reply
            }
            Err(err) => {
                shared.stats.protocol_errors += 1;
                self.journal
                    .warn(&format!("Discarding control frame [{}]: {}", hex::encode(data), err));
                None
            }
        }
    }

    // ------------------------------------------------------------------------
    // Reconnect
    // ------------------------------------------------------------------------

    /// Handle an unsolicited disconnect of the link installed at `epoch`
    ///
    /// Makes one attempt to reopen the link on the remembered device. Returns
    /// the new link's epoch and channels on success.
    async fn reconnect(
        &self,
        epoch: u64,
        reason: &str,
    ) -> Option<(u64, Notifications, DisconnectEvents)> {
        let (generation, device, config, old_link) = {
            let mut shared = self.shared.lock().await;
            let current = shared.link.as_ref().map(|link| link.epoch);
            if current != Some(epoch) || shared.state != SessionState::Active {
                return None;
            }

            self.journal.warn(&format!(
                "\"{}\" bluetooth device disconnected ({}), trying to reconnect...",
                shared
                    .device
                    .as_ref()
                    .and_then(|device| device.name())
                    .unwrap_or_default(),
                reason
            ));

            shared.reassembly.clear();
            shared.device_state.reset();
            shared.stats.reconnect_attempts += 1;
            let old_link = shared.link.take();
            self.set_state(&mut shared, SessionState::Reconnecting);

            let Some(device) = shared.device.clone() else {
                self.set_state(&mut shared, SessionState::Disconnected);
                return None;
            };
            (shared.generation, device, shared.config.clone(), old_link)
        };

        // Deregister the old handler before the new subscription exists
        if let Some(old) = old_link {
            if let Err(err) = self.transport.unsubscribe(&old.characteristic).await {
                self.journal
                    .debug(&format!("Unsubscribing stale characteristic failed: {}", err));
            }
        }

        let result = self.open_link(&device, &config, None).await;

        let mut opened = match result {
            Ok(opened) => opened,
            Err(err) => {
                self.journal.error(&format!("Reconnect failed: {}", err));
                self.give_up(generation).await;
                return None;
            }
        };

        if let Ok(event) = opened.disconnects.try_recv() {
            self.journal.error(&format!(
                "Reconnect failed: link dropped again ({})",
                event.reason
            ));
            self.close_quietly(&opened.connection).await;
            self.give_up(generation).await;
            return None;
        }

        let mut shared = self.shared.lock().await;
        if shared.generation != generation || shared.state != SessionState::Reconnecting {
            drop(shared);
            self.close_quietly(&opened.connection).await;
            return None;
        }

        shared.link_epoch += 1;
        let epoch = shared.link_epoch;
        shared.link = Some(Link {
            connection: opened.connection,
            characteristic: opened.characteristic,
            epoch,
        });
        self.set_state(&mut shared, SessionState::Active);
        drop(shared);

        self.journal.info("Reconnected, notifications started");
        Some((epoch, opened.notifications, opened.disconnects))
    }

    /// Final state after a failed reconnect; the next connect re-runs the chooser
    async fn give_up(&self, generation: u64) {
        let mut shared = self.shared.lock().await;
        if shared.generation == generation {
            shared.device = None;
            shared.link = None;
            self.set_state(&mut shared, SessionState::Disconnected);
        }
    }
}

// ----------------------------------------------------------------------------
// Pump Task
// ----------------------------------------------------------------------------

/// Reads one link's channels until the session goes away or gives up
async fn pump<T: Transport>(
    session: Weak<SessionInner<T>>,
    mut epoch: u64,
    mut notifications: Notifications,
    mut disconnects: DisconnectEvents,
) {
    let mut notifications_open = true;
    let mut disconnects_open = true;

    while notifications_open || disconnects_open {
        tokio::select! {
            biased;

            data = notifications.recv(), if notifications_open => {
                let Some(session) = session.upgrade() else { return };
                match data {
                    Some(data) => session.handle_notification(epoch, data).await,
                    None => {
                        session.journal.debug("Notification stream closed");
                        notifications_open = false;
                    }
                }
            }

            event = disconnects.recv(), if disconnects_open => {
                let Some(session) = session.upgrade() else { return };
                match event {
                    Some(event) => match session.reconnect(epoch, &event.reason).await {
                        Some((new_epoch, new_notifications, new_disconnects)) => {
                            epoch = new_epoch;
                            notifications = new_notifications;
                            disconnects = new_disconnects;
                            notifications_open = true;
                            disconnects_open = true;
                        }
                        None => return,
                    },
                    None => {
                        session.journal.debug("Disconnect watch closed");
                        disconnects_open = false;
                    }
                }
            }
        }
    }
}
