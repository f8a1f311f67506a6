//! In-memory transport with a scriptable device
//!
//! [`SimulatedTransport`] stands in for a radio in tests and in the CLI's
//! simulate mode. Clones share the same device, so a test can keep one handle
//! to inject notifications and drop the link while the session owns another.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::config::{DEFAULT_CHARACTERISTIC_UUID, DEFAULT_SERVICE_UUID};
use crate::errors::{Result, TransportError};
use crate::transport::{
    DeviceFilter, DeviceHandle, DisconnectEvent, DisconnectEvents, Notifications, Transport,
};

// ----------------------------------------------------------------------------
// Handles
// ----------------------------------------------------------------------------

/// Transport step that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimStep {
    Scan,
    Connect,
    DiscoverService,
    ResolveCharacteristic,
    Subscribe,
    Write,
}

/// Simulated device reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimDevice {
    id: String,
    name: Option<String>,
}

impl SimDevice {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: Some(name.into()),
        }
    }

    pub fn unnamed(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
        }
    }
}

impl DeviceHandle for SimDevice {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn name(&self) -> Option<String> {
        self.name.clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimConnection {
    id: u64,
}

#[derive(Debug)]
pub struct SimService {
    connection: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimCharacteristic {
    connection: u64,
}

/// Device-side reaction to a host write; returned values become notifications
pub type Responder = Box<dyn FnMut(&[u8]) -> Vec<Vec<u8>> + Send>;

// ----------------------------------------------------------------------------
// Simulated Device State
// ----------------------------------------------------------------------------

struct SimState {
    device: Option<SimDevice>,
    service_uuid: Uuid,
    characteristic_uuid: Uuid,
    next_connection: u64,
    active: Option<u64>,
    scans: u32,
    connects: u32,
    failures: HashMap<SimStep, u32>,
    drop_on_subscribe: Vec<u32>,
    drop_after_writes: Option<usize>,
    greeting: Vec<Vec<u8>>,
    notify: Option<(u64, mpsc::UnboundedSender<Vec<u8>>)>,
    watchers: Vec<(u64, mpsc::UnboundedSender<DisconnectEvent>)>,
    writes: Vec<Vec<u8>>,
    responder: Option<Responder>,
}

impl SimState {
    fn take_failure(&mut self, step: SimStep) -> bool {
        match self.failures.get_mut(&step) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }

    fn is_active(&self, connection: u64) -> bool {
        self.active == Some(connection)
    }

    /// Drop the active connection and tell its watchers
    fn drop_active(&mut self, reason: &str) -> bool {
        let Some(id) = self.active.take() else {
            return false;
        };
        debug!("Simulated link {} dropped: {}", id, reason);

        if matches!(self.notify, Some((notify_id, _)) if notify_id == id) {
            self.notify = None;
        }

        self.watchers.retain(|(watched, tx)| {
            if *watched == id {
                let _ = tx.send(DisconnectEvent::new(reason));
                false
            } else {
                true
            }
        });
        true
    }

    fn push_notification(&self, data: Vec<u8>) -> bool {
        match &self.notify {
            Some((_, tx)) => tx.send(data).is_ok(),
            None => false,
        }
    }
}

// ----------------------------------------------------------------------------
// Simulated Transport
// ----------------------------------------------------------------------------

/// Transport backed by an in-memory device
#[derive(Clone)]
pub struct SimulatedTransport {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedTransport {
    /// A transport whose chooser always offers `device`
    pub fn new(device: SimDevice) -> Self {
        Self::build(Some(device))
    }

    /// A transport with no device in range
    pub fn empty() -> Self {
        Self::build(None)
    }

    fn build(device: Option<SimDevice>) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                device,
                service_uuid: DEFAULT_SERVICE_UUID,
                characteristic_uuid: DEFAULT_CHARACTERISTIC_UUID,
                next_connection: 1,
                active: None,
                scans: 0,
                connects: 0,
                failures: HashMap::new(),
                drop_on_subscribe: Vec::new(),
                drop_after_writes: None,
                greeting: Vec::new(),
                notify: None,
                watchers: Vec::new(),
                writes: Vec::new(),
                responder: None,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Service and characteristic the device exposes
    pub fn with_uuids(self, service: Uuid, characteristic: Uuid) -> Self {
        {
            let mut state = self.lock();
            state.service_uuid = service;
            state.characteristic_uuid = characteristic;
        }
        self
    }

    /// Fail the next `times` calls of `step`
    pub fn fail_next(&self, step: SimStep, times: u32) {
        self.lock().failures.insert(step, times);
    }

    /// Drop the link right after subscribing during the given connect (1-based)
    pub fn drop_link_on_subscribe(&self, connect_attempt: u32) {
        self.lock().drop_on_subscribe.push(connect_attempt);
    }

    /// Drop the link once `writes` more writes have succeeded
    pub fn drop_link_after_writes(&self, writes: usize) {
        self.lock().drop_after_writes = Some(writes);
    }

    /// Notifications the device sends as soon as a subscription starts
    pub fn set_greeting(&self, greeting: Vec<Vec<u8>>) {
        self.lock().greeting = greeting;
    }

    /// Script the device's reaction to host writes
    pub fn set_responder<F>(&self, responder: F)
    where
        F: FnMut(&[u8]) -> Vec<Vec<u8>> + Send + 'static,
    {
        self.lock().responder = Some(Box::new(responder));
    }

    /// Deliver a notification on the current subscription
    pub fn notify(&self, data: impl Into<Vec<u8>>) -> bool {
        self.lock().push_notification(data.into())
    }

    /// Drop the link as if the device went out of range
    pub fn drop_link(&self, reason: &str) -> bool {
        self.lock().drop_active(reason)
    }

    /// Every chunk written so far
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.lock().writes.clone()
    }

    /// Return and forget every chunk written so far
    pub fn take_writes(&self) -> Vec<Vec<u8>> {
        core::mem::take(&mut self.lock().writes)
    }

    pub fn scan_count(&self) -> u32 {
        self.lock().scans
    }

    pub fn connect_count(&self) -> u32 {
        self.lock().connects
    }

    /// Whether a connection is currently open
    pub fn is_link_up(&self) -> bool {
        self.lock().active.is_some()
    }

    /// Whether a notification subscription is currently open
    pub fn is_subscribed(&self) -> bool {
        self.lock().notify.is_some()
    }
}

#[async_trait]
impl Transport for SimulatedTransport {
    type Device = SimDevice;
    type Connection = SimConnection;
    type Service = SimService;
    type Characteristic = SimCharacteristic;

    async fn scan(&self, filter: &DeviceFilter) -> Result<SimDevice> {
        let mut state = self.lock();
        state.scans += 1;

        if state.take_failure(SimStep::Scan) {
            return Err(TransportError::DeviceRequest {
                reason: "User cancelled the requestDevice() chooser".into(),
            }
            .into());
        }

        let device = state.device.clone().ok_or_else(|| TransportError::DeviceRequest {
            reason: "No devices found".into(),
        })?;

        if !filter.matches_name(device.name.as_deref()) {
            return Err(TransportError::DeviceRequest {
                reason: "No devices match the filter".into(),
            }
            .into());
        }

        Ok(device)
    }

    async fn connect(&self, device: &SimDevice) -> Result<SimConnection> {
        let mut state = self.lock();
        state.connects += 1;

        if state.take_failure(SimStep::Connect) {
            return Err(TransportError::Connect {
                reason: format!("{} is out of range", device.id),
            }
            .into());
        }

        let id = state.next_connection;
        state.next_connection += 1;
        state.active = Some(id);
        Ok(SimConnection { id })
    }

    async fn discover_service(&self, connection: &SimConnection, service: Uuid) -> Result<SimService> {
        let mut state = self.lock();
        if state.take_failure(SimStep::DiscoverService) || state.service_uuid != service {
            return Err(TransportError::ServiceNotFound {
                service: service.to_string(),
            }
            .into());
        }
        if !state.is_active(connection.id) {
            return Err(TransportError::Unavailable {
                reason: "GATT server is disconnected".into(),
            }
            .into());
        }
        Ok(SimService {
            connection: connection.id,
        })
    }

    async fn resolve_characteristic(
        &self,
        service: &SimService,
        characteristic: Uuid,
    ) -> Result<SimCharacteristic> {
        let mut state = self.lock();
        if state.take_failure(SimStep::ResolveCharacteristic)
            || state.characteristic_uuid != characteristic
        {
            return Err(TransportError::CharacteristicNotFound {
                characteristic: characteristic.to_string(),
            }
            .into());
        }
        if !state.is_active(service.connection) {
            return Err(TransportError::Unavailable {
                reason: "GATT server is disconnected".into(),
            }
            .into());
        }
        Ok(SimCharacteristic {
            connection: service.connection,
        })
    }

    async fn subscribe(&self, characteristic: &SimCharacteristic) -> Result<Notifications> {
        let mut state = self.lock();
        if state.take_failure(SimStep::Subscribe) || !state.is_active(characteristic.connection) {
            return Err(TransportError::Subscribe {
                reason: "startNotifications() failed".into(),
            }
            .into());
        }

        let (tx, rx) = mpsc::unbounded_channel();
        for data in &state.greeting {
            let _ = tx.send(data.clone());
        }
        state.notify = Some((characteristic.connection, tx));

        let attempt = state.connects;
        if state.drop_on_subscribe.contains(&attempt) {
            state.drop_active("link lost while subscribing");
        }

        Ok(rx)
    }

    async fn unsubscribe(&self, characteristic: &SimCharacteristic) -> Result<()> {
        let mut state = self.lock();
        if matches!(state.notify, Some((id, _)) if id == characteristic.connection) {
            state.notify = None;
        }
        Ok(())
    }

    async fn write(&self, characteristic: &SimCharacteristic, data: &[u8]) -> Result<()> {
        let mut guard = self.lock();
        let state = &mut *guard;

        if state.take_failure(SimStep::Write) {
            return Err(TransportError::Write {
                reason: "GATT operation failed".into(),
            }
            .into());
        }
        if !state.is_active(characteristic.connection) {
            return Err(TransportError::Unavailable {
                reason: "characteristic is no longer available".into(),
            }
            .into());
        }

        state.writes.push(data.to_vec());

        if let Some(responder) = state.responder.as_mut() {
            for reply in responder(data) {
                if let Some((_, tx)) = &state.notify {
                    let _ = tx.send(reply);
                }
            }
        }

        if let Some(remaining) = state.drop_after_writes.as_mut() {
            *remaining = remaining.saturating_sub(1);
            if *remaining == 0 {
                state.drop_after_writes = None;
                state.drop_active("link lost after write");
            }
        }

        Ok(())
    }

    async fn on_disconnect(&self, connection: &SimConnection) -> Result<DisconnectEvents> {
        let mut state = self.lock();
        let (tx, rx) = mpsc::unbounded_channel();
        if state.is_active(connection.id) {
            state.watchers.push((connection.id, tx));
        } else {
            let _ = tx.send(DisconnectEvent::new("already disconnected"));
        }
        Ok(rx)
    }

    async fn disconnect(&self, connection: &SimConnection) -> Result<()> {
        let mut state = self.lock();
        if state.is_active(connection.id) {
            state.drop_active("disconnected by host");
        }
        Ok(())
    }

    async fn is_connected(&self, connection: &SimConnection) -> bool {
        self.lock().is_active(connection.id)
    }
}
