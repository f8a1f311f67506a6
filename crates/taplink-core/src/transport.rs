//! Transport capability consumed by the session
//!
//! The session never talks to a radio directly. It drives an implementation of
//! [`Transport`], which exposes the primitives of a notify/write characteristic
//! link: choose a device, connect, resolve the service and characteristic,
//! subscribe to notifications, write, and watch for disconnects.
//!
//! Notifications and disconnects are delivered through single-consumer
//! channels. Each subscription hands out a fresh receiver, so dropping the old
//! receiver is all it takes to deregister the previous handler.

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::Result;

// ----------------------------------------------------------------------------
// Channel Types
// ----------------------------------------------------------------------------

/// Raw characteristic values, one item per notification
pub type Notifications = mpsc::UnboundedReceiver<Vec<u8>>;

/// Unsolicited disconnects of one connection
pub type DisconnectEvents = mpsc::UnboundedReceiver<DisconnectEvent>;

/// The transport lost its connection to the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectEvent {
    pub reason: String,
}

impl DisconnectEvent {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

// ----------------------------------------------------------------------------
// Device Selection
// ----------------------------------------------------------------------------

/// Criteria the device chooser applies
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceFilter {
    /// Services the device must advertise
    pub services: Vec<Uuid>,
    /// Required prefix of the advertised name
    pub name_prefix: Option<String>,
}

impl DeviceFilter {
    /// Whether an advertised name passes the prefix filter
    pub fn matches_name(&self, name: Option<&str>) -> bool {
        match (&self.name_prefix, name) {
            (None, _) => true,
            (Some(prefix), Some(name)) => name.starts_with(prefix.as_str()),
            (Some(_), None) => false,
        }
    }
}

/// A device reference returned by the chooser
pub trait DeviceHandle: Clone + Send + Sync + 'static {
    /// Stable identifier (address or platform id)
    fn id(&self) -> String;

    /// Advertised name, if any
    fn name(&self) -> Option<String>;
}

// ----------------------------------------------------------------------------
// Transport Trait
// ----------------------------------------------------------------------------

/// Low-level link to a device exposing one notify/write characteristic
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    type Device: DeviceHandle;
    type Connection: Clone + Send + Sync + 'static;
    type Service: Send + Sync + 'static;
    type Characteristic: Clone + Send + Sync + 'static;

    /// Choose a device matching `filter`
    async fn scan(&self, filter: &DeviceFilter) -> Result<Self::Device>;

    /// Open a connection to a previously chosen device
    async fn connect(&self, device: &Self::Device) -> Result<Self::Connection>;

    /// Look up a primary service on an open connection
    async fn discover_service(
        &self,
        connection: &Self::Connection,
        service: Uuid,
    ) -> Result<Self::Service>;

    /// Look up a characteristic of a service
    async fn resolve_characteristic(
        &self,
        service: &Self::Service,
        characteristic: Uuid,
    ) -> Result<Self::Characteristic>;

    /// Start value-change notifications
    async fn subscribe(&self, characteristic: &Self::Characteristic) -> Result<Notifications>;

    /// Stop value-change notifications
    async fn unsubscribe(&self, characteristic: &Self::Characteristic) -> Result<()>;

    /// Write one chunk; completes when the transport accepted it
    async fn write(&self, characteristic: &Self::Characteristic, data: &[u8]) -> Result<()>;

    /// Watch a connection for unsolicited disconnects
    async fn on_disconnect(&self, connection: &Self::Connection) -> Result<DisconnectEvents>;

    /// Close a connection
    async fn disconnect(&self, connection: &Self::Connection) -> Result<()>;

    /// Whether a connection is still up
    async fn is_connected(&self, connection: &Self::Connection) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_without_prefix_matches_anything() {
        let filter = DeviceFilter::default();
        assert!(filter.matches_name(None));
        assert!(filter.matches_name(Some("anything")));
    }

    #[test]
    fn test_filter_with_prefix() {
        let filter = DeviceFilter {
            services: Vec::new(),
            name_prefix: Some("Tap".into()),
        };
        assert!(filter.matches_name(Some("Tap-07")));
        assert!(!filter.matches_name(Some("Kettle")));
        assert!(!filter.matches_name(None));
    }
}
