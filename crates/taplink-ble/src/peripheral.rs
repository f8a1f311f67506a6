//! Handles for BLE devices, connections and characteristics

use btleplug::api::{CharPropFlags, Characteristic, Peripheral as _, Service, WriteType};
use btleplug::platform::{Peripheral, PeripheralId};
use taplink_core::DeviceHandle;

// ----------------------------------------------------------------------------
// Device
// ----------------------------------------------------------------------------

/// A peripheral returned by the device chooser
#[derive(Debug, Clone)]
pub struct BleDevice {
    /// BLE peripheral
    pub peripheral: Peripheral,
    /// Advertised local name
    pub name: Option<String>,
}

impl BleDevice {
    pub fn new(peripheral: Peripheral, name: Option<String>) -> Self {
        Self { peripheral, name }
    }

    /// Get peripheral ID for comparison
    pub fn peripheral_id(&self) -> PeripheralId {
        self.peripheral.id()
    }
}

impl DeviceHandle for BleDevice {
    fn id(&self) -> String {
        self.peripheral.address().to_string()
    }

    fn name(&self) -> Option<String> {
        self.name.clone()
    }
}

// ----------------------------------------------------------------------------
// Link Handles
// ----------------------------------------------------------------------------

/// An open connection to a peripheral
#[derive(Debug, Clone)]
pub struct BleConnection {
    pub peripheral: Peripheral,
}

/// A primary service found on a connected peripheral
#[derive(Debug, Clone)]
pub struct BleService {
    pub peripheral: Peripheral,
    pub service: Service,
}

/// The notify/write characteristic of a service
#[derive(Debug, Clone)]
pub struct BleCharacteristic {
    pub peripheral: Peripheral,
    pub characteristic: Characteristic,
}

/// Pick the write type for a characteristic
///
/// Acknowledged writes are used only when requested and supported; a
/// characteristic that only supports acknowledged writes always gets them.
pub fn write_type(properties: CharPropFlags, with_response: bool) -> WriteType {
    let acknowledged = properties.contains(CharPropFlags::WRITE);
    let unacknowledged = properties.contains(CharPropFlags::WRITE_WITHOUT_RESPONSE);

    if acknowledged && (with_response || !unacknowledged) {
        WriteType::WithResponse
    } else {
        WriteType::WithoutResponse
    }
}
