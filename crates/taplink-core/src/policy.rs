//! Decisions the host makes when the tap asks

use crate::config::TapConfig;
use crate::device::DeviceState;

/// Answers the dispatcher gives to device handshakes, tags and queries
pub trait TapPolicy: Send + Sync {
    /// Whether a device may operate after its handshake
    fn accept_device(&self, device_id: u32, serial: &str) -> bool;

    /// Whether a scanned tag may pour on this device
    fn validate_rfid(&self, device: &DeviceState, rfid: u32) -> bool;

    /// Tap side reported for command 41
    fn tap_side(&self, device: &DeviceState) -> u32;

    /// Pour volume in millilitres
    fn volume_ml(&self, device: &DeviceState) -> u32;

    /// Price in cents
    fn price_cents(&self, device: &DeviceState) -> u32;

    /// Balance of the current user in cents
    fn balance_cents(&self, device: &DeviceState) -> u32;
}

/// Policy backed by fixed configuration values
#[derive(Debug, Clone, Default)]
pub struct StaticTapPolicy {
    config: TapConfig,
}

impl StaticTapPolicy {
    pub fn new(config: TapConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TapConfig {
        &self.config
    }
}

impl TapPolicy for StaticTapPolicy {
    fn accept_device(&self, device_id: u32, _serial: &str) -> bool {
        self.config.accepted_devices.is_empty() || self.config.accepted_devices.contains(&device_id)
    }

    fn validate_rfid(&self, device: &DeviceState, rfid: u32) -> bool {
        if !device.accepted {
            return false;
        }
        self.config.accepted_rfids.is_empty() || self.config.accepted_rfids.contains(&rfid)
    }

    fn tap_side(&self, _device: &DeviceState) -> u32 {
        self.config.tap_side
    }

    fn volume_ml(&self, _device: &DeviceState) -> u32 {
        self.config.volume_ml
    }

    fn price_cents(&self, _device: &DeviceState) -> u32 {
        self.config.price_cents
    }

    fn balance_cents(&self, _device: &DeviceState) -> u32 {
        self.config.balance_cents
    }
}
