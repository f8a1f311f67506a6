//! BLE implementation of the terminal transport

use async_trait::async_trait;
use btleplug::api::{CharPropFlags, Peripheral as _};
use btleplug::platform::Adapter;
use taplink_core::transport::{DeviceFilter, DisconnectEvents, Notifications, Transport};
use taplink_core::Result as TaplinkResult;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::BleTransportConfig;
use crate::connection::{forward_notifications, watch_disconnects};
use crate::discovery::{choose_device, initialize_adapter};
use crate::error::BleTransportError;
use crate::peripheral::{write_type, BleCharacteristic, BleConnection, BleDevice, BleService};

// ----------------------------------------------------------------------------
// BLE Transport
// ----------------------------------------------------------------------------

/// Transport over a local Bluetooth adapter
#[derive(Clone)]
pub struct BleTransport {
    config: BleTransportConfig,
    adapter: Adapter,
}

impl BleTransport {
    /// Open the configured adapter
    pub async fn new(config: BleTransportConfig) -> Result<Self, BleTransportError> {
        let adapter = initialize_adapter(&config).await?;
        Ok(Self { config, adapter })
    }

    pub fn config(&self) -> &BleTransportConfig {
        &self.config
    }

    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }
}

#[async_trait]
impl Transport for BleTransport {
    type Device = BleDevice;
    type Connection = BleConnection;
    type Service = BleService;
    type Characteristic = BleCharacteristic;

    async fn scan(&self, filter: &DeviceFilter) -> TaplinkResult<BleDevice> {
        Ok(choose_device(&self.adapter, filter, &self.config).await?)
    }

    async fn connect(&self, device: &BleDevice) -> TaplinkResult<BleConnection> {
        let peripheral = device.peripheral.clone();
        let timeout_ms = self.config.connection_timeout.as_millis() as u64;

        match timeout(self.config.connection_timeout, peripheral.connect()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(BleTransportError::ConnectionFailed(e.to_string()).into()),
            Err(_) => return Err(BleTransportError::ConnectionTimeout { timeout_ms }.into()),
        }
        info!("Connected to {}", peripheral.address());

        if let Err(e) = peripheral.discover_services().await {
            if let Err(close) = peripheral.disconnect().await {
                debug!("Failed to close after discovery error: {}", close);
            }
            return Err(BleTransportError::ConnectionFailed(format!(
                "Failed to discover services: {}",
                e
            ))
            .into());
        }

        Ok(BleConnection { peripheral })
    }

    async fn discover_service(
        &self,
        connection: &BleConnection,
        service: Uuid,
    ) -> TaplinkResult<BleService> {
        let found = connection
            .peripheral
            .services()
            .into_iter()
            .find(|candidate| candidate.uuid == service)
            .ok_or_else(|| BleTransportError::ServiceNotFound {
                service: service.to_string(),
            })?;

        Ok(BleService {
            peripheral: connection.peripheral.clone(),
            service: found,
        })
    }

    async fn resolve_characteristic(
        &self,
        service: &BleService,
        characteristic: Uuid,
    ) -> TaplinkResult<BleCharacteristic> {
        let found = service
            .service
            .characteristics
            .iter()
            .find(|candidate| candidate.uuid == characteristic)
            .cloned()
            .ok_or_else(|| BleTransportError::CharacteristicNotFound {
                characteristic: characteristic.to_string(),
            })?;

        if !found.properties.contains(CharPropFlags::NOTIFY) {
            warn!("Characteristic {} does not advertise notify", characteristic);
        }

        Ok(BleCharacteristic {
            peripheral: service.peripheral.clone(),
            characteristic: found,
        })
    }

    async fn subscribe(&self, characteristic: &BleCharacteristic) -> TaplinkResult<Notifications> {
        // Open the stream first so nothing sent right after subscribing is lost
        let notifications =
            forward_notifications(&characteristic.peripheral, characteristic.characteristic.uuid)
                .await?;

        characteristic
            .peripheral
            .subscribe(&characteristic.characteristic)
            .await
            .map_err(|e| BleTransportError::SubscriptionFailed(e.to_string()))?;

        Ok(notifications)
    }

    async fn unsubscribe(&self, characteristic: &BleCharacteristic) -> TaplinkResult<()> {
        characteristic
            .peripheral
            .unsubscribe(&characteristic.characteristic)
            .await
            .map_err(|e| BleTransportError::SubscriptionFailed(e.to_string()))?;
        Ok(())
    }

    async fn write(&self, characteristic: &BleCharacteristic, data: &[u8]) -> TaplinkResult<()> {
        let kind = write_type(
            characteristic.characteristic.properties,
            self.config.write_with_response,
        );

        characteristic
            .peripheral
            .write(&characteristic.characteristic, data, kind)
            .await
            .map_err(|e| BleTransportError::WriteFailed(e.to_string()))?;

        debug!("Wrote {} bytes [{}]", data.len(), hex::encode(data));
        Ok(())
    }

    async fn on_disconnect(&self, connection: &BleConnection) -> TaplinkResult<DisconnectEvents> {
        Ok(watch_disconnects(&self.adapter, connection.peripheral.id()).await?)
    }

    async fn disconnect(&self, connection: &BleConnection) -> TaplinkResult<()> {
        connection
            .peripheral
            .disconnect()
            .await
            .map_err(|e| BleTransportError::ConnectionFailed(e.to_string()))?;
        info!("Disconnected from {}", connection.peripheral.address());
        Ok(())
    }

    async fn is_connected(&self, connection: &BleConnection) -> bool {
        connection.peripheral.is_connected().await.unwrap_or(false)
    }
}
