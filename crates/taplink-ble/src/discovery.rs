//! Adapter setup and the device chooser
//!
//! There is no interactive chooser on a desktop central, so the first
//! peripheral that advertises the requested service (and passes the name
//! prefix filter) within the scan timeout is the chosen device.

use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, PeripheralId};
use futures::stream::StreamExt;
use taplink_core::DeviceFilter;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::BleTransportConfig;
use crate::error::BleTransportError;
use crate::peripheral::BleDevice;

// ----------------------------------------------------------------------------
// Adapter
// ----------------------------------------------------------------------------

/// Open the adapter selected by `config.adapter_index`
pub async fn initialize_adapter(config: &BleTransportConfig) -> Result<Adapter, BleTransportError> {
    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;

    if adapters.is_empty() {
        return Err(BleTransportError::AdapterNotAvailable);
    }

    let available = adapters.len();
    let adapter = adapters
        .into_iter()
        .nth(config.adapter_index)
        .ok_or(BleTransportError::AdapterIndex {
            index: config.adapter_index,
            available,
        })?;

    match adapter.adapter_info().await {
        Ok(info) => info!("BLE adapter initialized: {}", info),
        Err(_) => info!("BLE adapter initialized"),
    }
    Ok(adapter)
}

// ----------------------------------------------------------------------------
// Device Chooser
// ----------------------------------------------------------------------------

/// Whether advertised data passes the chooser filter
pub fn matches_filter(filter: &DeviceFilter, name: Option<&str>, services: &[Uuid]) -> bool {
    filter.matches_name(name)
        && filter
            .services
            .iter()
            .all(|required| services.contains(required))
}

/// Scan until a matching peripheral shows up or `config.scan_timeout` passes
pub async fn choose_device(
    adapter: &Adapter,
    filter: &DeviceFilter,
    config: &BleTransportConfig,
) -> Result<BleDevice, BleTransportError> {
    let mut events = adapter
        .events()
        .await
        .map_err(|e| BleTransportError::EventStreamFailed(e.to_string()))?;

    adapter
        .start_scan(ScanFilter {
            services: filter.services.clone(),
        })
        .await
        .map_err(|e| BleTransportError::ScanFailed(e.to_string()))?;
    info!("Scanning for devices...");

    let deadline = Instant::now() + config.scan_timeout;

    // Peripherals the adapter already knows about are candidates too
    let mut found = None;
    for peripheral in adapter.peripherals().await.unwrap_or_default() {
        if let Some(device) = inspect(adapter, &peripheral.id(), filter).await {
            found = Some(device);
            break;
        }
    }

    while found.is_none() {
        match timeout_at(deadline, events.next()).await {
            Ok(Some(CentralEvent::DeviceDiscovered(id)))
            | Ok(Some(CentralEvent::DeviceUpdated(id))) => {
                found = inspect(adapter, &id, filter).await;
            }
            Ok(Some(_)) => {}
            Ok(None) | Err(_) => break,
        }
    }

    if let Err(e) = adapter.stop_scan().await {
        debug!("Failed to stop BLE scan: {}", e);
    }

    found.ok_or(BleTransportError::NoDeviceFound {
        timeout_ms: config.scan_timeout.as_millis() as u64,
    })
}

async fn inspect(adapter: &Adapter, id: &PeripheralId, filter: &DeviceFilter) -> Option<BleDevice> {
    let peripheral = adapter.peripheral(id).await.ok()?;
    let properties = peripheral.properties().await.ok()??;

    if !matches_filter(filter, properties.local_name.as_deref(), &properties.services) {
        return None;
    }

    debug!(
        "Discovered {} ({})",
        properties.local_name.as_deref().unwrap_or("unnamed"),
        properties.address
    );
    Some(BleDevice::new(peripheral, properties.local_name))
}
