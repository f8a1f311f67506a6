//! Notification forwarding and disconnect watching
//!
//! btleplug exposes notifications and adapter events as streams shared by the
//! whole peripheral or adapter. Each subscription here gets a task that
//! filters the stream down to one characteristic or one peripheral and
//! forwards into the channel the session reads. A task ends when its stream
//! ends or the session drops the receiving end.

use btleplug::api::{Central, CentralEvent, Peripheral as _};
use btleplug::platform::{Adapter, Peripheral, PeripheralId};
use futures::stream::StreamExt;
use taplink_core::transport::{DisconnectEvent, DisconnectEvents, Notifications};
use tokio::sync::mpsc;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::error::BleTransportError;

/// Forward value notifications of `characteristic` into a channel
pub async fn forward_notifications(
    peripheral: &Peripheral,
    characteristic: Uuid,
) -> Result<Notifications, BleTransportError> {
    let mut notifications = peripheral
        .notifications()
        .await
        .map_err(|e| BleTransportError::NotificationStreamFailed(e.to_string()))?;
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tx.closed() => break,
                data = notifications.next() => match data {
                    Some(data) if data.uuid == characteristic => {
                        trace!("Notification [{}]", hex::encode(&data.value));
                        if tx.send(data.value).is_err() {
                            break;
                        }
                    }
                    Some(_) => {}
                    None => break,
                },
            }
        }
        debug!("Notification handler for {} ended", characteristic);
    });

    Ok(rx)
}

/// Report the first disconnect of `peripheral` seen by the adapter
pub async fn watch_disconnects(
    adapter: &Adapter,
    peripheral: PeripheralId,
) -> Result<DisconnectEvents, BleTransportError> {
    let mut events = adapter
        .events()
        .await
        .map_err(|e| BleTransportError::EventStreamFailed(e.to_string()))?;
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tx.closed() => break,
                event = events.next() => match event {
                    Some(CentralEvent::DeviceDisconnected(id)) if id == peripheral => {
                        let _ = tx.send(DisconnectEvent::new("gattserverdisconnected"));
                        break;
                    }
                    Some(_) => {}
                    None => {
                        let _ = tx.send(DisconnectEvent::new("adapter event stream ended"));
                        break;
                    }
                },
            }
        }
        debug!("Disconnect watch for {:?} ended", peripheral);
    });

    Ok(rx)
}
