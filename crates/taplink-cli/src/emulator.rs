//! Tap emulator for `--simulate`
//!
//! Scripts a [`SimulatedTransport`] to behave like a beverage tap: it sends
//! its handshake on subscribe, pours when told to, answers a close command
//! and echoes text lines back.

use taplink_core::frame::{FRAME_TERMINATOR, MARKER_FROM_DEVICE, MARKER_TO_DEVICE};
use taplink_core::{Command, FrameCodec, SimDevice, SimulatedTransport};

/// Volume the emulated tap pours for one tag (ml)
pub const POUR_VOLUME_ML: u32 = 500;

const NOTIFY_LEN: usize = 20;

/// A control frame as the device would send it
pub fn device_frame(command: Command, value: u32) -> Vec<u8> {
    let mut bytes = FrameCodec::encode(command.code(), value);
    bytes[9] = MARKER_FROM_DEVICE;
    bytes.to_vec()
}

/// Build a transport backed by an emulated tap with the given device id
pub fn tap_emulator(device_id: u32) -> SimulatedTransport {
    let transport = SimulatedTransport::new(SimDevice::new(
        format!("00:00:00:00:{:02X}:{:02X}", (device_id >> 8) & 0xff, device_id & 0xff),
        format!("Tap-{}", device_id),
    ));

    transport.set_greeting(vec![
        b"Tap emulator ready\n".to_vec(),
        device_frame(Command::DeviceHandshake, device_id),
    ]);

    let mut pending = String::new();
    let mut poured = 0u32;

    transport.set_responder(move |data| {
        if is_host_frame(data) {
            return match Command::try_from(data[0]) {
                Ok(Command::RfidScanned) if data[4] == 1 => {
                    poured = POUR_VOLUME_ML;
                    vec![
                        device_frame(Command::PourStarted, 0),
                        device_frame(Command::PourProgress, POUR_VOLUME_ML / 2),
                        device_frame(Command::PourFinished, POUR_VOLUME_ML),
                    ]
                }
                Ok(Command::CloseTap) => vec![device_frame(Command::PourInterrupted, poured)],
                _ => Vec::new(),
            };
        }

        pending.push_str(&String::from_utf8_lossy(data));
        let mut replies = Vec::new();
        while let Some(end) = pending.find('\n') {
            let line: String = pending.drain(..=end).collect();
            let echo = format!("echo: {}", line);
            replies.extend(echo.as_bytes().chunks(NOTIFY_LEN).map(<[u8]>::to_vec));
        }
        replies
    });

    transport
}

fn is_host_frame(data: &[u8]) -> bool {
    FrameCodec::is_control_frame(data)
        && data[9] == MARKER_TO_DEVICE
        && data[10] == FRAME_TERMINATOR
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use taplink_core::{ChannelEvents, TerminalConfig, TerminalEvent, TerminalFacade};
    use tokio::time::timeout;

    async fn next_event<F, T>(inbound: &mut tokio::sync::mpsc::UnboundedReceiver<TerminalEvent>, pick: F) -> T
    where
        F: Fn(TerminalEvent) -> Option<T>,
    {
        loop {
            let event = timeout(Duration::from_secs(2), inbound.recv())
                .await
                .expect("timed out")
                .expect("channel closed");
            if let Some(value) = pick(event) {
                return value;
            }
        }
    }

    #[tokio::test]
    async fn test_emulator_handshake_and_pour() {
        let (events, mut inbound) = ChannelEvents::new();
        let terminal = TerminalFacade::new(tap_emulator(7), TerminalConfig::default(), Arc::new(events));
        terminal.connect().await.unwrap();

        let greeting = next_event(&mut inbound, |event| match event {
            TerminalEvent::Message(message) => Some(message),
            _ => None,
        })
        .await;
        assert_eq!(greeting, "Tap emulator ready");

        let handshake = next_event(&mut inbound, |event| match event {
            TerminalEvent::Control { device, .. } => Some(device),
            _ => None,
        })
        .await;
        assert_eq!(handshake.device_id, Some(7));
        assert!(handshake.accepted);

        terminal.start_pour().await.unwrap();
        let finished = next_event(&mut inbound, |event| match event {
            TerminalEvent::Control { dispatched, device } if dispatched.command == Command::PourFinished => {
                Some(device)
            }
            _ => None,
        })
        .await;
        assert_eq!(finished.last_pour_value, Some(POUR_VOLUME_ML));
    }

    #[tokio::test]
    async fn test_emulator_echoes_text() {
        let (events, mut inbound) = ChannelEvents::new();
        let terminal = TerminalFacade::new(tap_emulator(1), TerminalConfig::default(), Arc::new(events));
        terminal.connect().await.unwrap();

        terminal.send("a message longer than one chunk").await.unwrap();

        let mut messages = Vec::new();
        while messages.len() < 2 {
            messages.push(
                next_event(&mut inbound, |event| match event {
                    TerminalEvent::Message(message) => Some(message),
                    _ => None,
                })
                .await,
            );
        }
        assert_eq!(messages[1], "echo: a message longer than one chunk");
    }

    #[tokio::test]
    async fn test_emulator_echo_with_eleven_byte_tail() {
        let (events, mut inbound) = ChannelEvents::new();
        let terminal = TerminalFacade::new(tap_emulator(1), TerminalConfig::default(), Arc::new(events));
        terminal.connect().await.unwrap();

        // "echo: " + 24 characters + separator leaves an eleven-byte last chunk
        let line = "abcdefghijklmnopqrstuvwx";
        terminal.send(line).await.unwrap();

        let mut messages = Vec::new();
        while messages.len() < 2 {
            messages.push(
                next_event(&mut inbound, |event| match event {
                    TerminalEvent::Message(message) => Some(message),
                    _ => None,
                })
                .await,
            );
        }
        assert_eq!(messages[1], format!("echo: {}", line));
    }
}
