//! Control frame dispatch
//!
//! The dispatcher is invoked once per decoded control frame. It updates the
//! session's [`DeviceState`] and decides whether a reply frame goes back to the
//! device. It never performs I/O or logging; the session writes the returned
//! reply and logs [`Dispatched::describe`] through its journal.

use std::sync::Arc;

use crate::device::{Command, DeviceState};
use crate::errors::ProtocolError;
use crate::events::LogLevel;
use crate::frame::{ControlFrame, MARKER_FROM_DEVICE};
use crate::policy::TapPolicy;

// ----------------------------------------------------------------------------
// Dispatch Result
// ----------------------------------------------------------------------------

/// Result of dispatching one control frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatched {
    /// Command the frame carried
    pub command: Command,
    /// Payload value as the command interprets it
    pub value: u32,
    /// Frame to write back to the device, if any
    pub reply: Option<ControlFrame>,
}

impl Dispatched {
    fn reply(command: Command, value: u32, reply_value: u32) -> Self {
        Self {
            command,
            value,
            reply: Some(ControlFrame::outbound(command.code(), reply_value)),
        }
    }

    fn silent(command: Command, value: u32) -> Self {
        Self {
            command,
            value,
            reply: None,
        }
    }

    /// Log record for this dispatch, given the device state it produced
    pub fn describe(&self, state: &DeviceState) -> (LogLevel, String) {
        let value = self.value;
        match self.command {
            Command::DeviceHandshake => (
                LogLevel::Info,
                format!(
                    "Device handshake: id={} serial={} accepted={}",
                    value,
                    state.device_serial.as_deref().unwrap_or_default(),
                    state.accepted
                ),
            ),
            Command::RfidScanned if self.reply.is_none() => (
                LogLevel::Info,
                format!("RFID {} accepted, waiting for pour start", value),
            ),
            Command::RfidScanned => (LogLevel::Warn, format!("RFID {} rejected", value)),
            Command::PourFinished => (LogLevel::Info, format!("Pour finished: {}", value)),
            Command::PourStarted
            | Command::PourProgress
            | Command::PourPaused
            | Command::PourResumed
            | Command::PourInterrupted => {
                (LogLevel::Debug, format!("Pour update {}: {}", self.command, value))
            }
            // Host-initiated only; a device echoing it gets no answer
            Command::CloseTap => (
                LogLevel::Debug,
                format!("Ignoring host command {} sent by device", self.command),
            ),
            Command::TapSideQuery
            | Command::VolumeQuery
            | Command::PriceQuery
            | Command::BalanceQuery => {
                let answer = self.reply.as_ref().map(|reply| reply.value()).unwrap_or_default();
                (LogLevel::Debug, format!("Answered {} with {}", self.command, answer))
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Command Dispatcher
// ----------------------------------------------------------------------------

/// Interprets device frames and decides replies
#[derive(Clone)]
pub struct CommandDispatcher {
    policy: Arc<dyn TapPolicy>,
}

impl CommandDispatcher {
    pub fn new(policy: Arc<dyn TapPolicy>) -> Self {
        Self { policy }
    }

    /// Dispatch a frame received from the device
    ///
    /// Frames whose marker is not the device marker, and frames with unknown
    /// command codes, are rejected with a [`ProtocolError`]; `state` is left
    /// untouched in that case.
    pub fn dispatch(
        &self,
        frame: &ControlFrame,
        state: &mut DeviceState,
    ) -> Result<Dispatched, ProtocolError> {
        if frame.marker != MARKER_FROM_DEVICE {
            return Err(ProtocolError::UnexpectedMarker {
                marker: frame.marker,
            });
        }

        let command = Command::try_from(frame.command)
            .map_err(|command| ProtocolError::UnknownCommand { command })?;
        let value = frame.value();

        let dispatched = match command {
            Command::DeviceHandshake => {
                let serial = frame.payload_hex();
                let accepted = self.policy.accept_device(value, &serial);
                state.device_id = Some(value);
                state.device_serial = Some(serial);
                state.accepted = accepted;
                Dispatched::reply(command, value, u32::from(accepted))
            }
            Command::RfidScanned => {
                state.rfid_number = Some(value);
                if self.policy.validate_rfid(state, value) {
                    Dispatched::silent(command, value)
                } else {
                    Dispatched::reply(command, value, 0)
                }
            }
            Command::TapSideQuery => {
                Dispatched::reply(command, value, self.policy.tap_side(state))
            }
            Command::VolumeQuery => {
                Dispatched::reply(command, value, self.policy.volume_ml(state))
            }
            Command::PriceQuery => {
                Dispatched::reply(command, value, self.policy.price_cents(state))
            }
            Command::BalanceQuery => {
                Dispatched::reply(command, value, self.policy.balance_cents(state))
            }
            Command::PourFinished => {
                state.last_pour_value = Some(value);
                Dispatched::silent(command, value)
            }
            Command::PourStarted
            | Command::PourProgress
            | Command::PourPaused
            | Command::PourResumed
            | Command::PourInterrupted => {
                state.last_pour_value = Some(value);
                Dispatched::silent(command, value)
            }
            Command::CloseTap => Dispatched::silent(command, value),
        };

        Ok(dispatched)
    }
}

impl core::fmt::Debug for CommandDispatcher {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CommandDispatcher").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TapConfig;
    use crate::frame::{FrameCodec, MARKER_TO_DEVICE};
    use crate::policy::StaticTapPolicy;

    fn dispatcher(config: TapConfig) -> CommandDispatcher {
        CommandDispatcher::new(Arc::new(StaticTapPolicy::new(config)))
    }

    fn device_frame(command: u8, value: u32) -> ControlFrame {
        let mut bytes = FrameCodec::encode(command, value);
        bytes[9] = MARKER_FROM_DEVICE;
        FrameCodec::decode(&bytes).unwrap()
    }

    #[test]
    fn test_handshake_stores_id_and_accepts() {
        let dispatcher = dispatcher(TapConfig::default());
        let mut state = DeviceState::default();
        let frame = FrameCodec::decode(&[21, 0, 0, 0, 1, 0, 0, 0, 0, 253, 10]).unwrap();

        let dispatched = dispatcher.dispatch(&frame, &mut state).unwrap();

        assert_eq!(state.device_id, Some(1));
        assert_eq!(state.device_serial.as_deref(), Some("0000000100000000"));
        assert!(state.accepted);
        let reply = dispatched.reply.unwrap();
        assert_eq!(reply.command, 21);
        assert_eq!(reply.value(), 1);
        assert_eq!(reply.marker, MARKER_TO_DEVICE);
    }

    #[test]
    fn test_handshake_rejects_unknown_device() {
        let dispatcher = dispatcher(TapConfig {
            accepted_devices: vec![5],
            ..Default::default()
        });
        let mut state = DeviceState::default();

        let dispatched = dispatcher.dispatch(&device_frame(21, 9), &mut state).unwrap();

        assert_eq!(state.device_id, Some(9));
        assert!(!state.accepted);
        assert_eq!(dispatched.reply.unwrap().value(), 0);
    }

    #[test]
    fn test_rfid_accepted_has_no_reply() {
        let dispatcher = dispatcher(TapConfig::default());
        let mut state = DeviceState::default();
        dispatcher.dispatch(&device_frame(21, 1), &mut state).unwrap();

        let dispatched = dispatcher.dispatch(&device_frame(31, 4242), &mut state).unwrap();

        assert_eq!(state.rfid_number, Some(4242));
        assert!(dispatched.reply.is_none());
    }

    #[test]
    fn test_rfid_rejected_replies_zero() {
        let dispatcher = dispatcher(TapConfig {
            accepted_rfids: vec![1],
            ..Default::default()
        });
        let mut state = DeviceState::default();
        dispatcher.dispatch(&device_frame(21, 1), &mut state).unwrap();

        let dispatched = dispatcher.dispatch(&device_frame(31, 2), &mut state).unwrap();

        assert_eq!(state.rfid_number, Some(2));
        let reply = dispatched.reply.unwrap();
        assert_eq!(reply.command, 31);
        assert_eq!(reply.value(), 0);
        assert_eq!(
            dispatched.describe(&state),
            (LogLevel::Warn, "RFID 2 rejected".to_string())
        );
    }

    #[test]
    fn test_describe_handshake() {
        let dispatcher = dispatcher(TapConfig::default());
        let mut state = DeviceState::default();
        let dispatched = dispatcher.dispatch(&device_frame(21, 1), &mut state).unwrap();

        let (level, record) = dispatched.describe(&state);
        assert_eq!(level, LogLevel::Info);
        assert_eq!(record, "Device handshake: id=1 serial=0000000100000000 accepted=true");
    }

    #[test]
    fn test_queries_answer_configured_values() {
        let dispatcher = dispatcher(TapConfig {
            volume_ml: 330,
            price_cents: 275,
            balance_cents: 1500,
            ..Default::default()
        });
        let mut state = DeviceState::default();

        let cases = [(41u8, 1u32), (42, 330), (43, 275), (44, 1500)];
        for (command, expected) in cases {
            let reply = dispatcher
                .dispatch(&device_frame(command, 0), &mut state)
                .unwrap()
                .reply
                .unwrap();
            assert_eq!(reply.command, command);
            assert_eq!(reply.value(), expected);
        }
    }

    #[test]
    fn test_pour_notifications_are_silent() {
        let dispatcher = dispatcher(TapConfig::default());
        let mut state = DeviceState::default();

        for command in [32u8, 33, 34, 35, 36, 51] {
            let dispatched = dispatcher
                .dispatch(&device_frame(command, 250), &mut state)
                .unwrap();
            assert!(dispatched.reply.is_none());
        }
        assert_eq!(state.last_pour_value, Some(250));
    }

    #[test]
    fn test_wrong_marker_is_rejected() {
        let dispatcher = dispatcher(TapConfig::default());
        let mut state = DeviceState::default();
        let frame = FrameCodec::decode(&FrameCodec::encode(21, 1)).unwrap();

        let err = dispatcher.dispatch(&frame, &mut state).unwrap_err();

        assert_eq!(err, ProtocolError::UnexpectedMarker { marker: 254 });
        assert_eq!(state, DeviceState::default());
    }

    #[test]
    fn test_unknown_command_is_rejected() {
        let dispatcher = dispatcher(TapConfig::default());
        let mut state = DeviceState::default();

        let err = dispatcher.dispatch(&device_frame(99, 1), &mut state).unwrap_err();

        assert_eq!(err, ProtocolError::UnknownCommand { command: 99 });
    }
}
