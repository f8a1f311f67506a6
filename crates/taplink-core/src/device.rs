//! Tap device commands and per-session device state

use core::fmt;

// ----------------------------------------------------------------------------
// Commands
// ----------------------------------------------------------------------------

/// Command codes of the control protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    /// Device handshake announcing its id
    DeviceHandshake = 21,
    /// RFID tag scanned; host-initiated with payload 1 to start pouring
    RfidScanned = 31,
    PourStarted = 32,
    PourProgress = 33,
    PourPaused = 34,
    PourResumed = 35,
    PourInterrupted = 36,
    TapSideQuery = 41,
    VolumeQuery = 42,
    PriceQuery = 43,
    BalanceQuery = 44,
    /// Host-initiated close of the tap valve
    CloseTap = 45,
    PourFinished = 51,
}

impl Command {
    /// Command code on the wire
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Whether the command only reports pour progress
    pub fn is_pour_notification(self) -> bool {
        matches!(
            self,
            Self::PourStarted
                | Self::PourProgress
                | Self::PourPaused
                | Self::PourResumed
                | Self::PourInterrupted
                | Self::PourFinished
        )
    }
}

impl TryFrom<u8> for Command {
    type Error = u8;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            21 => Ok(Self::DeviceHandshake),
            31 => Ok(Self::RfidScanned),
            32 => Ok(Self::PourStarted),
            33 => Ok(Self::PourProgress),
            34 => Ok(Self::PourPaused),
            35 => Ok(Self::PourResumed),
            36 => Ok(Self::PourInterrupted),
            41 => Ok(Self::TapSideQuery),
            42 => Ok(Self::VolumeQuery),
            43 => Ok(Self::PriceQuery),
            44 => Ok(Self::BalanceQuery),
            45 => Ok(Self::CloseTap),
            51 => Ok(Self::PourFinished),
            other => Err(other),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, self.code())
    }
}

// ----------------------------------------------------------------------------
// Device State
// ----------------------------------------------------------------------------

/// What the connected device has told us during this session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceState {
    /// Device id from the handshake (first four payload bytes)
    pub device_id: Option<u32>,
    /// Full handshake identifier as sixteen hex digits
    pub device_serial: Option<String>,
    /// Whether the handshake was accepted
    pub accepted: bool,
    /// Last scanned RFID tag
    pub rfid_number: Option<u32>,
    /// Last pour progress value reported by the device
    pub last_pour_value: Option<u32>,
}

impl DeviceState {
    /// Forget everything learned from the device
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Whether the handshake has completed
    pub fn is_identified(&self) -> bool {
        self.device_id.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_codes_round_trip() {
        for code in [21u8, 31, 32, 33, 34, 35, 36, 41, 42, 43, 44, 45, 51] {
            let command = Command::try_from(code).unwrap();
            assert_eq!(command.code(), code);
        }
        assert_eq!(Command::try_from(99), Err(99));
    }

    #[test]
    fn test_pour_notifications() {
        assert!(Command::PourProgress.is_pour_notification());
        assert!(Command::PourFinished.is_pour_notification());
        assert!(!Command::PriceQuery.is_pour_notification());
    }

    #[test]
    fn test_reset_clears_state() {
        let mut state = DeviceState {
            device_id: Some(7),
            device_serial: Some("0000000700000000".into()),
            accepted: true,
            rfid_number: Some(42),
            last_pour_value: Some(100),
        };
        assert!(state.is_identified());
        state.reset();
        assert_eq!(state, DeviceState::default());
    }
}
