//! Fixed-length control frame codec
//!
//! Control frames share the characteristic with free-form text. Every frame is
//! exactly eleven bytes:
//!
//! ```text
//! ┌─────────┬──────────────────┬──────────────┬────────┬────────────┐
//! │ command │ payload (u32 BE) │ reserved (4) │ marker │ terminator │
//! │   [0]   │      [1..5]      │    [5..9]    │  [9]   │    [10]    │
//! └─────────┴──────────────────┴──────────────┴────────┴────────────┘
//! ```
//!
//! The marker distinguishes device-to-host frames (253) from host-to-device
//! frames (254). The terminator is always a line feed.

use core::fmt;

// ----------------------------------------------------------------------------
// Constants
// ----------------------------------------------------------------------------

/// Total length of an encoded control frame
pub const CONTROL_FRAME_LEN: usize = 11;

/// Shortest input `FrameCodec::decode` accepts (terminator may be missing)
pub const MIN_DECODE_LEN: usize = 10;

/// Marker of frames sent by the device
pub const MARKER_FROM_DEVICE: u8 = 253;

/// Marker of frames sent by the host
pub const MARKER_TO_DEVICE: u8 = 254;

/// Last byte of every control frame
pub const FRAME_TERMINATOR: u8 = 10;

const MARKER_OFFSET: usize = 9;
const TERMINATOR_OFFSET: usize = 10;

// ----------------------------------------------------------------------------
// Control Frame
// ----------------------------------------------------------------------------

/// Direction a frame travels, derived from its marker byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    FromDevice,
    ToDevice,
}

impl Direction {
    /// Map a marker byte onto a direction
    pub fn from_marker(marker: u8) -> Option<Self> {
        match marker {
            MARKER_FROM_DEVICE => Some(Self::FromDevice),
            MARKER_TO_DEVICE => Some(Self::ToDevice),
            _ => None,
        }
    }

    /// Marker byte written for this direction
    pub fn marker(self) -> u8 {
        match self {
            Self::FromDevice => MARKER_FROM_DEVICE,
            Self::ToDevice => MARKER_TO_DEVICE,
        }
    }
}

/// A decoded control frame
///
/// `payload` holds the whole payload area (offsets 1..9). How it is read
/// depends on the command: the device handshake treats all eight bytes as an
/// identifier, every other command only reads the first four.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlFrame {
    pub command: u8,
    pub payload: [u8; 8],
    pub marker: u8,
    pub terminator: Option<u8>,
}

impl ControlFrame {
    /// Build a host-to-device frame
    pub fn outbound(command: u8, value: u32) -> Self {
        let mut payload = [0u8; 8];
        payload[..4].copy_from_slice(&value.to_be_bytes());
        Self {
            command,
            payload,
            marker: MARKER_TO_DEVICE,
            terminator: Some(FRAME_TERMINATOR),
        }
    }

    /// First four payload bytes as a big-endian integer
    pub fn value(&self) -> u32 {
        u32::from_be_bytes([
            self.payload[0],
            self.payload[1],
            self.payload[2],
            self.payload[3],
        ])
    }

    /// All eight payload bytes as zero-padded lowercase hex digits
    pub fn payload_hex(&self) -> String {
        hex::encode(self.payload)
    }

    /// Direction encoded by the marker, if recognized
    pub fn direction(&self) -> Option<Direction> {
        Direction::from_marker(self.marker)
    }

    /// Whether the frame was sent by the device
    pub fn is_from_device(&self) -> bool {
        self.marker == MARKER_FROM_DEVICE
    }

    /// Serialize to wire bytes, keeping the frame's own marker
    pub fn to_bytes(&self) -> [u8; CONTROL_FRAME_LEN] {
        let mut bytes = [0u8; CONTROL_FRAME_LEN];
        bytes[0] = self.command;
        bytes[1..MARKER_OFFSET].copy_from_slice(&self.payload);
        bytes[MARKER_OFFSET] = self.marker;
        bytes[TERMINATOR_OFFSET] = self.terminator.unwrap_or(FRAME_TERMINATOR);
        bytes
    }
}

impl fmt::Display for ControlFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cmd={} value={} marker={}",
            self.command,
            self.value(),
            self.marker
        )
    }
}

// ----------------------------------------------------------------------------
// Frame Codec
// ----------------------------------------------------------------------------

/// Encoder/decoder for the eleven-byte control frame
pub struct FrameCodec;

impl FrameCodec {
    /// Encode a host-to-device frame
    pub fn encode(command: u8, payload: u32) -> [u8; CONTROL_FRAME_LEN] {
        let mut bytes = [0u8; CONTROL_FRAME_LEN];
        bytes[0] = command;
        bytes[1..5].copy_from_slice(&payload.to_be_bytes());
        bytes[MARKER_OFFSET] = MARKER_TO_DEVICE;
        bytes[TERMINATOR_OFFSET] = FRAME_TERMINATOR;
        bytes
    }

    /// Decode a control frame
    ///
    /// Returns `None` for input shorter than [`MIN_DECODE_LEN`]. The marker is
    /// not checked here; callers decide whether a frame is acceptable.
    pub fn decode(bytes: &[u8]) -> Option<ControlFrame> {
        if bytes.len() < MIN_DECODE_LEN {
            return None;
        }

        let mut payload = [0u8; 8];
        payload.copy_from_slice(&bytes[1..MARKER_OFFSET]);

        Some(ControlFrame {
            command: bytes[0],
            payload,
            marker: bytes[MARKER_OFFSET],
            terminator: bytes.get(TERMINATOR_OFFSET).copied(),
        })
    }

    /// Whether a notification of this length may carry a control frame
    pub fn is_control_length(len: usize) -> bool {
        len == CONTROL_FRAME_LEN
    }

    /// Whether a notification is routed to the control path
    ///
    /// Eleven bytes with a frame marker at offset 9. Both markers are bytes
    /// that never occur in UTF-8, so an eleven-byte text chunk such as
    /// `"0123456789\n"` stays on the text path.
    pub fn is_control_frame(bytes: &[u8]) -> bool {
        Self::is_control_length(bytes.len())
            && matches!(bytes[MARKER_OFFSET], MARKER_FROM_DEVICE | MARKER_TO_DEVICE)
    }
}
