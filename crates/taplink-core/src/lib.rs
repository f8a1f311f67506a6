//! Taplink Core
//!
//! Host-side terminal for devices that expose a single notify/write
//! characteristic. Text is framed with a separator character and split into
//! fixed-size writes; incoming notifications are reassembled into whole
//! messages. Eleven-byte notifications are control frames from a beverage tap
//! and are dispatched to a [`TapPolicy`], with replies written back on the same
//! characteristic.
//!
//! The radio is abstracted behind [`Transport`]. [`SimulatedTransport`] is an
//! in-memory implementation used by tests and the CLI's simulate mode.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod chunking;
pub mod config;
pub mod device;
pub mod dispatcher;
pub mod errors;
pub mod events;
pub mod frame;
pub mod policy;
pub mod reassembly;
pub mod session;
pub mod simulator;
pub mod terminal;
pub mod transport;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use chunking::{ChunkSplitter, Chunks};
pub use config::{parse_separator, short_uuid, TapConfig, TerminalConfig};
pub use device::{Command, DeviceState};
pub use dispatcher::{CommandDispatcher, Dispatched};
pub use errors::{ProtocolError, Result, TaplinkError, TransportError, ValidationError};
pub use events::{ChannelEvents, LogLevel, NullEvents, TerminalEvent, TerminalEvents};
pub use frame::{ControlFrame, Direction, FrameCodec};
pub use policy::{StaticTapPolicy, TapPolicy};
pub use reassembly::{ReassemblyBuffer, ReassemblyNotice};
pub use session::{ConnectionSession, SessionState, SessionStats};
pub use simulator::{SimDevice, SimStep, SimulatedTransport};
pub use terminal::TerminalFacade;
pub use transport::{DeviceFilter, DeviceHandle, DisconnectEvent, Transport};
