//! Host-facing callbacks and the logging sink
//!
//! A host observes a session through [`TerminalEvents`]: completed inbound
//! messages, log records, dispatched control frames and state changes. Every
//! record is also emitted through `tracing`, so a host that only wants console
//! logs can use [`NullEvents`] and install a subscriber.
//!
//! Callbacks run inside the session's control flow and must return quickly.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::device::DeviceState;
use crate::dispatcher::Dispatched;
use crate::session::SessionState;

// ----------------------------------------------------------------------------
// Log Records
// ----------------------------------------------------------------------------

/// Severity of a log record
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

// ----------------------------------------------------------------------------
// Event Callbacks
// ----------------------------------------------------------------------------

/// Callbacks a host implements to observe a terminal session
pub trait TerminalEvents: Send + Sync {
    /// A complete inbound message, separator removed
    fn receive(&self, message: String);

    /// A log record
    fn log(&self, _level: LogLevel, _message: &str) {}

    /// A control frame was dispatched
    fn control(&self, _dispatched: &Dispatched, _device: &DeviceState) {}

    /// The session moved to a new state
    fn state_changed(&self, _state: SessionState) {}
}

/// Events implementation that drops everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NullEvents;

impl TerminalEvents for NullEvents {
    fn receive(&self, _message: String) {}
}

/// Event forwarded by [`ChannelEvents`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalEvent {
    Message(String),
    Log(LogLevel, String),
    Control {
        dispatched: Dispatched,
        device: DeviceState,
    },
    State(SessionState),
}

/// Events implementation forwarding everything into a channel
#[derive(Debug, Clone)]
pub struct ChannelEvents {
    tx: mpsc::UnboundedSender<TerminalEvent>,
}

impl ChannelEvents {
    /// Create the sink together with its receiving end
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TerminalEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn forward(&self, event: TerminalEvent) {
        // Receiver gone means the host stopped listening
        let _ = self.tx.send(event);
    }
}

impl TerminalEvents for ChannelEvents {
    fn receive(&self, message: String) {
        self.forward(TerminalEvent::Message(message));
    }

    fn log(&self, level: LogLevel, message: &str) {
        self.forward(TerminalEvent::Log(level, message.to_string()));
    }

    fn control(&self, dispatched: &Dispatched, device: &DeviceState) {
        self.forward(TerminalEvent::Control {
            dispatched: dispatched.clone(),
            device: device.clone(),
        });
    }

    fn state_changed(&self, state: SessionState) {
        self.forward(TerminalEvent::State(state));
    }
}

// ----------------------------------------------------------------------------
// Journal
// ----------------------------------------------------------------------------

/// Routes every session record to `tracing` and to the host callbacks
#[derive(Clone)]
pub(crate) struct Journal {
    events: Arc<dyn TerminalEvents>,
}

impl Journal {
    pub(crate) fn new(events: Arc<dyn TerminalEvents>) -> Self {
        Self { events }
    }

    pub(crate) fn events(&self) -> &Arc<dyn TerminalEvents> {
        &self.events
    }

    pub(crate) fn log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Debug => tracing::debug!("{}", message),
            LogLevel::Info => tracing::info!("{}", message),
            LogLevel::Warn => tracing::warn!("{}", message),
            LogLevel::Error => tracing::error!("{}", message),
        }
        self.events.log(level, message);
    }

    pub(crate) fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message);
    }

    pub(crate) fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }

    pub(crate) fn warn(&self, message: &str) {
        self.log(LogLevel::Warn, message);
    }

    pub(crate) fn error(&self, message: &str) {
        self.log(LogLevel::Error, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_events_forward_in_order() {
        let (events, mut rx) = ChannelEvents::new();
        events.receive("hello".into());
        events.log(LogLevel::Warn, "careful");
        events.state_changed(SessionState::Active);

        assert_eq!(rx.try_recv().unwrap(), TerminalEvent::Message("hello".into()));
        assert_eq!(
            rx.try_recv().unwrap(),
            TerminalEvent::Log(LogLevel::Warn, "careful".into())
        );
        assert_eq!(rx.try_recv().unwrap(), TerminalEvent::State(SessionState::Active));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_journal_reaches_host_sink() {
        let (events, mut rx) = ChannelEvents::new();
        let journal = Journal::new(Arc::new(events));
        journal.error("boom");
        assert_eq!(
            rx.try_recv().unwrap(),
            TerminalEvent::Log(LogLevel::Error, "boom".into())
        );
    }
}
