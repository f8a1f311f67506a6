//! Session and facade tests against the simulated transport
//!
//! These tests drive a full terminal through connect, traffic, unsolicited
//! link loss and explicit disconnect, observing the session through the
//! channel event sink and the simulator's write log.

use std::sync::Arc;
use std::time::Duration;

use taplink_core::frame::MARKER_FROM_DEVICE;
use taplink_core::*;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{sleep, timeout, Instant};

const WAIT: Duration = Duration::from_secs(2);

// ----------------------------------------------------------------------------
// Test Utilities
// ----------------------------------------------------------------------------

type Inbound = UnboundedReceiver<TerminalEvent>;

fn terminal_with(
    config: TerminalConfig,
) -> (TerminalFacade<SimulatedTransport>, SimulatedTransport, Inbound) {
    let sim = SimulatedTransport::new(SimDevice::new("AA:BB:CC:DD:EE:01", "Tap-01"));
    let (events, inbound) = ChannelEvents::new();
    let terminal = TerminalFacade::new(sim.clone(), config, Arc::new(events));
    (terminal, sim, inbound)
}

fn terminal() -> (TerminalFacade<SimulatedTransport>, SimulatedTransport, Inbound) {
    terminal_with(TerminalConfig::default())
}

async fn connected() -> (TerminalFacade<SimulatedTransport>, SimulatedTransport, Inbound) {
    let (terminal, sim, inbound) = terminal();
    terminal.connect().await.unwrap();
    (terminal, sim, inbound)
}

fn device_frame(command: u8, value: u32) -> Vec<u8> {
    let mut bytes = FrameCodec::encode(command, value);
    bytes[9] = MARKER_FROM_DEVICE;
    bytes.to_vec()
}

/// Next log record at `level` containing `needle`
async fn next_log(inbound: &mut Inbound, level: LogLevel, needle: &str) -> String {
    loop {
        let event = timeout(WAIT, inbound.recv())
            .await
            .expect("timed out waiting for a log record")
            .expect("event channel closed");
        if let TerminalEvent::Log(seen, record) = event {
            if seen == level && record.contains(needle) {
                return record;
            }
        }
    }
}

/// Next completed inbound message, skipping logs and state changes
async fn next_message(inbound: &mut Inbound) -> String {
    loop {
        let event = timeout(WAIT, inbound.recv())
            .await
            .expect("timed out waiting for a message")
            .expect("event channel closed");
        if let TerminalEvent::Message(message) = event {
            return message;
        }
    }
}

async fn wait_for_state(terminal: &TerminalFacade<SimulatedTransport>, state: SessionState) {
    let deadline = Instant::now() + WAIT;
    while terminal.state().await != state {
        assert!(Instant::now() < deadline, "session never reached {}", state);
        sleep(Duration::from_millis(5)).await;
    }
}

async fn wait_for_writes(sim: &SimulatedTransport, count: usize) -> Vec<Vec<u8>> {
    let deadline = Instant::now() + WAIT;
    loop {
        let writes = sim.writes();
        if writes.len() >= count {
            return writes;
        }
        assert!(Instant::now() < deadline, "expected {} writes, saw {}", count, writes.len());
        sleep(Duration::from_millis(5)).await;
    }
}

async fn wait_for_stats<F>(terminal: &TerminalFacade<SimulatedTransport>, check: F) -> SessionStats
where
    F: Fn(&SessionStats) -> bool,
{
    let deadline = Instant::now() + WAIT;
    loop {
        let stats = terminal.stats().await;
        if check(&stats) {
            return stats;
        }
        assert!(Instant::now() < deadline, "stats never matched: {:?}", stats);
        sleep(Duration::from_millis(5)).await;
    }
}

// ----------------------------------------------------------------------------
// Connect
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_connect_walks_through_states() {
    let (terminal, sim, mut inbound) = terminal();
    terminal.connect().await.unwrap();

    let mut states = Vec::new();
    while let Ok(event) = inbound.try_recv() {
        if let TerminalEvent::State(state) = event {
            states.push(state);
        }
    }

    assert_eq!(
        states,
        vec![
            SessionState::Discovering,
            SessionState::Connecting,
            SessionState::SubscribingNotifications,
            SessionState::Active,
        ]
    );
    assert_eq!(terminal.device_name().await, "Tap-01");
    assert!(sim.is_subscribed());
}

#[tokio::test]
async fn test_connect_while_active_is_rejected() {
    let (terminal, sim, _inbound) = connected().await;

    let err = terminal.connect().await.unwrap_err();
    assert!(matches!(err, TaplinkError::InvalidState { .. }));
    assert_eq!(sim.connect_count(), 1);
    assert_eq!(terminal.state().await, SessionState::Active);
}

#[tokio::test]
async fn test_chooser_failure_propagates() {
    let (terminal, sim, _inbound) = terminal();
    sim.fail_next(SimStep::Scan, 1);

    let err = terminal.connect().await.unwrap_err();
    assert!(matches!(
        err,
        TaplinkError::Transport(TransportError::DeviceRequest { .. })
    ));
    assert_eq!(terminal.state().await, SessionState::Idle);
    assert_eq!(sim.connect_count(), 0);
}

#[tokio::test]
async fn test_missing_service_resets_to_idle() {
    let (terminal, sim, _inbound) = terminal();
    terminal.set_service_id(short_uuid(0x1234)).await;

    let err = terminal.connect().await.unwrap_err();
    assert!(matches!(
        err,
        TaplinkError::Transport(TransportError::ServiceNotFound { .. })
    ));
    assert_eq!(terminal.state().await, SessionState::Idle);
    assert_eq!(terminal.device_name().await, "");
    assert!(!sim.is_link_up());
}

#[tokio::test]
async fn test_failed_connect_runs_chooser_again() {
    let (terminal, sim, _inbound) = terminal();
    sim.fail_next(SimStep::Subscribe, 1);

    assert!(terminal.connect().await.is_err());
    terminal.connect().await.unwrap();

    assert_eq!(sim.scan_count(), 2);
    assert_eq!(terminal.state().await, SessionState::Active);
}

#[tokio::test]
async fn test_remembered_device_skips_chooser() {
    let (terminal, sim, _inbound) = terminal();
    terminal
        .session()
        .remember_device(SimDevice::new("AA:BB:CC:DD:EE:01", "Tap-01"))
        .await;
    // Remembered but not connected
    assert_eq!(terminal.device_name().await, "");

    terminal.connect().await.unwrap();
    assert_eq!(terminal.device_name().await, "Tap-01");
    assert_eq!(sim.scan_count(), 0);
    assert_eq!(sim.connect_count(), 1);
}

#[tokio::test]
async fn test_name_prefix_limits_chooser() {
    let config = TerminalConfig::default().with_device_name_prefix("Kettle");
    let (terminal, _sim, _inbound) = terminal_with(config);

    assert!(matches!(
        terminal.connect().await,
        Err(TaplinkError::Transport(TransportError::DeviceRequest { .. }))
    ));
}

#[tokio::test]
async fn test_zero_chunk_length_rejected_on_connect() {
    let config = TerminalConfig::default().with_max_chunk_len(0);
    let (terminal, sim, _inbound) = terminal_with(config);

    assert!(matches!(
        terminal.connect().await,
        Err(TaplinkError::Validation(ValidationError::ChunkLength))
    ));
    assert_eq!(sim.scan_count(), 0);
}

// ----------------------------------------------------------------------------
// Outbound Text
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_send_appends_separator() {
    let (terminal, sim, _inbound) = connected().await;

    terminal.send("AB").await.unwrap();
    assert_eq!(sim.writes(), vec![b"AB\n".to_vec()]);
}

#[tokio::test]
async fn test_long_message_is_chunked_in_order() {
    let (terminal, sim, _inbound) = connected().await;
    let message = "0123456789".repeat(4);

    terminal.send(&message).await.unwrap();

    let writes = sim.writes();
    assert_eq!(writes.len(), 3);
    assert!(writes.iter().all(|chunk| chunk.len() <= 20));
    assert_eq!(writes.concat(), format!("{}\n", message).into_bytes());
    assert_eq!(terminal.stats().await.chunks_written, 3);
}

#[tokio::test]
async fn test_custom_send_separator() {
    let (terminal, sim, _inbound) = connected().await;
    terminal.set_send_separator(";").await.unwrap();

    terminal.send("status").await.unwrap();
    assert_eq!(sim.writes(), vec![b"status;".to_vec()]);
}

#[tokio::test]
async fn test_empty_message_rejected_without_writes() {
    let (terminal, sim, _inbound) = connected().await;

    assert_eq!(
        terminal.send("").await,
        Err(TaplinkError::Validation(ValidationError::EmptyMessage))
    );
    assert!(sim.writes().is_empty());
}

#[tokio::test]
async fn test_send_without_link_fails() {
    let (terminal, sim, _inbound) = terminal();

    assert_eq!(terminal.send("AB").await, Err(TaplinkError::Disconnected));
    assert!(sim.writes().is_empty());
}

#[tokio::test]
async fn test_link_loss_mid_message_stops_remaining_chunks() {
    let (terminal, sim, _inbound) = connected().await;
    sim.drop_link_after_writes(1);

    let err = terminal.send(&"x".repeat(50)).await.unwrap_err();
    assert_eq!(err, TaplinkError::Disconnected);
    assert_eq!(sim.writes().len(), 1);
}

#[tokio::test]
async fn test_invalid_separator_rejected() {
    let (terminal, _sim, _inbound) = terminal();

    assert_eq!(
        terminal.set_receive_separator("ab").await,
        Err(TaplinkError::Validation(ValidationError::Separator { len: 2 }))
    );
    assert!(terminal.set_send_separator("").await.is_err());
    assert_eq!(terminal.session().config().await.send_separator, '\n');
}

// ----------------------------------------------------------------------------
// Inbound Text
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_notifications_reassembled_into_message() {
    let (terminal, sim, mut inbound) = connected().await;

    sim.notify(b"h".to_vec());
    sim.notify(b"i".to_vec());
    sim.notify(b"\n".to_vec());

    assert_eq!(next_message(&mut inbound).await, "hi");
    wait_for_stats(&terminal, |stats| stats.messages_delivered == 1).await;
}

#[tokio::test]
async fn test_one_notification_with_several_messages() {
    let (_terminal, sim, mut inbound) = connected().await;

    sim.notify(b"one\n\ntwo\nthr".to_vec());
    sim.notify(b"ee\n".to_vec());

    assert_eq!(next_message(&mut inbound).await, "one");
    assert_eq!(next_message(&mut inbound).await, "two");
    assert_eq!(next_message(&mut inbound).await, "three");
}

#[tokio::test]
async fn test_multibyte_character_split_across_notifications() {
    let (_terminal, sim, mut inbound) = connected().await;
    let bytes = "€5\n".as_bytes();

    sim.notify(bytes[..2].to_vec());
    sim.notify(bytes[2..].to_vec());

    assert_eq!(next_message(&mut inbound).await, "€5");
}

#[tokio::test]
async fn test_invalid_utf8_reported_to_host_log() {
    let (_terminal, sim, mut inbound) = connected().await;

    sim.notify(vec![b'a', 0xFF, b'b', b'\n']);

    let record = next_log(&mut inbound, LogLevel::Warn, "Invalid UTF-8").await;
    assert!(record.ends_with("ff"));
    assert_eq!(next_message(&mut inbound).await, "a\u{FFFD}b");
}

#[tokio::test]
async fn test_oversized_message_discarded_with_warning() {
    let (terminal, sim, mut inbound) = connected().await;
    let oversized = "x".repeat(reassembly::MAX_BUFFERED_CHARS + 5);

    for chunk in ChunkSplitter::new(20, '\n').unwrap().split(&oversized) {
        sim.notify(chunk.into_bytes());
    }
    sim.notify(b"next\n".to_vec());

    next_log(&mut inbound, LogLevel::Warn, "discarding message").await;
    assert_eq!(next_message(&mut inbound).await, "next");
    assert_eq!(terminal.stats().await.messages_delivered, 1);
}

#[tokio::test]
async fn test_eleven_byte_text_is_delivered() {
    let (terminal, sim, mut inbound) = connected().await;

    sim.notify(b"0123456789\n".to_vec());

    assert_eq!(next_message(&mut inbound).await, "0123456789");
    let stats = terminal.stats().await;
    assert_eq!(stats.protocol_errors, 0);
    assert_eq!(stats.frames_dispatched, 0);
}

#[tokio::test]
async fn test_receive_separator_change_applies_immediately() {
    let (terminal, sim, mut inbound) = connected().await;
    terminal.set_receive_separator("|").await.unwrap();

    sim.notify(b"a\nb|".to_vec());
    assert_eq!(next_message(&mut inbound).await, "a\nb");
}

#[tokio::test]
async fn test_greeting_delivered_on_subscribe() {
    let (terminal, sim, mut inbound) = terminal();
    sim.set_greeting(vec![b"ready\n".to_vec()]);

    terminal.connect().await.unwrap();
    assert_eq!(next_message(&mut inbound).await, "ready");
}

// ----------------------------------------------------------------------------
// Control Frames
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_handshake_frame_gets_reply() {
    let (terminal, sim, mut inbound) = connected().await;

    sim.notify(vec![21, 0, 0, 0, 1, 0, 0, 0, 0, 253, 10]);

    let writes = wait_for_writes(&sim, 1).await;
    assert_eq!(writes[0], vec![21, 0, 0, 0, 1, 0, 0, 0, 0, 254, 10]);

    let device = terminal.device_state().await;
    assert_eq!(device.device_id, Some(1));
    assert!(device.accepted);
    next_log(&mut inbound, LogLevel::Info, "Device handshake: id=1").await;
}

#[tokio::test]
async fn test_control_frame_is_not_treated_as_text() {
    let (terminal, sim, mut inbound) = connected().await;

    sim.notify(device_frame(42, 0));
    sim.notify(b"after\n".to_vec());

    // The frame ends in a newline but must not complete a text message
    assert_eq!(next_message(&mut inbound).await, "after");
    assert_eq!(FrameCodec::decode(&wait_for_writes(&sim, 1).await[0]).unwrap().value(), 500);
    assert_eq!(terminal.stats().await.frames_dispatched, 1);
}

#[tokio::test]
async fn test_query_frames_answered_from_config() {
    let config = TerminalConfig::default().with_tap(TapConfig {
        price_cents: 399,
        balance_cents: 1234,
        ..Default::default()
    });
    let (terminal, sim, _inbound) = terminal_with(config);
    terminal.connect().await.unwrap();

    sim.notify(device_frame(43, 0));
    sim.notify(device_frame(44, 0));

    let writes = wait_for_writes(&sim, 2).await;
    let price = FrameCodec::decode(&writes[0]).unwrap();
    let balance = FrameCodec::decode(&writes[1]).unwrap();
    assert_eq!((price.command, price.value()), (43, 399));
    assert_eq!((balance.command, balance.value()), (44, 1234));
}

#[tokio::test]
async fn test_rfid_flow() {
    let config = TerminalConfig::default().with_tap(TapConfig {
        accepted_rfids: vec![777],
        ..Default::default()
    });
    let (terminal, sim, _inbound) = terminal_with(config);
    terminal.connect().await.unwrap();

    sim.notify(device_frame(21, 1));
    wait_for_writes(&sim, 1).await;

    // Accepted tag: no reply
    sim.notify(device_frame(31, 777));
    wait_for_stats(&terminal, |stats| stats.frames_dispatched == 2).await;
    assert_eq!(sim.writes().len(), 1);

    // Rejected tag: 31 with value 0
    sim.notify(device_frame(31, 5));
    let writes = wait_for_writes(&sim, 2).await;
    let reply = FrameCodec::decode(&writes[1]).unwrap();
    assert_eq!((reply.command, reply.value()), (31, 0));
    assert_eq!(terminal.device_state().await.rfid_number, Some(5));
}

#[tokio::test]
async fn test_pour_updates_tracked() {
    let (terminal, sim, mut inbound) = connected().await;

    sim.notify(device_frame(33, 120));
    sim.notify(device_frame(51, 480));
    wait_for_stats(&terminal, |stats| stats.frames_dispatched == 2).await;

    assert_eq!(terminal.device_state().await.last_pour_value, Some(480));
    assert!(sim.writes().is_empty());

    let mut commands = Vec::new();
    while let Ok(event) = inbound.try_recv() {
        if let TerminalEvent::Control { dispatched, .. } = event {
            commands.push(dispatched.command);
        }
    }
    assert_eq!(commands, vec![Command::PourProgress, Command::PourFinished]);
}

#[tokio::test]
async fn test_bad_frames_are_discarded() {
    let (terminal, sim, _inbound) = connected().await;

    // Host marker instead of device marker
    sim.notify(FrameCodec::encode(42, 0).to_vec());
    // Unknown command
    sim.notify(device_frame(99, 0));

    let stats = wait_for_stats(&terminal, |stats| stats.protocol_errors == 2).await;
    assert_eq!(stats.frames_dispatched, 0);
    assert!(sim.writes().is_empty());
    assert_eq!(terminal.state().await, SessionState::Active);
}

#[tokio::test]
async fn test_host_commands() {
    let (terminal, sim, _inbound) = connected().await;

    terminal.start_pour().await.unwrap();
    terminal.close_tap().await.unwrap();

    assert_eq!(
        sim.writes(),
        vec![
            vec![31, 0, 0, 0, 1, 0, 0, 0, 0, 254, 10],
            vec![45, 0, 0, 0, 1, 0, 0, 0, 0, 254, 10],
        ]
    );
}

// ----------------------------------------------------------------------------
// Link Loss and Disconnect
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_unsolicited_drop_reconnects_without_chooser() {
    let (terminal, sim, mut inbound) = connected().await;

    sim.drop_link("out of range");
    wait_for_stats(&terminal, |stats| stats.reconnect_attempts == 1).await;
    wait_for_state(&terminal, SessionState::Active).await;

    assert_eq!(sim.scan_count(), 1);
    assert_eq!(sim.connect_count(), 2);

    terminal.send("again").await.unwrap();
    assert_eq!(sim.writes(), vec![b"again\n".to_vec()]);

    sim.notify(b"back\n".to_vec());
    assert_eq!(next_message(&mut inbound).await, "back");
}

#[tokio::test]
async fn test_partial_text_discarded_on_reconnect() {
    let (terminal, sim, mut inbound) = connected().await;

    sim.notify(b"lost".to_vec());
    sim.drop_link("out of range");
    wait_for_stats(&terminal, |stats| stats.reconnect_attempts == 1).await;
    wait_for_state(&terminal, SessionState::Active).await;

    sim.notify(b"fresh\n".to_vec());
    assert_eq!(next_message(&mut inbound).await, "fresh");
}

#[tokio::test]
async fn test_drop_during_reconnect_ends_disconnected() {
    let (terminal, sim, _inbound) = connected().await;
    sim.drop_link_on_subscribe(2);

    sim.drop_link("out of range");
    wait_for_state(&terminal, SessionState::Disconnected).await;

    assert_eq!(terminal.device_name().await, "");
    assert_eq!(terminal.send("x").await, Err(TaplinkError::Disconnected));

    // A later connect runs the chooser again
    terminal.connect().await.unwrap();
    assert_eq!(sim.scan_count(), 2);
    assert_eq!(terminal.state().await, SessionState::Active);
}

#[tokio::test]
async fn test_failed_reconnect_ends_disconnected() {
    let (terminal, sim, _inbound) = connected().await;
    sim.fail_next(SimStep::Connect, 1);

    sim.drop_link("out of range");
    wait_for_state(&terminal, SessionState::Disconnected).await;
    assert!(!sim.is_link_up());
}

#[tokio::test]
async fn test_explicit_disconnect() {
    let (terminal, sim, _inbound) = connected().await;

    terminal.disconnect().await.unwrap();

    assert_eq!(terminal.state().await, SessionState::Disconnected);
    assert!(!sim.is_link_up());
    assert!(!sim.is_subscribed());
    assert_eq!(terminal.device_name().await, "");

    // No reconnect follows an explicit disconnect
    sleep(Duration::from_millis(50)).await;
    assert_eq!(sim.connect_count(), 1);
    assert_eq!(terminal.stats().await.reconnect_attempts, 0);
}

#[tokio::test]
async fn test_disconnect_when_idle_is_a_no_op() {
    let (terminal, sim, _inbound) = terminal();

    terminal.disconnect().await.unwrap();
    terminal.disconnect().await.unwrap();

    assert_eq!(terminal.state().await, SessionState::Disconnected);
    assert_eq!(sim.connect_count(), 0);
}

#[tokio::test]
async fn test_reconnect_after_explicit_disconnect() {
    let (terminal, sim, mut inbound) = connected().await;

    terminal.disconnect().await.unwrap();
    terminal.connect().await.unwrap();

    sim.notify(b"hello\n".to_vec());
    assert_eq!(next_message(&mut inbound).await, "hello");
    assert_eq!(sim.scan_count(), 2);
}
