//! Command handlers for the taplink CLI

use std::sync::Arc;
use std::time::Duration;

use taplink_core::{ChannelEvents, TerminalConfig, TerminalEvent, TerminalFacade, Transport};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::cli::Commands;
use crate::error::Result;

/// Command dispatcher for handling CLI commands
pub struct CommandDispatcher;

impl CommandDispatcher {
    /// Connect over `transport` and execute `command`
    pub async fn execute<T: Transport>(
        command: Commands,
        transport: T,
        config: TerminalConfig,
    ) -> Result<()> {
        let (events, inbound) = ChannelEvents::new();
        let terminal = TerminalFacade::new(transport, config, Arc::new(events));
        let printer = spawn_printer(inbound);

        terminal.connect().await?;
        info!("Connected to \"{}\"", terminal.device_name().await);

        let result = Self::run(&terminal, command).await;

        let stats = terminal.stats().await;
        terminal.disconnect().await?;
        info!(
            "Session closed: {} chunks written, {} messages received, {} control frames",
            stats.chunks_written, stats.messages_delivered, stats.frames_dispatched
        );

        drop(terminal);
        printer.abort();
        result
    }

    async fn run<T: Transport>(terminal: &TerminalFacade<T>, command: Commands) -> Result<()> {
        match command {
            Commands::Terminal => Self::handle_terminal_command(terminal).await,
            Commands::Send { message, wait_ms } => {
                terminal.send(&message).await?;
                tokio::time::sleep(Duration::from_millis(wait_ms)).await;
                Ok(())
            }
            Commands::Pour { wait_ms } => {
                terminal.start_pour().await?;
                tokio::time::sleep(Duration::from_millis(wait_ms)).await;
                Ok(())
            }
            Commands::CloseTap => {
                terminal.close_tap().await?;
                // Give the device a moment to report the interrupted pour
                tokio::time::sleep(Duration::from_millis(500)).await;
                Ok(())
            }
            // Handled before a transport is opened
            Commands::ShowConfig => Ok(()),
        }
    }

    /// Read lines from stdin until EOF or `/quit`
    async fn handle_terminal_command<T: Transport>(terminal: &TerminalFacade<T>) -> Result<()> {
        println!("Type a message and press enter. Commands: /pour /close /status /quit");
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        while let Some(line) = lines.next_line().await? {
            let line = line.trim_end_matches('\r');
            let outcome = match line {
                "" => continue,
                "/quit" => break,
                "/pour" => terminal.start_pour().await,
                "/close" => terminal.close_tap().await,
                "/status" => {
                    let device = terminal.device_state().await;
                    println!(
                        "state={} device={:?} serial={:?} accepted={} rfid={:?} pour={:?}",
                        terminal.state().await,
                        device.device_id,
                        device.device_serial,
                        device.accepted,
                        device.rfid_number,
                        device.last_pour_value
                    );
                    Ok(())
                }
                message => terminal.send(message).await,
            };

            if let Err(e) = outcome {
                warn!("{}", e);
            }
        }

        Ok(())
    }
}

/// Print inbound messages and control traffic as they arrive
fn spawn_printer(mut inbound: UnboundedReceiver<TerminalEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = inbound.recv().await {
            match event {
                TerminalEvent::Message(message) => println!("< {}", message),
                TerminalEvent::Control { dispatched, device } => {
                    let reply = dispatched
                        .reply
                        .map(|frame| hex::encode(frame.to_bytes()))
                        .unwrap_or_else(|| "-".into());
                    println!(
                        "[{}] value={} reply={} device={:?}",
                        dispatched.command, dispatched.value, reply, device.device_id
                    );
                }
                TerminalEvent::State(state) => println!("* {}", state),
                // Already emitted through tracing
                TerminalEvent::Log(..) => {}
            }
        }
    })
}
