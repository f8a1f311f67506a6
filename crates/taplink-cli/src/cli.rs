//! Command-line interface definitions and parsing

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<String>,

    /// Service UUID (full form or 16-bit hex such as ffe0)
    #[arg(long)]
    pub service: Option<String>,

    /// Characteristic UUID (full form or 16-bit hex such as ffe1)
    #[arg(long)]
    pub characteristic: Option<String>,

    /// Character that ends inbound messages
    #[arg(long)]
    pub receive_separator: Option<String>,

    /// Character appended to outbound messages
    #[arg(long)]
    pub send_separator: Option<String>,

    /// Only offer devices whose name starts with this prefix
    #[arg(long)]
    pub name_prefix: Option<String>,

    /// Use the built-in tap emulator instead of a Bluetooth adapter
    #[arg(long)]
    pub simulate: bool,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Interactive terminal: typed lines are sent, received messages printed
    Terminal,
    /// Send a single message and print replies for a while
    Send {
        /// Message content
        message: String,
        /// How long to wait for replies (milliseconds)
        #[arg(short, long, default_value_t = 2000)]
        wait_ms: u64,
    },
    /// Tell the tap to start pouring
    Pour {
        /// How long to follow the pour (milliseconds)
        #[arg(short, long, default_value_t = 5000)]
        wait_ms: u64,
    },
    /// Close the tap valve
    CloseTap,
    /// Print the effective configuration as TOML
    ShowConfig,
}
