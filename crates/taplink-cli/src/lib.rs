//! taplink CLI library
//!
//! Command-line front end for the taplink terminal: argument parsing,
//! configuration loading, command handlers and the tap emulator used by
//! `--simulate`.

pub mod cli;
pub mod commands;
pub mod config;
pub mod emulator;
pub mod error;

pub use cli::{Cli, Commands};
pub use commands::CommandDispatcher;
pub use config::AppConfig;
pub use error::{CliError, Result};
