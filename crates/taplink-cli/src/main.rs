//! taplink CLI - main entry point

use anyhow::Context;
use clap::Parser;
use tracing::info;

use taplink_ble::BleTransport;
use taplink_cli::{cli::Cli, commands::CommandDispatcher, config::AppConfig, emulator, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command line arguments
    let cli = Cli::parse();

    // Initialize logging
    setup_logging(cli.verbose);

    // Load configuration
    let mut config = load_configuration(&cli)?;
    config
        .apply_overrides(&cli)
        .context("Invalid command-line option")?;

    if cli.command == Commands::ShowConfig {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    if cli.simulate {
        info!("Using the tap emulator");
        CommandDispatcher::execute(cli.command, emulator::tap_emulator(1), config.terminal).await?;
    } else {
        let transport = BleTransport::new(config.ble.clone())
            .await
            .context("Failed to open the Bluetooth adapter")?;
        CommandDispatcher::execute(cli.command, transport, config.terminal).await?;
    }

    info!("taplink exited successfully");
    Ok(())
}

/// Setup logging based on verbosity level
fn setup_logging(verbose: bool) {
    let log_level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

/// Load configuration from file or use defaults
fn load_configuration(cli: &Cli) -> anyhow::Result<AppConfig> {
    if let Some(config_path) = &cli.config {
        info!("Loading configuration from: {}", config_path);
        AppConfig::load_from_file(config_path)
            .with_context(|| format!("Failed to load {}", config_path))
    } else {
        info!("Using default configuration");
        Ok(AppConfig::default())
    }
}
