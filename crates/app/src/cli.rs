use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

use crate::device::{self, DeviceCliArgs, DeviceConfig};

#[derive(Debug, Parser)]
#[command(name = "glasses", version, about = "Wearable camera control core")]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run connectivity, capture, indicator, and watchdog loops.
    Run(DeviceCliArgs),
    /// Validate the configuration and print it.
    Config(DeviceCliArgs),
}

pub fn handle_commands(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Run(args) => {
            let config = DeviceConfig::try_from(args)?;
            info!(
                "Starting device {} against {}",
                config.pipeline.device_id, config.pipeline.endpoint
            );
            device::run(config)
        }
        Command::Config(args) => {
            let config = DeviceConfig::try_from(args)?;
            println!("{config:#?}");
            Ok(())
        }
    }
}
