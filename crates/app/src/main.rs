mod cli;
mod device;

use clap::Parser;

fn main() {
    if let Err(err) = run() {
        eprintln!("{err:?}");
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    device::telemetry::init_tracing();
    let cli = cli::Cli::parse();
    cli::handle_commands(cli)
}
