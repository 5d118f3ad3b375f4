//! # SpikeStream CLI
//!
//! Loads network stores, runs them on one worker thread per neuron group and
//! manages weight snapshots.

use clap::Parser;
use tracing::error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use spikestream_cli::SpikestreamCli;

fn main() {
    let cli = SpikestreamCli::parse();

    // Initialize logging with environment variable support
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.default_filter()));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();

    if let Err(err) = cli.execute() {
        error!("Command failed: {}", err);
        std::process::exit(1);
    }
}
