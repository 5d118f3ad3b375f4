//! CLI command implementations for SpikeStream

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

use crate::{config::CliConfig, error::CliResult};

pub mod inspect;
pub mod run;
pub mod snapshot;

/// SpikeStream - distributed, time-stepped spiking neural network simulator
#[derive(Parser, Debug)]
#[command(
    name = "spikestream",
    version,
    about = "Distributed spiking neural network simulator",
    long_about = "SpikeStream runs a spiking neural network split into neuron groups, one \
                  worker per group, exchanging spikes in lock-step. Networks are described \
                  by JSON store files; weights can be exported and imported as snapshots."
)]
pub struct SpikestreamCli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true, env = "SPIKESTREAM_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Load a network and run it for a number of steps
    #[command(alias = "sim")]
    Run(run::RunCommand),

    /// Describe a network store
    Inspect(inspect::InspectCommand),

    /// Weight snapshot export/import
    Snapshot(snapshot::SnapshotCommand),

    /// Generate shell completions
    Completions(CompletionsCommand),
}

/// Generate shell completions on stdout
#[derive(Args, Debug)]
pub struct CompletionsCommand {
    /// Target shell
    #[arg(value_enum)]
    pub shell: Shell,
}

impl SpikestreamCli {
    /// Execute the CLI command
    pub fn execute(self) -> CliResult<()> {
        let config = CliConfig::resolve(self.config.as_deref())?;

        match self.command {
            Commands::Run(cmd) => cmd.execute(&config),
            Commands::Inspect(cmd) => cmd.execute(&config),
            Commands::Snapshot(cmd) => cmd.execute(&config),
            Commands::Completions(cmd) => {
                let mut command = Self::command();
                clap_complete::generate(cmd.shell, &mut command, "spikestream", &mut std::io::stdout());
                Ok(())
            }
        }
    }

    /// Logging filter when `RUST_LOG` is unset
    pub fn default_filter(&self) -> String {
        if self.verbose {
            return "debug".to_string();
        }
        // the config file is read again by `execute`; a broken file is reported there
        CliConfig::resolve(self.config.as_deref())
            .ok()
            .and_then(|config| config.log_level)
            .unwrap_or_else(|| "info".to_string())
    }
}
