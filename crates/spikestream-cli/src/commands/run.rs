//! Run a stored network for a fixed number of steps
//!
//! Example:
//!   spikestream run network.json --steps 500 --mode full-neuron --fire 11 --save-weights

use clap::{Args, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use spikestream_runtime::{
    Cluster, Command, DataKind, GroupId, Message, ModelRegistry, NeuronId, ParameterStore, Report,
    SimulationConfig, UpdateMode, WorkerState,
};
use spikestream_storage::{FileStore, NoiseMode};
use std::{
    collections::BTreeMap,
    path::PathBuf,
    sync::Arc,
    time::{Duration, Instant},
};
use tracing::{info, warn};

use crate::{
    config::CliConfig,
    error::{CliError, CliResult},
};

/// Steps requested from the cluster per progress update
const CHUNK_STEPS: u32 = 10;

/// Update mode as spelled on the command line
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModeArg {
    /// Only neurons and synapses touched by events
    Event,
    /// Every neuron every step
    FullNeuron,
    /// Every synapse every step
    FullSynapse,
    /// Every neuron and synapse every step
    FullBoth,
}

impl From<ModeArg> for UpdateMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Event => UpdateMode::Event,
            ModeArg::FullNeuron => UpdateMode::FullNeuron,
            ModeArg::FullSynapse => UpdateMode::FullSynapse,
            ModeArg::FullBoth => UpdateMode::FullBoth,
        }
    }
}

/// Run a network
#[derive(Args, Debug)]
pub struct RunCommand {
    /// Network store (JSON)
    pub store: PathBuf,

    /// Number of steps to simulate
    #[arg(short = 'n', long, default_value_t = 100)]
    pub steps: u32,

    /// Update mode override
    #[arg(long, value_enum)]
    pub mode: Option<ModeArg>,

    /// Minimum wall-clock duration of a step (ms)
    #[arg(long)]
    pub min_step_ms: Option<u64>,

    /// Seed for noise injection
    #[arg(long)]
    pub seed: Option<u64>,

    /// Inject noise into this percentage of every group's neurons before the first step
    #[arg(long)]
    pub noise: Option<f64>,

    /// Neurons to fire at the first step
    #[arg(long, value_delimiter = ',')]
    pub fire: Vec<u32>,

    /// Commit the learned weights to the store when done
    #[arg(long)]
    pub save_weights: bool,

    /// Seconds to wait for each batch of steps
    #[arg(long, default_value_t = 60)]
    pub timeout_secs: u64,

    /// Print the summary as JSON
    #[arg(long)]
    pub json: bool,
}

/// Outcome of a run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    /// Steps completed by every group
    pub steps: u32,
    /// Firings per group
    pub firings: BTreeMap<u32, u64>,
    /// Warnings reported by workers
    pub warnings: usize,
    /// Wall-clock duration (ms)
    pub elapsed_ms: u128,
}

impl RunCommand {
    /// Execute the run
    pub fn execute(self, config: &CliConfig) -> CliResult<()> {
        let simulation = self.simulation_config(config)?;
        let store = Arc::new(FileStore::open(&self.store)?);
        let forced = group_neurons(store.as_ref(), &self.fire)?;
        if let Some(percent) = self.noise {
            if !(0.0..=100.0).contains(&percent) {
                return Err(CliError::invalid_args(format!("--noise {} is not a percentage", percent)));
            }
        }

        let started = Instant::now();
        let mut cluster = Cluster::new(
            store.clone(),
            Arc::new(ModelRegistry::with_builtins()?),
            simulation.clone(),
        )?;
        cluster.load(simulation.load_timeout())?;
        info!("Loaded {} groups from {}", cluster.groups().len(), self.store.display());

        let observer = cluster.observe(DataKind::FiringData)?;
        for (group, neurons) in forced {
            cluster.command(group, Command::FireNeurons(neurons))?;
        }
        if let Some(percent) = self.noise {
            cluster.broadcast(Command::InjectNoise(NoiseMode::Percentage(percent)))?;
        }

        let progress = if config.preferences.show_progress && !self.json {
            ProgressBar::new(self.steps as u64)
        } else {
            ProgressBar::hidden()
        };
        progress.set_style(
            ProgressStyle::with_template("{spinner} [{elapsed_precise}] {bar:40} {pos}/{len} steps")
                .map_err(|e| CliError::Generic(anyhow::anyhow!(e)))?,
        );

        let timeout = Duration::from_secs(self.timeout_secs);
        let mut firings: BTreeMap<u32, u64> = BTreeMap::new();
        let mut warnings = 0;
        let mut done = 0;
        while done < self.steps {
            let chunk = CHUNK_STEPS.min(self.steps - done);
            done = cluster.run_steps(chunk, timeout)?;
            progress.set_position(done as u64);

            for envelope in observer.try_iter() {
                if let Message::FiringNeurons { group, neurons, .. } = envelope.message {
                    *firings.entry(group.raw()).or_default() += neurons.len() as u64;
                }
            }
            warnings += log_reports(cluster.drain_reports());
        }
        progress.finish_and_clear();

        if self.save_weights {
            cluster.broadcast(Command::SaveWeights)?;
        }
        // workers handle queued commands before shutting down
        let states = cluster.shutdown();
        if let Some((group, _)) = states.iter().find(|(_, state)| *state == WorkerState::Error) {
            return Err(CliError::simulation(format!("worker {} ended in the error state", group)));
        }

        let summary = RunSummary {
            steps: done,
            firings,
            warnings,
            elapsed_ms: started.elapsed().as_millis(),
        };
        if self.json || config.preferences.json_output {
            println!("{}", serde_json::to_string_pretty(&summary)?);
        } else {
            print_summary(&summary);
        }
        if self.save_weights {
            info!("Committed weights to {}", self.store.display());
        }
        Ok(())
    }

    fn simulation_config(&self, config: &CliConfig) -> CliResult<SimulationConfig> {
        let mut simulation = config.simulation.clone();
        if let Some(mode) = self.mode {
            simulation = simulation.with_update_mode(mode.into());
        }
        if let Some(ms) = self.min_step_ms {
            simulation = simulation.with_min_step_duration_ms(ms);
        }
        if let Some(seed) = self.seed {
            simulation = simulation.with_seed(seed);
        }
        simulation.validate()?;
        Ok(simulation)
    }
}

/// Partition neuron ids by owning group
fn group_neurons(store: &dyn ParameterStore, neurons: &[u32]) -> CliResult<BTreeMap<GroupId, Vec<NeuronId>>> {
    let groups = store.neuron_groups()?;
    let mut by_group: BTreeMap<GroupId, Vec<NeuronId>> = BTreeMap::new();
    for &raw in neurons {
        let id = NeuronId::new(raw);
        let group = groups
            .iter()
            .find(|g| g.contains(id))
            .ok_or_else(|| CliError::invalid_args(format!("neuron {} belongs to no group", raw)))?;
        by_group.entry(group.id).or_default().push(id);
    }
    Ok(by_group)
}

/// Log worker reports; returns the number of warnings
fn log_reports(reports: Vec<Report>) -> usize {
    let mut warnings = 0;
    for report in reports {
        match report {
            Report::Warning { group, message } => {
                warnings += 1;
                warn!("{}: {}", group, message);
            }
            Report::Error { group, kind, message } => {
                warnings += 1;
                warn!("{} rejected a request ({:?}): {}", group, kind, message);
            }
            Report::Info { group, message } => info!("{}: {}", group, message),
            _ => {}
        }
    }
    warnings
}

fn print_summary(summary: &RunSummary) {
    println!("Completed {} steps in {} ms", summary.steps, summary.elapsed_ms);
    for (group, count) in &summary.firings {
        println!("  G{}: {} firings", group, count);
    }
    if summary.warnings > 0 {
        println!("  {} warnings", summary.warnings);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spikestream_storage::{MemoryStore, ParameterTable, StoreImage};

    fn store() -> MemoryStore {
        MemoryStore::new(
            StoreImage::new()
                .neuron_type(1, "standard", ParameterTable::new())
                .group(1, 10, 2, 2, 1)
                .group(2, 20, 2, 2, 1),
        )
        .unwrap()
    }

    #[test]
    fn test_group_neurons() {
        let by_group = group_neurons(&store(), &[11, 21, 13]).unwrap();
        assert_eq!(by_group[&GroupId::new(1)], vec![NeuronId::new(11), NeuronId::new(13)]);
        assert_eq!(by_group[&GroupId::new(2)], vec![NeuronId::new(21)]);
        assert!(group_neurons(&store(), &[99]).is_err());
    }

    #[test]
    fn test_flags_override_config() {
        let mut config = CliConfig::default();
        config.simulation.rng_seed = Some(1);
        let command = RunCommand {
            store: PathBuf::from("net.json"),
            steps: 10,
            mode: Some(ModeArg::FullSynapse),
            min_step_ms: None,
            seed: Some(7),
            noise: None,
            fire: Vec::new(),
            save_weights: false,
            timeout_secs: 1,
            json: false,
        };
        let simulation = command.simulation_config(&config).unwrap();
        assert_eq!(simulation.update_mode, Some(UpdateMode::FullSynapse));
        assert_eq!(simulation.rng_seed, Some(7));
    }
}
