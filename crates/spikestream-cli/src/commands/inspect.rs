//! Network store inspection

use clap::Args;
use serde::Serialize;
use spikestream_runtime::{Cluster, ModelRegistry, ParameterStore, SimulationConfig};
use spikestream_storage::{FileStore, GlobalParameters, ModelTypeId, StoreImage};
use std::{path::PathBuf, sync::Arc};
use tracing::info;

use crate::{config::CliConfig, error::CliResult};

/// Describe a network store
#[derive(Args, Debug)]
pub struct InspectCommand {
    /// Network store (JSON)
    pub store: PathBuf,

    /// Print the description as JSON
    #[arg(long)]
    pub json: bool,

    /// Also load every group to check plugins and parameters
    #[arg(long)]
    pub verify: bool,
}

/// Summary of one neuron group
#[derive(Debug, Clone, Serialize)]
pub struct GroupSummary {
    /// Group id
    pub id: u32,
    /// Group name
    pub name: String,
    /// First neuron id
    pub start: u32,
    /// Neurons
    pub size: u32,
    /// Neuron plugin
    pub plugin: String,
}

/// Summary of one connection group
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionSummary {
    /// Connection group id
    pub id: u32,
    /// Source group
    pub from: u32,
    /// Destination group
    pub to: u32,
    /// Synapse plugin
    pub plugin: String,
    /// Connection rows
    pub connections: usize,
    /// Largest delay (steps)
    pub max_delay: u16,
}

/// Description of a network store
#[derive(Debug, Clone, Serialize)]
pub struct StoreSummary {
    /// Neuron groups
    pub groups: Vec<GroupSummary>,
    /// Connection groups
    pub connection_groups: Vec<ConnectionSummary>,
    /// External devices
    pub devices: usize,
    /// Global parameters
    pub global: GlobalParameters,
}

impl StoreSummary {
    /// Summarize a store image
    pub fn from_image(image: &StoreImage) -> Self {
        let plugin = |type_id: ModelTypeId| {
            image
                .model_types
                .iter()
                .find(|t| t.id == type_id)
                .map(|t| t.plugin.clone())
                .unwrap_or_default()
        };
        let groups = image
            .groups
            .iter()
            .map(|g| GroupSummary {
                id: g.id.raw(),
                name: g.name.clone(),
                start: g.start_neuron_id.raw(),
                size: g.size(),
                plugin: plugin(g.neuron_type),
            })
            .collect();
        let connection_groups = image
            .connection_groups
            .iter()
            .map(|cg| {
                let rows = image.connections.iter().filter(|c| c.connection_group == cg.id);
                let (connections, max_delay) = rows.fold((0usize, 0u16), |(n, d), c| (n + 1, d.max(c.delay)));
                ConnectionSummary {
                    id: cg.id.raw(),
                    from: cg.from_group.raw(),
                    to: cg.to_group.raw(),
                    plugin: plugin(cg.synapse_type),
                    connections,
                    max_delay,
                }
            })
            .collect();
        Self {
            groups,
            connection_groups,
            devices: image.devices.len(),
            global: image.global.clone(),
        }
    }
}

impl InspectCommand {
    /// Execute the inspection
    pub fn execute(self, config: &CliConfig) -> CliResult<()> {
        let store = Arc::new(FileStore::open(&self.store)?);
        let summary = StoreSummary::from_image(&store.cache().image());

        if self.json || config.preferences.json_output {
            println!("{}", serde_json::to_string_pretty(&summary)?);
        } else {
            print_summary(&summary);
        }

        if self.verify {
            verify(store, config.simulation.clone())?;
            println!("All {} groups load", summary.groups.len());
        }
        Ok(())
    }
}

/// Load every group in worker threads, then shut them down
fn verify(store: Arc<FileStore>, simulation: SimulationConfig) -> CliResult<()> {
    let groups = store.neuron_groups()?.len();
    info!("Verifying {} groups", groups);
    let timeout = simulation.load_timeout();
    let mut cluster = Cluster::new(store, Arc::new(ModelRegistry::with_builtins()?), simulation)?;
    cluster.load(timeout)?;
    cluster.shutdown();
    Ok(())
}

fn print_summary(summary: &StoreSummary) {
    println!("Neuron groups: {}", summary.groups.len());
    for g in &summary.groups {
        println!(
            "  G{} {:<16} neurons {}..{} ({}) {}",
            g.id,
            g.name,
            g.start,
            g.start + g.size,
            g.size,
            g.plugin
        );
    }
    println!("Connection groups: {}", summary.connection_groups.len());
    for cg in &summary.connection_groups {
        println!(
            "  C{} G{} -> G{} {} connections, max delay {} ({})",
            cg.id, cg.from, cg.to, cg.connections, cg.max_delay, cg.plugin
        );
    }
    println!("Devices: {}", summary.devices);
    println!(
        "Step duration: {} ms, update mode {:?}",
        summary.global.step_duration_ms, summary.global.update_mode
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use spikestream_storage::ParameterTable;

    #[test]
    fn test_summary_counts() {
        let image = StoreImage::new()
            .neuron_type(1, "standard", ParameterTable::new())
            .synapse_type(2, "weight")
            .group(1, 0, 3, 2, 1)
            .group(2, 10, 1, 1, 1)
            .connection_group(5, 1, 2, 2, ParameterTable::new())
            .connect(5, 0, 10, 0.5, 2)
            .connect(5, 1, 10, 0.5, 7);
        let summary = StoreSummary::from_image(&image);
        assert_eq!(summary.groups[0].size, 6);
        assert_eq!(summary.groups[1].plugin, "standard");
        assert_eq!(summary.connection_groups[0].connections, 2);
        assert_eq!(summary.connection_groups[0].max_delay, 7);
        assert_eq!(summary.connection_groups[0].plugin, "weight");
    }
}
