//! Weight snapshot export/import for network stores
//!
//! Example:
//!   spikestream snapshot export network.json --out weights.vwgt
//!   spikestream snapshot import network.json --input weights.vwgt --table committed
//!
//! Snapshots hold `(from, to, weight)` records with the weight stored as a
//! signed byte, either in the binary VWGT format or as a JSON array.

use clap::{Args, Subcommand, ValueEnum};
use spikestream_storage::{FileStore, GroupId, ParameterStore, WeightRecord, WeightSnapshot, WeightTable};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::{
    config::CliConfig,
    error::{CliError, CliResult},
};

#[derive(Args, Debug)]
pub struct SnapshotCommand {
    #[command(subcommand)]
    pub sub: SnapshotSubcommand,
}

#[derive(Subcommand, Debug)]
pub enum SnapshotSubcommand {
    /// Write the stored connection weights to a snapshot
    Export(SnapshotExport),
    /// Apply a snapshot to a store
    Import(SnapshotImport),
    /// Print a snapshot's header and records
    Show(SnapshotShow),
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum SnapshotFormat {
    /// VWGT binary snapshot
    Binary,
    /// JSON array of records
    Json,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum TableArg {
    /// Replace the connection weights of the store
    Committed,
    /// Write the inspection table next to the store
    View,
}

impl From<TableArg> for WeightTable {
    fn from(table: TableArg) -> Self {
        match table {
            TableArg::Committed => WeightTable::Committed,
            TableArg::View => WeightTable::View,
        }
    }
}

#[derive(Args, Debug)]
pub struct SnapshotExport {
    /// Network store (JSON)
    pub store: PathBuf,

    /// Output snapshot file path
    #[arg(short, long)]
    pub out: PathBuf,

    /// Only export weights of connections into this group
    #[arg(long)]
    pub group: Option<u32>,

    /// Output format
    #[arg(long, value_enum, default_value = "binary")]
    pub format: SnapshotFormat,
}

#[derive(Args, Debug)]
pub struct SnapshotImport {
    /// Network store (JSON)
    pub store: PathBuf,

    /// Input snapshot file path
    #[arg(long)]
    pub input: PathBuf,

    /// Input format
    #[arg(long, value_enum, default_value = "binary")]
    pub format: SnapshotFormat,

    /// Target weight table
    #[arg(long, value_enum, default_value = "committed")]
    pub table: TableArg,
}

#[derive(Args, Debug)]
pub struct SnapshotShow {
    /// Snapshot file path (VWGT)
    pub input: PathBuf,

    /// Maximum number of records to print
    #[arg(long, default_value_t = 20)]
    pub limit: usize,
}

impl SnapshotCommand {
    pub fn execute(self, _config: &CliConfig) -> CliResult<()> {
        match self.sub {
            SnapshotSubcommand::Export(cmd) => cmd.execute(),
            SnapshotSubcommand::Import(cmd) => cmd.execute(),
            SnapshotSubcommand::Show(cmd) => cmd.execute(),
        }
    }
}

impl SnapshotExport {
    pub fn execute(self) -> CliResult<()> {
        let store = FileStore::open(&self.store)?;
        let groups: Vec<GroupId> = match self.group {
            Some(id) => {
                let id = GroupId::new(id);
                store.neuron_group(id)?;
                vec![id]
            }
            None => store.neuron_groups()?.iter().map(|g| g.id).collect(),
        };
        let mut records = Vec::new();
        for group in groups {
            records.extend(store.load_weights(group)?);
        }

        if let Some(parent) = self.out.parent() {
            std::fs::create_dir_all(parent)?;
        }
        match self.format {
            SnapshotFormat::Binary => WeightSnapshot::new(records.clone()).save(&self.out)?,
            SnapshotFormat::Json => std::fs::write(&self.out, serde_json::to_string_pretty(&records)?)?,
        }

        info!("Exported {} weight records to {}", records.len(), self.out.display());
        Ok(())
    }
}

impl SnapshotImport {
    pub fn execute(self) -> CliResult<()> {
        let records = read_records(&self.input, self.format)?;
        let store = FileStore::open(&self.store)?;

        let known = store
            .connection_groups()?
            .iter()
            .map(|cg| store.connections(cg.id))
            .collect::<Result<Vec<_>, _>>()?;
        let unknown = records
            .iter()
            .filter(|r| !known.iter().flatten().any(|c| c.from == r.from && c.to == r.to))
            .count();
        if unknown > 0 && self.table == TableArg::Committed {
            return Err(CliError::invalid_args(format!(
                "{} of {} records match no connection in {}",
                unknown,
                records.len(),
                self.store.display()
            )));
        }

        store.save_weights(self.table.into(), &records)?;
        info!(
            "Imported {} weight records into the {:?} table of {}",
            records.len(),
            self.table,
            self.store.display()
        );
        Ok(())
    }
}

impl SnapshotShow {
    pub fn execute(self) -> CliResult<()> {
        let snapshot = WeightSnapshot::load(&self.input)?;
        println!(
            "VWGT v{}: {} records, checksum {:08x}",
            snapshot.header.version, snapshot.header.count, snapshot.header.checksum
        );
        for record in snapshot.records.iter().take(self.limit) {
            println!("  {} -> {}: {}", record.from, record.to, record.weight);
        }
        if snapshot.records.len() > self.limit {
            println!("  ... {} more", snapshot.records.len() - self.limit);
        }
        Ok(())
    }
}

fn read_records(path: &Path, format: SnapshotFormat) -> CliResult<Vec<WeightRecord>> {
    match format {
        SnapshotFormat::Binary => Ok(WeightSnapshot::load(path)?.records),
        SnapshotFormat::Json => {
            let text = std::fs::read_to_string(path)?;
            Ok(serde_json::from_str(&text)?)
        }
    }
}
