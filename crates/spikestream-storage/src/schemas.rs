//! Store record definitions and binary format utilities

use crate::{
    error::{Result, StorageError},
    ids::{ConnectionGroupId, DeviceId, GroupId, ModelTypeId},
    NeuronId,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Largest magnitude of a persisted weight byte
pub const MAX_WEIGHT_BYTE: i8 = 127;

/// Suffix carried by every parameter column of a parameter table
pub const PARAMETER_COLUMN_SUFFIX: &str = "_val";

/// Convert a weight in `[-1.0, 1.0]` to its persisted signed byte
pub fn weight_to_byte(weight: f64) -> i8 {
    let clamped = weight.clamp(-1.0, 1.0);
    (clamped * MAX_WEIGHT_BYTE as f64).round() as i8
}

/// Convert a persisted signed byte to a weight in `[-1.0, 1.0]`
pub fn byte_to_weight(byte: i8) -> f64 {
    // -128 is outside the persisted range and saturates to -1.0
    (byte.max(-MAX_WEIGHT_BYTE) as f64) / MAX_WEIGHT_BYTE as f64
}

/// A contiguous block of neurons owned by one worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeuronGroupRecord {
    /// Group identifier
    pub id: GroupId,
    /// Human readable name
    #[serde(default)]
    pub name: String,
    /// First neuron ID of the block
    pub start_neuron_id: NeuronId,
    /// Width of the 2-D layout
    pub width: u32,
    /// Length of the 2-D layout
    pub length: u32,
    /// Neuron model type
    pub neuron_type: ModelTypeId,
}

impl NeuronGroupRecord {
    /// Number of neurons in the group
    pub fn size(&self) -> u32 {
        self.width * self.length
    }

    /// Check whether a neuron belongs to this group
    pub fn contains(&self, neuron: NeuronId) -> bool {
        let start = self.start_neuron_id.raw();
        neuron.raw() >= start && neuron.raw() < start + self.size()
    }

    /// Position of a neuron in the 2-D layout
    pub fn coordinates(&self, neuron: NeuronId) -> Option<(u32, u32)> {
        if !self.contains(neuron) || self.width == 0 {
            return None;
        }
        let offset = neuron.raw() - self.start_neuron_id.raw();
        Some((offset % self.width, offset / self.width))
    }

    /// Neuron at a position of the 2-D layout
    pub fn neuron_at(&self, x: u32, y: u32) -> Option<NeuronId> {
        if x >= self.width || y >= self.length {
            return None;
        }
        Some(NeuronId::new(self.start_neuron_id.raw() + y * self.width + x))
    }
}

/// Whether a model type describes neurons or synapses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    /// Neuron model
    Neuron,
    /// Synapse model
    Synapse,
}

/// Model type row: which plugin implements a type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelTypeRecord {
    /// Type identifier
    pub id: ModelTypeId,
    /// Neuron or synapse
    pub kind: ModelKind,
    /// Human readable description
    #[serde(default)]
    pub description: String,
    /// Name of the plugin providing the implementation
    pub plugin: String,
}

/// A bundle of synapses between two groups sharing a type and parameter table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionGroupRecord {
    /// Connection group identifier
    pub id: ConnectionGroupId,
    /// Group containing the source neurons
    pub from_group: GroupId,
    /// Group containing the destination neurons
    pub to_group: GroupId,
    /// Synapse model type
    pub synapse_type: ModelTypeId,
}

/// A single connection row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionRecord {
    /// Source neuron
    pub from: NeuronId,
    /// Destination neuron
    pub to: NeuronId,
    /// Persisted weight in `[-127, 127]`
    pub weight: i8,
    /// Transmission delay in time steps
    pub delay: u16,
    /// Owning connection group
    pub connection_group: ConnectionGroupId,
}

/// Persisted weight of one synapse
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeightRecord {
    /// Source neuron
    pub from: NeuronId,
    /// Destination neuron
    pub to: NeuronId,
    /// Persisted weight in `[-127, 127]`
    pub weight: i8,
}

/// Target table for weight persistence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WeightTable {
    /// Weights that become the connection weights of the store
    Committed,
    /// Transient weights for live inspection
    View,
}

/// A raw parameter table row as stored (column name → value)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterTable {
    /// Column values keyed by column name
    pub columns: BTreeMap<String, f64>,
}

impl ParameterTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a column, builder style
    pub fn with(mut self, column: impl Into<String>, value: f64) -> Self {
        self.columns.insert(column.into(), value);
        self
    }

    /// Materialize the parameter columns (those suffixed `_val`) into a map
    /// keyed by the column name without its suffix.
    pub fn to_map(&self) -> ParameterMap {
        let values = self
            .columns
            .iter()
            .filter_map(|(column, value)| {
                column
                    .strip_suffix(PARAMETER_COLUMN_SUFFIX)
                    .filter(|key| !key.is_empty())
                    .map(|key| (key.to_string(), *value))
            })
            .collect();
        ParameterMap { values }
    }
}

/// In-memory key → value parameter map handed to model factories
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterMap {
    values: BTreeMap<String, f64>,
}

impl ParameterMap {
    /// Create an empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a map from key/value pairs
    pub fn from_pairs<K: Into<String>>(pairs: impl IntoIterator<Item = (K, f64)>) -> Self {
        Self {
            values: pairs.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    /// Insert or replace a value
    pub fn insert(&mut self, key: impl Into<String>, value: f64) {
        self.values.insert(key.into(), value);
    }

    /// Look up a value
    pub fn get(&self, key: &str) -> Option<f64> {
        self.values.get(key).copied()
    }

    /// Look up a flag (any non-zero value is true)
    pub fn get_flag(&self, key: &str) -> Option<bool> {
        self.get(key).map(|v| v != 0.0)
    }

    /// Check whether a key is present
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Number of parameters
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the map is empty
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate over parameters in key order
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

/// Which units compute their final state at barrier close
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateMode {
    /// Only neurons touched by an event during the step
    #[default]
    Event,
    /// Every neuron, every step
    FullNeuron,
    /// Every synapse, every step
    FullSynapse,
    /// Every neuron and every synapse, every step
    FullBoth,
}

impl UpdateMode {
    /// Whether every neuron is updated each step
    pub fn all_neurons(self) -> bool {
        matches!(self, Self::FullNeuron | Self::FullBoth)
    }

    /// Whether every synapse is updated each step
    pub fn all_synapses(self) -> bool {
        matches!(self, Self::FullSynapse | Self::FullBoth)
    }
}

/// Simulation-wide parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalParameters {
    /// Simulated duration of one time step (ms)
    pub step_duration_ms: f64,
    /// Minimum wall-clock duration of one step (ms)
    pub min_step_duration_ms: u64,
    /// Derive elapsed time from the wall clock instead of the step count
    pub live_clock: bool,
    /// Which units update at barrier close
    pub update_mode: UpdateMode,
    /// Seed for noise injection
    pub rng_seed: Option<u64>,
}

impl Default for GlobalParameters {
    fn default() -> Self {
        Self {
            step_duration_ms: 1.0,
            min_step_duration_ms: 0,
            live_clock: false,
            update_mode: UpdateMode::Event,
            rng_seed: None,
        }
    }
}

/// How many neurons a noise injection reaches
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoiseMode {
    /// One neuron chosen uniformly at random
    SingleNeuron,
    /// Each neuron independently with probability `percent / 100`
    Percentage(f64),
    /// Like `Percentage`, with the percentage drawn uniformly per injection
    RandomPercentage,
}

/// What a noise injection does to a selected neuron
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoiseInjection {
    /// Force the neuron to fire
    Fire,
    /// Deliver a synaptic-style effect of the given amount
    Effect(f64),
}

/// Per-group noise configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseParameters {
    /// Inject noise on every step
    pub enabled: bool,
    /// Selection mode
    pub mode: NoiseMode,
    /// Injection kind
    pub injection: NoiseInjection,
}

impl Default for NoiseParameters {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: NoiseMode::SingleNeuron,
            injection: NoiseInjection::Fire,
        }
    }
}

/// Direction of data flow relative to the simulation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceDirection {
    /// The device feeds spikes into the group
    Input,
    /// The group's firing is sent to the device
    Output,
}

/// Byte transport used to reach a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceTransport {
    /// UDP datagrams
    Datagram,
    /// TCP stream
    Stream,
}

/// Which side opens the connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceRole {
    /// The worker connects (or sends) to the device address
    Client,
    /// The worker binds the device address and waits for the device
    Server,
}

/// External device descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    /// Device identifier
    pub id: DeviceId,
    /// Group the device is attached to
    pub group: GroupId,
    /// Host name or IP address
    pub address: String,
    /// Port number
    pub port: u16,
    /// Input or output
    pub direction: DeviceDirection,
    /// Datagram or stream
    pub transport: DeviceTransport,
    /// Client or server
    pub role: DeviceRole,
    /// Whether the device takes part in step synchronization
    #[serde(default)]
    pub synchronized: bool,
    /// Width of the device's 2-D layout
    pub width: u32,
    /// Length of the device's 2-D layout
    pub length: u32,
}

impl DeviceRecord {
    /// Socket address string `address:port`
    pub fn socket_address(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

/// Validate magic number for a binary format
pub fn validate_magic(data: &[u8], expected: [u8; 4]) -> Result<()> {
    if data.len() < 4 {
        return Err(StorageError::InvalidFormat {
            reason: "Data too short for magic number".to_string(),
        });
    }

    let found = [data[0], data[1], data[2], data[3]];
    if found != expected {
        return Err(StorageError::InvalidMagic { expected, found });
    }

    Ok(())
}

/// Calculate CRC32 checksum
pub fn calculate_checksum(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// Validate checksum
pub fn validate_checksum(data: &[u8], expected: u32) -> Result<()> {
    let computed = calculate_checksum(data);
    if computed != expected {
        return Err(StorageError::ChecksumMismatch { expected, computed });
    }
    Ok(())
}

/// Get current timestamp in nanoseconds since epoch
pub fn current_timestamp() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}
