//! Topology, parameter and weight storage for the SpikeStream simulation engine
//!
//! The simulation workers never own their network description. Everything they
//! need at load time (neuron groups, connection rows, model type records and
//! parameter tables, device descriptors) is read through the [`ParameterStore`]
//! trait, and everything they persist at runtime (weight snapshots, the
//! synchronization-delay flags used by adaptive pacing) is written back through it.

#![deny(missing_docs)]
#![warn(clippy::all)]

use core::fmt;
use serde::{Deserialize, Serialize};

/// Global neuron identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NeuronId(pub u32);

impl NeuronId {
    /// Create a new neuron ID
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get the raw ID value
    pub const fn raw(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for NeuronId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "N{}", self.0)
    }
}

/// Simulation time step number
pub type Step = u32;

// Core modules
pub mod error;
pub mod ids;
pub mod schemas;
pub mod traits;

// Storage backends
pub mod memory;
pub mod file;

// Binary weight snapshots
pub mod snapshot;

// Re-export essential types
pub use error::{StorageError, Result};
pub use ids::{ConnectionGroupId, DeviceId, GroupId, ModelTypeId};
pub use schemas::{
    byte_to_weight, weight_to_byte, ConnectionGroupRecord, ConnectionRecord, DeviceDirection,
    DeviceRecord, DeviceRole, DeviceTransport, GlobalParameters, ModelKind, ModelTypeRecord,
    NeuronGroupRecord, NoiseInjection, NoiseMode, NoiseParameters, ParameterMap, ParameterTable,
    UpdateMode, WeightRecord, WeightTable, MAX_WEIGHT_BYTE,
};
pub use traits::ParameterStore;

pub use memory::{MemoryStore, StoreImage};
pub use file::FileStore;
pub use snapshot::{WeightSnapshot, WeightSnapshotHeader};

/// Storage crate version for compatibility checking
pub const STORAGE_VERSION: u32 = 1;

/// Magic numbers for all binary formats
pub mod magic {
    /// Weight snapshot magic number: "VWGT"
    pub const VWGT: [u8; 4] = [0x56, 0x57, 0x47, 0x54];
}
