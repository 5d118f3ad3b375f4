//! Worker engine for the SpikeStream distributed spiking neural network simulator
//!
//! A network is split into neuron groups and each group is owned by one
//! [`Worker`] running on its own thread. Workers exchange compact event
//! batches through a [`Fabric`], advance in lock-step behind a per-step
//! barrier, and take their topology and parameters from a
//! [`ParameterStore`]. Neuron and synapse dynamics are plug-ins resolved by
//! name through the [`ModelRegistry`].

#![deny(missing_docs)]
#![warn(clippy::all)]

// Re-export essential types from storage
pub use spikestream_storage::{
    ConnectionGroupId, DeviceId, GroupId, NeuronId, ParameterStore, ParameterTable, Step,
    StorageError, UpdateMode, Result as StorageResult,
};

// Core modules
pub mod clock;
pub mod config;
pub mod connection;
pub mod error;
pub mod message;
pub mod plugin;

// Dynamics
pub mod models;
pub mod noise;

// Spike exchange
pub mod fabric;
pub mod notifier;
pub mod router;

// Observation and external devices
pub mod device;
pub mod monitor;

// Orchestration
pub mod cluster;
pub mod worker;

// Re-export essential types
pub use clock::{SimulationClock, StepContext};
pub use cluster::Cluster;
pub use config::SimulationConfig;
pub use error::{DeviceError, ErrorKind, Result, RuntimeError};
pub use fabric::{ChannelFabric, Fabric};
pub use message::{
    Command, DataKind, EndpointId, Envelope, EventBatch, Message, MonitorTarget, ParameterScope,
    Report,
};
pub use models::{MonitorChannel, NeuronFactory, NeuronModel, SynapseFactory, SynapseModel};
pub use plugin::{ModelRegistry, PluginLoader};
pub use router::SpikeRouter;
pub use worker::{GroupEngine, Worker, WorkerState};

/// Runtime crate version for compatibility checking
pub const RUNTIME_VERSION: u32 = 1;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_plugins() {
        let registry = ModelRegistry::with_builtins().unwrap();
        assert!(registry.neuron_plugins().contains(&"standard"));
        assert!(registry.synapse_plugins().contains(&"weight"));
        assert_eq!(RUNTIME_VERSION, spikestream_storage::STORAGE_VERSION);
    }
}
