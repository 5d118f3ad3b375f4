//! Core trait definitions for the storage layer

use crate::{
    error::{Result, StorageError},
    ids::{ConnectionGroupId, DeviceId, GroupId, ModelTypeId},
    schemas::{
        ConnectionGroupRecord, ConnectionRecord, DeviceRecord, GlobalParameters, ModelTypeRecord,
        NeuronGroupRecord, NoiseParameters, ParameterTable, WeightRecord, WeightTable,
    },
};

/// Source of topology and parameters, sink for weights and pacing flags.
///
/// Implementations are shared between all workers of a process, so every
/// method takes `&self` and implementations synchronize internally.
pub trait ParameterStore: Send + Sync {
    /// All neuron groups of the network
    fn neuron_groups(&self) -> Result<Vec<NeuronGroupRecord>>;

    /// A single neuron group
    fn neuron_group(&self, id: GroupId) -> Result<NeuronGroupRecord> {
        self.neuron_groups()?
            .into_iter()
            .find(|g| g.id == id)
            .ok_or(StorageError::GroupNotFound { group: id.raw() })
    }

    /// Model type record (plugin name and description)
    fn model_type(&self, id: ModelTypeId) -> Result<ModelTypeRecord>;

    /// All connection groups of the network
    fn connection_groups(&self) -> Result<Vec<ConnectionGroupRecord>>;

    /// Connection rows belonging to one connection group
    fn connections(&self, connection_group: ConnectionGroupId) -> Result<Vec<ConnectionRecord>>;

    /// Connection rows whose source neuron belongs to `group`
    fn connections_from(&self, group: GroupId) -> Result<Vec<ConnectionRecord>> {
        let mut rows = Vec::new();
        for cg in self.connection_groups()?.iter().filter(|cg| cg.from_group == group) {
            rows.extend(self.connections(cg.id)?);
        }
        Ok(rows)
    }

    /// Connection rows whose destination neuron belongs to `group`
    fn connections_to(&self, group: GroupId) -> Result<Vec<ConnectionRecord>> {
        let mut rows = Vec::new();
        for cg in self.connection_groups()?.iter().filter(|cg| cg.to_group == group) {
            rows.extend(self.connections(cg.id)?);
        }
        Ok(rows)
    }

    /// Parameter table of a neuron type
    fn neuron_parameters(&self, neuron_type: ModelTypeId) -> Result<ParameterTable>;

    /// Parameter table of a connection group
    fn synapse_parameters(&self, connection_group: ConnectionGroupId) -> Result<ParameterTable>;

    /// Simulation-wide parameters
    fn global_parameters(&self) -> Result<GlobalParameters>;

    /// Noise configuration of a group
    fn noise_parameters(&self, group: GroupId) -> Result<NoiseParameters>;

    /// Devices attached to a group
    fn devices(&self, group: GroupId) -> Result<Vec<DeviceRecord>>;

    /// Persist weights into the committed or view table
    fn save_weights(&self, table: WeightTable, weights: &[WeightRecord]) -> Result<()>;

    /// Committed weights of every synapse whose destination belongs to `group`
    fn load_weights(&self, group: GroupId) -> Result<Vec<WeightRecord>> {
        Ok(self
            .connections_to(group)?
            .into_iter()
            .map(|c| WeightRecord { from: c.from, to: c.to, weight: c.weight })
            .collect())
    }

    /// Record whether `group` is currently delaying to match `device`
    fn set_sync_delay(&self, device: DeviceId, group: GroupId, delaying: bool) -> Result<()>;

    /// Whether any group other than `excluding` is delaying for `device`
    fn sync_delay_active(&self, device: DeviceId, excluding: GroupId) -> Result<bool>;
}
