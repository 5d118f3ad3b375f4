//! In-memory storage backend

use crate::{
    error::{Result, StorageError},
    ids::{ConnectionGroupId, DeviceId, GroupId, ModelTypeId},
    schemas::{
        weight_to_byte, ConnectionGroupRecord, ConnectionRecord, DeviceRecord, GlobalParameters,
        ModelKind, ModelTypeRecord, NeuronGroupRecord, NoiseParameters, ParameterTable,
        WeightRecord, WeightTable,
    },
    traits::ParameterStore,
    NeuronId,
};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Largest group a worker can address with 16-bit relative neuron ids
pub const MAX_GROUP_SIZE: u32 = 1 << 16;

/// Complete contents of a store, as loaded from or saved to disk
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreImage {
    /// Neuron groups
    pub groups: Vec<NeuronGroupRecord>,
    /// Neuron and synapse model types
    pub model_types: Vec<ModelTypeRecord>,
    /// Connection groups
    pub connection_groups: Vec<ConnectionGroupRecord>,
    /// Connection rows
    pub connections: Vec<ConnectionRecord>,
    /// Parameter tables keyed by neuron type
    pub neuron_parameters: BTreeMap<ModelTypeId, ParameterTable>,
    /// Parameter tables keyed by connection group
    pub synapse_parameters: BTreeMap<ConnectionGroupId, ParameterTable>,
    /// Simulation-wide parameters
    pub global: GlobalParameters,
    /// Noise configuration keyed by group
    pub noise: BTreeMap<GroupId, NoiseParameters>,
    /// External devices
    pub devices: Vec<DeviceRecord>,
}

impl StoreImage {
    /// Create an empty image
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a neuron group
    pub fn group(mut self, id: u32, start: u32, width: u32, length: u32, neuron_type: u32) -> Self {
        self.groups.push(NeuronGroupRecord {
            id: GroupId::new(id),
            name: format!("group{}", id),
            start_neuron_id: NeuronId::new(start),
            width,
            length,
            neuron_type: ModelTypeId::new(neuron_type),
        });
        self
    }

    /// Add a neuron model type with its parameter table
    pub fn neuron_type(mut self, id: u32, plugin: &str, parameters: ParameterTable) -> Self {
        self.model_types.push(ModelTypeRecord {
            id: ModelTypeId::new(id),
            kind: ModelKind::Neuron,
            description: format!("{} neuron", plugin),
            plugin: plugin.to_string(),
        });
        self.neuron_parameters.insert(ModelTypeId::new(id), parameters);
        self
    }

    /// Add a synapse model type
    pub fn synapse_type(mut self, id: u32, plugin: &str) -> Self {
        self.model_types.push(ModelTypeRecord {
            id: ModelTypeId::new(id),
            kind: ModelKind::Synapse,
            description: format!("{} synapse", plugin),
            plugin: plugin.to_string(),
        });
        self
    }

    /// Add a connection group with its parameter table
    pub fn connection_group(
        mut self,
        id: u32,
        from_group: u32,
        to_group: u32,
        synapse_type: u32,
        parameters: ParameterTable,
    ) -> Self {
        self.connection_groups.push(ConnectionGroupRecord {
            id: ConnectionGroupId::new(id),
            from_group: GroupId::new(from_group),
            to_group: GroupId::new(to_group),
            synapse_type: ModelTypeId::new(synapse_type),
        });
        self.synapse_parameters.insert(ConnectionGroupId::new(id), parameters);
        self
    }

    /// Add a connection row
    pub fn connect(mut self, connection_group: u32, from: u32, to: u32, weight: f64, delay: u16) -> Self {
        self.connections.push(ConnectionRecord {
            from: NeuronId::new(from),
            to: NeuronId::new(to),
            weight: weight_to_byte(weight),
            delay,
            connection_group: ConnectionGroupId::new(connection_group),
        });
        self
    }

    /// Set the noise configuration of a group
    pub fn noise(mut self, group: u32, noise: NoiseParameters) -> Self {
        self.noise.insert(GroupId::new(group), noise);
        self
    }

    /// Attach a device
    pub fn device(mut self, device: DeviceRecord) -> Self {
        self.devices.push(device);
        self
    }

    /// Replace the global parameters
    pub fn global(mut self, global: GlobalParameters) -> Self {
        self.global = global;
        self
    }

    /// Check that the rows describe a consistent network
    pub fn validate(&self) -> Result<()> {
        let mut group_ids = HashSet::new();
        for group in &self.groups {
            if !group_ids.insert(group.id) {
                return Err(StorageError::invalid_topology(format!("duplicate group {}", group.id)));
            }
            if group.size() == 0 || group.size() > MAX_GROUP_SIZE {
                return Err(StorageError::invalid_topology(format!(
                    "group {} has {} neurons (expected 1..={})",
                    group.id,
                    group.size(),
                    MAX_GROUP_SIZE
                )));
            }
            self.require_type(group.neuron_type, ModelKind::Neuron)?;
        }

        let mut ranges: Vec<(u32, u32, GroupId)> = self
            .groups
            .iter()
            .map(|g| (g.start_neuron_id.raw(), g.start_neuron_id.raw() + g.size(), g.id))
            .collect();
        ranges.sort_unstable();
        for pair in ranges.windows(2) {
            if pair[1].0 < pair[0].1 {
                return Err(StorageError::invalid_topology(format!(
                    "groups {} and {} overlap",
                    pair[0].2, pair[1].2
                )));
            }
        }

        let mut cg_index = BTreeMap::new();
        for cg in &self.connection_groups {
            if cg_index.insert(cg.id, cg).is_some() {
                return Err(StorageError::invalid_topology(format!(
                    "duplicate connection group {}",
                    cg.id
                )));
            }
            for group in [cg.from_group, cg.to_group] {
                if !group_ids.contains(&group) {
                    return Err(StorageError::GroupNotFound { group: group.raw() });
                }
            }
            self.require_type(cg.synapse_type, ModelKind::Synapse)?;
        }

        let mut pairs = HashSet::new();
        for row in &self.connections {
            let cg = cg_index.get(&row.connection_group).ok_or_else(|| {
                StorageError::invalid_topology(format!(
                    "connection {} -> {} references unknown {}",
                    row.from, row.to, row.connection_group
                ))
            })?;
            let from_ok = self.find_group(cg.from_group).map_or(false, |g| g.contains(row.from));
            let to_ok = self.find_group(cg.to_group).map_or(false, |g| g.contains(row.to));
            if !from_ok || !to_ok {
                return Err(StorageError::invalid_topology(format!(
                    "connection {} -> {} lies outside {}",
                    row.from, row.to, cg.id
                )));
            }
            if !pairs.insert((row.from, row.to)) {
                return Err(StorageError::invalid_topology(format!(
                    "duplicate connection {} -> {}",
                    row.from, row.to
                )));
            }
        }

        Ok(())
    }

    fn find_group(&self, id: GroupId) -> Option<&NeuronGroupRecord> {
        self.groups.iter().find(|g| g.id == id)
    }

    fn require_type(&self, id: ModelTypeId, kind: ModelKind) -> Result<()> {
        match self.model_types.iter().find(|t| t.id == id) {
            Some(t) if t.kind == kind => Ok(()),
            Some(t) => Err(StorageError::invalid_topology(format!(
                "type {} is a {:?} type, expected {:?}",
                id, t.kind, kind
            ))),
            None => Err(StorageError::ModelTypeNotFound { type_id: id.raw() }),
        }
    }
}

/// In-memory parameter store shared by all workers of a process
#[derive(Debug, Default)]
pub struct MemoryStore {
    image: RwLock<StoreImage>,
    view_weights: Mutex<BTreeMap<(NeuronId, NeuronId), i8>>,
    sync_delays: Mutex<BTreeMap<(DeviceId, GroupId), bool>>,
}

impl MemoryStore {
    /// Create a store from a validated image
    pub fn new(image: StoreImage) -> Result<Self> {
        image.validate()?;
        Ok(Self {
            image: RwLock::new(image),
            view_weights: Mutex::new(BTreeMap::new()),
            sync_delays: Mutex::new(BTreeMap::new()),
        })
    }

    /// Copy of the current image (committed weights included)
    pub fn image(&self) -> StoreImage {
        self.image.read().clone()
    }

    /// Apply a mutation to the image, e.g. to edit parameters before a reload
    pub fn update<F: FnOnce(&mut StoreImage)>(&self, f: F) -> Result<()> {
        let mut image = self.image.write();
        let mut edited = image.clone();
        f(&mut edited);
        edited.validate()?;
        *image = edited;
        Ok(())
    }

    /// Weights last written to the view table
    pub fn view_weights(&self) -> Vec<WeightRecord> {
        self.view_weights
            .lock()
            .iter()
            .map(|(&(from, to), &weight)| WeightRecord { from, to, weight })
            .collect()
    }
}

impl ParameterStore for MemoryStore {
    fn neuron_groups(&self) -> Result<Vec<NeuronGroupRecord>> {
        Ok(self.image.read().groups.clone())
    }

    fn model_type(&self, id: ModelTypeId) -> Result<ModelTypeRecord> {
        self.image
            .read()
            .model_types
            .iter()
            .find(|t| t.id == id)
            .cloned()
            .ok_or(StorageError::ModelTypeNotFound { type_id: id.raw() })
    }

    fn connection_groups(&self) -> Result<Vec<ConnectionGroupRecord>> {
        Ok(self.image.read().connection_groups.clone())
    }

    fn connections(&self, connection_group: ConnectionGroupId) -> Result<Vec<ConnectionRecord>> {
        Ok(self
            .image
            .read()
            .connections
            .iter()
            .filter(|c| c.connection_group == connection_group)
            .copied()
            .collect())
    }

    fn neuron_parameters(&self, neuron_type: ModelTypeId) -> Result<ParameterTable> {
        self.image
            .read()
            .neuron_parameters
            .get(&neuron_type)
            .cloned()
            .ok_or_else(|| StorageError::parameter_table_not_found(format!("neuron type {}", neuron_type)))
    }

    fn synapse_parameters(&self, connection_group: ConnectionGroupId) -> Result<ParameterTable> {
        self.image
            .read()
            .synapse_parameters
            .get(&connection_group)
            .cloned()
            .ok_or_else(|| {
                StorageError::parameter_table_not_found(format!("connection group {}", connection_group))
            })
    }

    fn global_parameters(&self) -> Result<GlobalParameters> {
        Ok(self.image.read().global.clone())
    }

    fn noise_parameters(&self, group: GroupId) -> Result<NoiseParameters> {
        Ok(self.image.read().noise.get(&group).copied().unwrap_or_default())
    }

    fn devices(&self, group: GroupId) -> Result<Vec<DeviceRecord>> {
        Ok(self
            .image
            .read()
            .devices
            .iter()
            .filter(|d| d.group == group)
            .cloned()
            .collect())
    }

    fn save_weights(&self, table: WeightTable, weights: &[WeightRecord]) -> Result<()> {
        match table {
            WeightTable::Committed => {
                let mut image = self.image.write();
                let updates: BTreeMap<(NeuronId, NeuronId), i8> =
                    weights.iter().map(|w| ((w.from, w.to), w.weight)).collect();
                let mut applied = 0usize;
                for row in image.connections.iter_mut() {
                    if let Some(&weight) = updates.get(&(row.from, row.to)) {
                        row.weight = weight;
                        applied += 1;
                    }
                }
                if applied != updates.len() {
                    log::warn!(
                        "{} of {} saved weights have no matching connection row",
                        updates.len() - applied,
                        updates.len()
                    );
                }
            }
            WeightTable::View => {
                let mut view = self.view_weights.lock();
                for w in weights {
                    view.insert((w.from, w.to), w.weight);
                }
            }
        }
        log::debug!("Saved {} weights to {:?} table", weights.len(), table);
        Ok(())
    }

    fn set_sync_delay(&self, device: DeviceId, group: GroupId, delaying: bool) -> Result<()> {
        self.sync_delays.lock().insert((device, group), delaying);
        Ok(())
    }

    fn sync_delay_active(&self, device: DeviceId, excluding: GroupId) -> Result<bool> {
        Ok(self
            .sync_delays
            .lock()
            .iter()
            .any(|(&(d, g), &delaying)| d == device && g != excluding && delaying))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_group_image() -> StoreImage {
        StoreImage::new()
            .neuron_type(1, "standard", ParameterTable::new().with("threshold_val", 0.5))
            .synapse_type(2, "weight")
            .group(1, 11, 1, 1, 1)
            .group(2, 21, 1, 1, 1)
            .connection_group(1, 1, 2, 2, ParameterTable::new())
            .connect(1, 11, 21, 1.0, 0)
    }

    #[test]
    fn test_memory_store_queries() {
        let store = MemoryStore::new(two_group_image()).unwrap();
        assert_eq!(store.neuron_groups().unwrap().len(), 2);
        assert_eq!(store.neuron_group(GroupId::new(2)).unwrap().start_neuron_id, NeuronId::new(21));
        assert!(matches!(
            store.neuron_group(GroupId::new(9)),
            Err(StorageError::GroupNotFound { group: 9 })
        ));
        assert_eq!(store.connections_from(GroupId::new(1)).unwrap().len(), 1);
        assert_eq!(store.connections_to(GroupId::new(1)).unwrap().len(), 0);
        assert_eq!(store.connections_to(GroupId::new(2)).unwrap()[0].weight, 127);
        assert_eq!(store.model_type(ModelTypeId::new(2)).unwrap().plugin, "weight");
        assert!(store.neuron_parameters(ModelTypeId::new(1)).unwrap().to_map().contains("threshold"));
    }

    #[test]
    fn test_overlapping_groups_rejected() {
        let image = two_group_image().group(3, 10, 2, 1, 1);
        assert!(matches!(image.validate(), Err(StorageError::InvalidTopology { .. })));
    }

    #[test]
    fn test_oversized_group_rejected() {
        let image = StoreImage::new()
            .neuron_type(1, "standard", ParameterTable::new())
            .group(1, 0, 300, 300, 1);
        assert!(matches!(image.validate(), Err(StorageError::InvalidTopology { .. })));
    }

    #[test]
    fn test_connection_outside_group_rejected() {
        let image = two_group_image().connect(1, 21, 11, 0.5, 0);
        assert!(image.validate().is_err());
    }

    #[test]
    fn test_committed_and_view_weights() {
        let store = MemoryStore::new(two_group_image()).unwrap();
        let record = WeightRecord { from: NeuronId::new(11), to: NeuronId::new(21), weight: 40 };

        store.save_weights(WeightTable::View, &[record]).unwrap();
        assert_eq!(store.view_weights(), vec![record]);
        assert_eq!(store.load_weights(GroupId::new(2)).unwrap()[0].weight, 127);

        store.save_weights(WeightTable::Committed, &[record]).unwrap();
        assert_eq!(store.load_weights(GroupId::new(2)).unwrap()[0].weight, 40);
    }

    #[test]
    fn test_sync_delay_flags() {
        let store = MemoryStore::new(two_group_image()).unwrap();
        let device = DeviceId::new(1);
        assert!(!store.sync_delay_active(device, GroupId::new(1)).unwrap());

        store.set_sync_delay(device, GroupId::new(2), true).unwrap();
        assert!(store.sync_delay_active(device, GroupId::new(1)).unwrap());
        assert!(!store.sync_delay_active(device, GroupId::new(2)).unwrap());

        store.set_sync_delay(device, GroupId::new(2), false).unwrap();
        assert!(!store.sync_delay_active(device, GroupId::new(1)).unwrap());
    }

    #[test]
    fn test_update_revalidates() {
        let store = MemoryStore::new(two_group_image()).unwrap();
        let result = store.update(|image| {
            image.connections.push(image.connections[0]);
        });
        assert!(result.is_err());
        assert_eq!(store.image().connections.len(), 1);
    }
}
