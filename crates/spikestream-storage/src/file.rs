//! File-based storage backend
//!
//! The network is described by a JSON [`StoreImage`]. Reads are served from an
//! in-memory cache; committed weight saves rewrite the JSON file and view
//! weight saves go to a VWGT snapshot next to it.

use crate::{
    error::Result,
    ids::{ConnectionGroupId, DeviceId, GroupId, ModelTypeId},
    memory::{MemoryStore, StoreImage},
    schemas::{
        ConnectionGroupRecord, ConnectionRecord, DeviceRecord, GlobalParameters, ModelTypeRecord,
        NeuronGroupRecord, NoiseParameters, ParameterTable, WeightRecord, WeightTable,
    },
    snapshot::WeightSnapshot,
    traits::ParameterStore,
};

use parking_lot::Mutex;
use std::path::{Path, PathBuf};

/// File-based parameter store
#[derive(Debug)]
pub struct FileStore {
    /// In-memory cache
    cache: MemoryStore,
    /// JSON network description
    path: PathBuf,
    /// Serializes file writes
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Open an existing network description
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let text = std::fs::read_to_string(&path)?;
        let image: StoreImage = serde_json::from_str(&text)?;
        let cache = MemoryStore::new(image)?;
        log::info!("Opened network description {}", path.display());
        Ok(Self {
            cache,
            path,
            write_lock: Mutex::new(()),
        })
    }

    /// Write an image to `path` and open it
    pub fn create<P: AsRef<Path>>(path: P, image: StoreImage) -> Result<Self> {
        image.validate()?;
        write_image(path.as_ref(), &image)?;
        Self::open(path)
    }

    /// Path of the JSON network description
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the view weight snapshot
    pub fn view_path(&self) -> PathBuf {
        self.path.with_extension("view.vwgt")
    }

    /// Underlying cache
    pub fn cache(&self) -> &MemoryStore {
        &self.cache
    }
}

fn write_image(path: &Path, image: &StoreImage) -> Result<()> {
    let text = serde_json::to_string_pretty(image)?;
    std::fs::write(path, text)?;
    Ok(())
}

impl ParameterStore for FileStore {
    fn neuron_groups(&self) -> Result<Vec<NeuronGroupRecord>> {
        self.cache.neuron_groups()
    }

    fn model_type(&self, id: ModelTypeId) -> Result<ModelTypeRecord> {
        self.cache.model_type(id)
    }

    fn connection_groups(&self) -> Result<Vec<ConnectionGroupRecord>> {
        self.cache.connection_groups()
    }

    fn connections(&self, connection_group: ConnectionGroupId) -> Result<Vec<ConnectionRecord>> {
        self.cache.connections(connection_group)
    }

    fn neuron_parameters(&self, neuron_type: ModelTypeId) -> Result<ParameterTable> {
        self.cache.neuron_parameters(neuron_type)
    }

    fn synapse_parameters(&self, connection_group: ConnectionGroupId) -> Result<ParameterTable> {
        self.cache.synapse_parameters(connection_group)
    }

    fn global_parameters(&self) -> Result<GlobalParameters> {
        self.cache.global_parameters()
    }

    fn noise_parameters(&self, group: GroupId) -> Result<NoiseParameters> {
        self.cache.noise_parameters(group)
    }

    fn devices(&self, group: GroupId) -> Result<Vec<DeviceRecord>> {
        self.cache.devices(group)
    }

    fn save_weights(&self, table: WeightTable, weights: &[WeightRecord]) -> Result<()> {
        let _guard = self.write_lock.lock();
        self.cache.save_weights(table, weights)?;
        match table {
            WeightTable::Committed => write_image(&self.path, &self.cache.image()),
            WeightTable::View => WeightSnapshot::new(self.cache.view_weights()).save(self.view_path()),
        }
    }

    fn set_sync_delay(&self, device: DeviceId, group: GroupId, delaying: bool) -> Result<()> {
        self.cache.set_sync_delay(device, group, delaying)
    }

    fn sync_delay_active(&self, device: DeviceId, excluding: GroupId) -> Result<bool> {
        self.cache.sync_delay_active(device, excluding)
    }
}
