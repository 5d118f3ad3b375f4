//! Model registry and per-worker plugin loader

use crate::{
    error::*,
    models::{
        izhikevich, standard, static_synapse, stdp, IzhikevichFactory, NeuronFactory,
        StandardFactory, StaticSynapseFactory, StdpFactory, SynapseFactory,
    },
};
use spikestream_storage::{ModelKind, ModelTypeId, ModelTypeRecord, ParameterStore, StorageError};
use std::{collections::HashMap, fmt};

/// Constructor of a neuron factory
pub type NeuronConstructor = fn() -> Box<dyn NeuronFactory>;

/// Constructor of a synapse factory
pub type SynapseConstructor = fn() -> Box<dyn SynapseFactory>;

/// Process-wide table of model plugins, keyed by plugin name
#[derive(Default, Clone)]
pub struct ModelRegistry {
    neurons: HashMap<String, NeuronConstructor>,
    synapses: HashMap<String, SynapseConstructor>,
}

impl fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("neurons", &self.neuron_plugins())
            .field("synapses", &self.synapse_plugins())
            .finish()
    }
}

impl ModelRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding the built-in plugins
    pub fn with_builtins() -> Result<Self> {
        let mut registry = Self::new();
        registry.register_neuron(standard::PLUGIN, || Box::new(StandardFactory::new()))?;
        registry.register_neuron(izhikevich::PLUGIN, || Box::new(IzhikevichFactory::new()))?;
        registry.register_synapse(static_synapse::PLUGIN, || Box::new(StaticSynapseFactory::new()))?;
        registry.register_synapse(stdp::PLUGIN, || Box::new(StdpFactory::new()))?;
        Ok(registry)
    }

    /// Register a neuron plugin
    pub fn register_neuron(&mut self, name: &str, constructor: NeuronConstructor) -> Result<()> {
        if self.neurons.contains_key(name) || self.synapses.contains_key(name) {
            return Err(RuntimeError::DuplicateModel { name: name.to_string() });
        }
        self.neurons.insert(name.to_string(), constructor);
        Ok(())
    }

    /// Register a synapse plugin
    pub fn register_synapse(&mut self, name: &str, constructor: SynapseConstructor) -> Result<()> {
        if self.neurons.contains_key(name) || self.synapses.contains_key(name) {
            return Err(RuntimeError::DuplicateModel { name: name.to_string() });
        }
        self.synapses.insert(name.to_string(), constructor);
        Ok(())
    }

    /// Registered neuron plugin names, sorted
    pub fn neuron_plugins(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.neurons.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Registered synapse plugin names, sorted
    pub fn synapse_plugins(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.synapses.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    fn neuron_constructor(&self, name: &str) -> Option<NeuronConstructor> {
        self.neurons.get(name).copied()
    }

    fn synapse_constructor(&self, name: &str) -> Option<SynapseConstructor> {
        self.synapses.get(name).copied()
    }
}

/// Resolves model types to factories and caches them for one worker
#[derive(Debug)]
pub struct PluginLoader {
    registry: std::sync::Arc<ModelRegistry>,
    neurons: HashMap<ModelTypeId, Box<dyn NeuronFactory>>,
    synapses: HashMap<ModelTypeId, Box<dyn SynapseFactory>>,
}

impl PluginLoader {
    /// Create a loader backed by a registry
    pub fn new(registry: std::sync::Arc<ModelRegistry>) -> Self {
        Self {
            registry,
            neurons: HashMap::new(),
            synapses: HashMap::new(),
        }
    }

    /// Neuron factory for a model type, resolving it on first use
    pub fn neuron_factory(
        &mut self,
        store: &dyn ParameterStore,
        type_id: ModelTypeId,
    ) -> Result<&mut dyn NeuronFactory> {
        if !self.neurons.contains_key(&type_id) {
            let record = lookup(store, type_id, ModelKind::Neuron)?;
            let constructor = self.registry.neuron_constructor(&record.plugin).ok_or_else(|| {
                RuntimeError::model_not_found(type_id.raw(), format!("no neuron plugin '{}'", record.plugin))
            })?;
            log::debug!("Resolved neuron type {} to plugin '{}'", type_id, record.plugin);
            self.neurons.insert(type_id, constructor());
        }
        self.neurons
            .get_mut(&type_id)
            .map(|factory| factory.as_mut() as &mut dyn NeuronFactory)
            .ok_or_else(|| RuntimeError::model_not_found(type_id.raw(), "factory cache miss"))
    }

    /// Synapse factory for a model type, resolving it on first use
    pub fn synapse_factory(
        &mut self,
        store: &dyn ParameterStore,
        type_id: ModelTypeId,
    ) -> Result<&mut dyn SynapseFactory> {
        if !self.synapses.contains_key(&type_id) {
            let record = lookup(store, type_id, ModelKind::Synapse)?;
            let constructor = self.registry.synapse_constructor(&record.plugin).ok_or_else(|| {
                RuntimeError::model_not_found(type_id.raw(), format!("no synapse plugin '{}'", record.plugin))
            })?;
            log::debug!("Resolved synapse type {} to plugin '{}'", type_id, record.plugin);
            self.synapses.insert(type_id, constructor());
        }
        self.synapses
            .get_mut(&type_id)
            .map(|factory| factory.as_mut() as &mut dyn SynapseFactory)
            .ok_or_else(|| RuntimeError::model_not_found(type_id.raw(), "factory cache miss"))
    }

    /// Number of cached factories
    pub fn cached(&self) -> usize {
        self.neurons.len() + self.synapses.len()
    }
}

fn lookup(store: &dyn ParameterStore, type_id: ModelTypeId, kind: ModelKind) -> Result<ModelTypeRecord> {
    let record = match store.model_type(type_id) {
        Ok(record) => record,
        Err(StorageError::ModelTypeNotFound { .. }) => {
            return Err(RuntimeError::model_not_found(type_id.raw(), "no type record"))
        }
        Err(other) => return Err(other.into()),
    };
    if record.kind != kind {
        return Err(RuntimeError::model_not_found(
            type_id.raw(),
            format!("type is a {:?} model, expected {:?}", record.kind, kind),
        ));
    }
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use spikestream_storage::{MemoryStore, NeuronId, ParameterMap, ParameterTable, StoreImage};
    use std::sync::Arc;

    fn store(plugin: &str) -> MemoryStore {
        MemoryStore::new(
            StoreImage::new()
                .neuron_type(1, plugin, ParameterTable::new())
                .synapse_type(2, "weight")
                .group(1, 0, 2, 2, 1),
        )
        .unwrap()
    }

    #[test]
    fn test_builtins_registered() {
        let registry = ModelRegistry::with_builtins().unwrap();
        assert_eq!(registry.neuron_plugins(), vec!["izhikevich", "standard"]);
        assert_eq!(registry.synapse_plugins(), vec!["stdp", "weight"]);
    }

    #[test]
    fn test_duplicate_registration() {
        let mut registry = ModelRegistry::with_builtins().unwrap();
        let result = registry.register_neuron("standard", || Box::new(StandardFactory::new()));
        assert!(matches!(result, Err(RuntimeError::DuplicateModel { .. })));
    }

    #[test]
    fn test_loader_resolves_and_caches() {
        let store = store("standard");
        let mut loader = PluginLoader::new(Arc::new(ModelRegistry::with_builtins().unwrap()));

        let factory = loader.neuron_factory(&store, ModelTypeId::new(1)).unwrap();
        assert_eq!(factory.plugin(), "standard");
        factory
            .set_shared_parameters(&ParameterMap::from_pairs([
                ("threshold", 1.0),
                ("decay_rate", 0.0),
                ("refractory_period", 0.0),
            ]))
            .unwrap();
        let neuron = factory.create(NeuronId::new(0));
        assert_eq!(neuron.id(), NeuronId::new(0));

        loader.neuron_factory(&store, ModelTypeId::new(1)).unwrap();
        loader.synapse_factory(&store, ModelTypeId::new(2)).unwrap();
        assert_eq!(loader.cached(), 2);
    }

    #[test]
    fn test_missing_plugin_and_record() {
        let store = store("hodgkin-huxley");
        let mut loader = PluginLoader::new(Arc::new(ModelRegistry::with_builtins().unwrap()));
        let err = loader.neuron_factory(&store, ModelTypeId::new(1)).unwrap_err();
        assert!(matches!(err, RuntimeError::ModelNotFound { type_id: 1, .. }));

        let err = loader.neuron_factory(&store, ModelTypeId::new(9)).unwrap_err();
        assert!(matches!(err, RuntimeError::ModelNotFound { type_id: 9, .. }));

        // synapse type requested as a neuron
        let err = loader.neuron_factory(&store, ModelTypeId::new(2)).unwrap_err();
        assert!(matches!(err, RuntimeError::ModelNotFound { type_id: 2, .. }));
    }
}
