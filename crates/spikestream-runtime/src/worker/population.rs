//! Neurons and incoming synapses of one group

use crate::{
    clock::StepContext,
    error::*,
    models::{NeuronModel, SynapseModel},
    plugin::PluginLoader,
};
use spikestream_storage::{
    byte_to_weight, weight_to_byte, ConnectionGroupId, GroupId, NeuronGroupRecord, NeuronId, ParameterStore,
    Step, WeightRecord,
};
use std::collections::HashMap;

/// A neuron with its bookkeeping
#[derive(Debug)]
pub struct NeuronSlot {
    /// Model instance
    pub model: Box<dyn NeuronModel>,
    /// Indices of the synapses feeding the neuron
    pub incoming: Vec<usize>,
    /// Number of firings so far
    pub fire_count: u64,
    /// Step of the last firing
    pub last_fire: Option<Step>,
}

/// An incoming synapse with its bookkeeping
#[derive(Debug)]
pub struct SynapseSlot {
    /// Model instance
    pub model: Box<dyn SynapseModel>,
    /// Index of the destination neuron
    pub neuron: usize,
    /// Connection group the synapse belongs to
    pub connection_group: ConnectionGroupId,
}

/// Index set with O(1) idempotent insertion
#[derive(Debug, Clone, Default)]
pub struct MarkSet {
    members: Vec<usize>,
    marked: Vec<bool>,
}

impl MarkSet {
    /// Set over `0..capacity`
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            members: Vec::new(),
            marked: vec![false; capacity],
        }
    }

    /// Insert an index; returns `false` if it was present
    pub fn insert(&mut self, index: usize) -> bool {
        match self.marked.get_mut(index) {
            Some(mark) if !*mark => {
                *mark = true;
                self.members.push(index);
                true
            }
            _ => false,
        }
    }

    /// Whether an index is present
    pub fn contains(&self, index: usize) -> bool {
        self.marked.get(index).copied().unwrap_or(false)
    }

    /// Members in insertion order
    pub fn members(&self) -> &[usize] {
        &self.members
    }

    /// Number of members
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Remove every member
    pub fn clear(&mut self) {
        for &index in &self.members {
            self.marked[index] = false;
        }
        self.members.clear();
    }
}

/// Every unit a worker owns
#[derive(Debug)]
pub struct Population {
    group: NeuronGroupRecord,
    neurons: Vec<NeuronSlot>,
    synapses: Vec<SynapseSlot>,
    synapse_map: HashMap<NeuronId, HashMap<u16, usize>>,
    incoming_groups: Vec<ConnectionGroupId>,
    touched: MarkSet,
    spiked: MarkSet,
}

impl Population {
    /// Build the neurons of `group` and every synapse ending in it
    pub fn load(store: &dyn ParameterStore, loader: &mut PluginLoader, group: NeuronGroupRecord) -> Result<Self> {
        let size = group.size() as usize;
        if size == 0 || size > crate::connection::MAX_GROUP_NEURONS {
            return Err(RuntimeError::malformed_topology(format!(
                "group {} has {} neurons",
                group.id, size
            )));
        }

        let factory = loader.neuron_factory(store, group.neuron_type)?;
        factory.set_shared_parameters(&store.neuron_parameters(group.neuron_type)?.to_map())?;
        let start = group.start_neuron_id.raw();
        let neurons: Vec<NeuronSlot> = (0..size as u32)
            .map(|offset| NeuronSlot {
                model: factory.create(NeuronId::new(start + offset)),
                incoming: Vec::new(),
                fire_count: 0,
                last_fire: None,
            })
            .collect();

        let mut population = Self {
            touched: MarkSet::with_capacity(size),
            spiked: MarkSet::default(),
            group,
            neurons,
            synapses: Vec::new(),
            synapse_map: HashMap::new(),
            incoming_groups: Vec::new(),
        };

        let incoming: Vec<_> = store
            .connection_groups()?
            .into_iter()
            .filter(|cg| cg.to_group == population.group.id)
            .collect();
        for cg in incoming {
            let factory = loader.synapse_factory(store, cg.synapse_type)?;
            factory.set_shared_parameters(cg.id, &store.synapse_parameters(cg.id)?.to_map())?;
            for row in store.connections(cg.id)? {
                let model = factory.create(cg.id, row.from, row.to, byte_to_weight(row.weight))?;
                population.insert_synapse(model, cg.id)?;
            }
            population.incoming_groups.push(cg.id);
        }
        population.spiked = MarkSet::with_capacity(population.synapses.len());

        log::debug!(
            "Group {} built {} neurons and {} synapses",
            population.group.id,
            population.neurons.len(),
            population.synapses.len()
        );
        Ok(population)
    }

    fn insert_synapse(&mut self, model: Box<dyn SynapseModel>, connection_group: ConnectionGroupId) -> Result<()> {
        let (from, to) = (model.from(), model.to());
        let neuron = self.local_index(to).ok_or_else(|| {
            RuntimeError::malformed_topology(format!("synapse {} -> {} ends outside group {}", from, to, self.group.id))
        })?;
        let index = self.synapses.len();
        if self.synapse_map.entry(from).or_default().insert(neuron as u16, index).is_some() {
            return Err(RuntimeError::malformed_topology(format!("duplicate synapse {} -> {}", from, to)));
        }
        self.neurons[neuron].incoming.push(index);
        self.synapses.push(SynapseSlot {
            model,
            neuron,
            connection_group,
        });
        Ok(())
    }

    /// Group descriptor
    pub fn group(&self) -> &NeuronGroupRecord {
        &self.group
    }

    /// Group id
    pub fn group_id(&self) -> GroupId {
        self.group.id
    }

    /// Local index of a neuron of this group
    pub fn local_index(&self, neuron: NeuronId) -> Option<usize> {
        self.group
            .contains(neuron)
            .then(|| (neuron.raw() - self.group.start_neuron_id.raw()) as usize)
    }

    /// Index of the synapse from global `source` to the neuron at `dest_rel`
    pub fn resolve(&self, source: NeuronId, dest_rel: u16) -> Option<usize> {
        self.synapse_map.get(&source)?.get(&dest_rel).copied()
    }

    /// Index of the synapse `from -> to`
    pub fn synapse_between(&self, from: NeuronId, to: NeuronId) -> Option<usize> {
        let dest = self.local_index(to)?;
        self.resolve(from, dest as u16)
    }

    /// Neurons
    pub fn neurons(&self) -> &[NeuronSlot] {
        &self.neurons
    }

    /// Neurons, mutably
    pub fn neurons_mut(&mut self) -> &mut [NeuronSlot] {
        &mut self.neurons
    }

    /// Synapses
    pub fn synapses(&self) -> &[SynapseSlot] {
        &self.synapses
    }

    /// Connection groups ending in this group
    pub fn incoming_groups(&self) -> &[ConnectionGroupId] {
        &self.incoming_groups
    }

    /// Deliver one event to synapse `index` and its neuron
    pub fn deliver(&mut self, ctx: &StepContext, index: usize) {
        let synapse = &mut self.synapses[index];
        let neuron = &mut self.neurons[synapse.neuron];
        synapse.model.on_spike(ctx, neuron.model.as_mut(), neuron.last_fire);
        self.touched.insert(synapse.neuron);
        self.spiked.insert(index);
    }

    /// Give neuron `index` an effect outside any synapse
    pub fn inject(&mut self, ctx: &StepContext, index: usize, amount: f64) {
        self.neurons[index].model.receive_effect(ctx, amount, None);
        self.touched.insert(index);
    }

    /// Neurons that received input this step
    pub fn touched(&self) -> &MarkSet {
        &self.touched
    }

    /// Synapses that carried a spike this step
    pub fn spiked(&self) -> &MarkSet {
        &self.spiked
    }

    /// Record a firing of neuron `index`
    pub fn mark_fired(&mut self, index: usize, step: Step) {
        let slot = &mut self.neurons[index];
        slot.fire_count += 1;
        slot.last_fire = Some(step);
    }

    /// Run the end-of-step update of synapse `index`
    pub fn settle_synapse(&mut self, ctx: &StepContext, index: usize, post_fired: bool) {
        self.synapses[index].model.compute_final_state(ctx, post_fired);
    }

    /// Forget this step's touched and spiked units
    pub fn clear_step(&mut self) {
        self.touched.clear();
        self.spiked.clear();
    }

    /// Notify every neuron that its shared parameters changed
    pub fn neurons_changed(&mut self) {
        for slot in &mut self.neurons {
            slot.model.model_changed();
        }
    }

    /// Notify the synapses of one connection group that their parameters changed
    pub fn synapses_changed(&mut self, connection_group: ConnectionGroupId) {
        for slot in self.synapses.iter_mut().filter(|s| s.connection_group == connection_group) {
            slot.model.model_changed();
        }
    }

    /// Persisted form of every synapse weight
    pub fn weight_records(&self) -> Vec<WeightRecord> {
        self.synapses
            .iter()
            .map(|slot| WeightRecord {
                from: slot.model.from(),
                to: slot.model.to(),
                weight: weight_to_byte(slot.model.weight()),
            })
            .collect()
    }

    /// Replace weights from persisted records; returns how many matched
    pub fn apply_weights(&mut self, records: &[WeightRecord]) -> usize {
        let mut applied = 0;
        for record in records {
            if let Some(index) = self.synapse_between(record.from, record.to) {
                self.synapses[index].model.set_weight(byte_to_weight(record.weight));
                applied += 1;
            }
        }
        applied
    }
}
