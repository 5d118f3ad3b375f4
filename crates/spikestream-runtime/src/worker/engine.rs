//! Loaded state of one group and the work done at each barrier close

use super::{
    barrier::{Admission, StepBarrier},
    population::{MarkSet, Population},
    reporter::Reporter,
};
use crate::{
    clock::{SimulationClock, StepContext},
    config::SimulationConfig,
    connection::{OutgoingConnections, OutgoingEdge},
    device::DeviceBridge,
    error::*,
    message::{DataKind, EndpointId, EventBatch, MonitorTarget, ParameterScope, Report},
    models::MonitorChannel,
    monitor::{MonitorSet, MonitoredUnit},
    noise::NoiseGenerator,
    notifier::FiringNotifier,
    plugin::{ModelRegistry, PluginLoader},
    router::SpikeRouter,
};
use spikestream_storage::{
    GlobalParameters, GroupId, NeuronGroupRecord, NeuronId, NoiseInjection, NoiseMode, ParameterStore, Step,
    UpdateMode, WeightTable,
};
use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Everything a worker owns once its group is loaded
#[derive(Debug)]
pub struct GroupEngine {
    population: Population,
    outgoing: OutgoingConnections,
    routers: Vec<SpikeRouter>,
    peer_starts: HashMap<GroupId, u32>,
    barrier: StepBarrier,
    clock: SimulationClock,
    notifier: FiringNotifier,
    noise: NoiseGenerator,
    monitors: MonitorSet,
    devices: Vec<DeviceBridge>,
    loader: PluginLoader,
    update_mode: UpdateMode,
    min_step: Duration,
    pending_fires: BTreeSet<usize>,
    primed: bool,
    delaying: bool,
    step_started: Instant,
}

impl GroupEngine {
    /// Load `group` from the store.
    ///
    /// Peers are the groups connected to this one in either direction; each
    /// gets a router and is expected to send one batch per step. A group
    /// connected to itself also routes to and waits for itself.
    pub fn load(
        store: &dyn ParameterStore,
        registry: Arc<ModelRegistry>,
        group: GroupId,
        config: &SimulationConfig,
    ) -> Result<Self> {
        let groups = store.neuron_groups()?;
        let own = store.neuron_group(group)?;

        let mut peers = BTreeSet::new();
        for cg in store.connection_groups()? {
            if cg.from_group == group {
                peers.insert(cg.to_group);
            }
            if cg.to_group == group {
                peers.insert(cg.from_group);
            }
        }

        let mut peer_starts = HashMap::new();
        for &peer in &peers {
            let record = groups
                .iter()
                .find(|g| g.id == peer)
                .ok_or_else(|| RuntimeError::malformed_topology(format!("unknown peer {}", peer)))?;
            peer_starts.insert(peer, record.start_neuron_id.raw());
        }

        let mut loader = PluginLoader::new(registry);
        let population = Population::load(store, &mut loader, own.clone())?;

        let router_of: BTreeMap<GroupId, usize> = peers.iter().enumerate().map(|(i, &g)| (g, i)).collect();
        let (outgoing, max_delays) = build_outgoing(store, &own, &groups, &router_of)?;
        let buffer_sizes = outgoing.max_buffer_sizes(router_of.len());
        let routers = router_of
            .iter()
            .map(|(&peer, &index)| {
                let mut router = SpikeRouter::new(group, peer, max_delays[index]);
                router.reserve(buffer_sizes[index]);
                router
            })
            .collect();

        let global = config.apply(store.global_parameters()?);
        validate_global(&global)?;
        let mut clock = SimulationClock::new(global.step_duration_ms);
        clock.set_live(global.live_clock);

        let seed = global.rng_seed.map(|seed| seed ^ (group.raw() as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15));
        let noise_parameters = store.noise_parameters(group)?;
        NoiseGenerator::validate(noise_parameters.mode)?;
        let noise = NoiseGenerator::new(noise_parameters, seed);

        let devices = store
            .devices(group)?
            .into_iter()
            .map(DeviceBridge::open)
            .collect::<Result<Vec<_>>>()?;

        log::info!(
            "Group {} loaded: {} neurons, {} incoming synapses, {} outgoing synapses, peers {:?}",
            group,
            population.neurons().len(),
            population.synapses().len(),
            outgoing.synapse_count(),
            peers
        );

        Ok(Self {
            population,
            outgoing,
            routers,
            peer_starts,
            barrier: StepBarrier::new(peers),
            clock,
            notifier: FiringNotifier::new(group),
            noise,
            monitors: MonitorSet::new(),
            devices,
            loader,
            update_mode: global.update_mode,
            min_step: Duration::from_millis(global.min_step_duration_ms),
            pending_fires: BTreeSet::new(),
            primed: false,
            delaying: false,
            step_started: Instant::now(),
        })
    }

    /// Group descriptor
    pub fn group(&self) -> &NeuronGroupRecord {
        self.population.group()
    }

    /// Current step
    pub fn step(&self) -> Step {
        self.clock.step()
    }

    /// Units of the group
    pub fn population(&self) -> &Population {
        &self.population
    }

    /// Outbound routers, one per peer
    pub fn routers(&self) -> &[SpikeRouter] {
        &self.routers
    }

    /// Groups whose batches close the barrier
    pub fn expected_senders(&self) -> &BTreeSet<GroupId> {
        self.barrier.expected()
    }

    /// Whether the worker was started or stepped at least once
    pub fn is_primed(&self) -> bool {
        self.primed
    }

    /// Current update mode
    pub fn update_mode(&self) -> UpdateMode {
        self.update_mode
    }

    /// Neurons queued to fire at the next barrier close
    pub fn pending_fires(&self) -> &BTreeSet<usize> {
        &self.pending_fires
    }

    /// Whether the barrier of the current step can close.
    ///
    /// Step 0 has no inbound batches, so it closes as soon as the worker is
    /// primed; its flush is what lets every peer close step 1.
    pub fn is_ready(&self) -> bool {
        self.primed && (self.clock.step() == 0 || self.barrier.is_complete())
    }

    /// Allow the barrier to close, starting with step 0
    pub fn prime(&mut self) {
        if self.primed {
            return;
        }
        self.primed = true;
        self.step_started = Instant::now();
        log::debug!("Group {} primed at step {}", self.population.group_id(), self.clock.step());
    }

    /// Apply or park a batch from a peer
    pub fn apply_batch(&mut self, batch: EventBatch) -> Result<()> {
        match self.barrier.admit(self.clock.step(), &batch)? {
            Admission::Apply => self.apply_events(&batch),
            Admission::Park => {
                self.barrier.park(batch);
                Ok(())
            }
        }
    }

    fn apply_events(&mut self, batch: &EventBatch) -> Result<()> {
        if batch.count == 0 {
            return Ok(());
        }
        let sender_start = self.peer_starts.get(&batch.sender).copied().ok_or_else(|| {
            RuntimeError::sync_fault(self.clock.step(), format!("no topology for sender {}", batch.sender))
        })?;
        let own_start = self.population.group().start_neuron_id.raw();
        let ctx = self.clock.context();
        for (source_rel, dest_rel) in batch.events() {
            let source = NeuronId::new(sender_start + source_rel as u32);
            let index = self
                .population
                .resolve(source, dest_rel)
                .ok_or(RuntimeError::UnresolvedSynapse {
                    from: source.raw(),
                    to: own_start + dest_rel as u32,
                })?;
            self.population.deliver(&ctx, index);
        }
        Ok(())
    }

    /// Replay parked batches after the barrier closed
    pub fn replay_early(&mut self) -> Result<()> {
        for batch in self.barrier.take_early() {
            self.apply_batch(batch)?;
        }
        Ok(())
    }

    /// Close the barrier of the current step and advance the clock.
    ///
    /// Returns the step that completed.
    pub fn close_barrier(&mut self, store: &dyn ParameterStore, reporter: &Reporter) -> Result<Step> {
        let ctx = self.clock.context();
        let step = ctx.step;

        if self.noise.enabled() {
            let picked = self.noise.select_configured(self.population.neurons().len())?;
            self.apply_noise(&ctx, picked);
        }

        let mut fired = MarkSet::with_capacity(self.population.neurons().len());
        for index in self.compute_neurons(&ctx) {
            fired.insert(index);
        }
        for index in std::mem::take(&mut self.pending_fires) {
            if fired.insert(index) {
                self.population.neurons_mut()[index].model.force_fire(&ctx);
            }
        }
        for &index in fired.members() {
            self.population.mark_fired(index, step);
        }

        let settled = self.learn(&ctx, &fired);

        let start = self.population.group().start_neuron_id.raw();
        let fired_ids: Vec<NeuronId> = fired.members().iter().map(|&i| NeuronId::new(start + i as u32)).collect();
        self.service_devices(step, &fired_ids, reporter);

        // only units computed this step are sampled
        for (target, unit) in self.monitors.iter() {
            let values = match *unit {
                MonitoredUnit::Neuron(i) => {
                    let computed =
                        self.update_mode.all_neurons() || fired.contains(i) || self.population.touched().contains(i);
                    if !computed {
                        continue;
                    }
                    self.population.neurons()[i].model.monitor_sample(&ctx)
                }
                MonitoredUnit::Synapse(i) => {
                    if !settled.contains(i) {
                        continue;
                    }
                    self.population.synapses()[i].model.monitor_sample(&ctx)
                }
            };
            reporter.send(Report::MonitorData {
                group: reporter.group(),
                target: *target,
                time_ms: ctx.time_ms,
                values,
            });
        }

        for (&index, &id) in fired.members().iter().zip(&fired_ids) {
            self.notifier.record(id);
            for holder in self.outgoing.holders_of(index) {
                self.routers[holder.router].enqueue(holder.delay, self.outgoing.entries(holder));
            }
        }
        self.notifier.flush(step, reporter.fabric());
        for router in &mut self.routers {
            router.flush(step, reporter.fabric())?;
        }

        self.population.clear_step();
        self.barrier.reset();
        self.clock.advance();
        self.pace(store, reporter);

        log::trace!("Group {} closed step {} with {} firings", reporter.group(), step, fired_ids.len());
        Ok(step)
    }

    fn compute_neurons(&mut self, ctx: &StepContext) -> Vec<usize> {
        if self.update_mode.all_neurons() {
            #[cfg(feature = "parallel")]
            let fired = self
                .population
                .neurons_mut()
                .par_iter_mut()
                .enumerate()
                .filter_map(|(i, slot)| slot.model.compute_final_state(ctx).then_some(i))
                .collect();
            #[cfg(not(feature = "parallel"))]
            let fired = self
                .population
                .neurons_mut()
                .iter_mut()
                .enumerate()
                .filter_map(|(i, slot)| slot.model.compute_final_state(ctx).then_some(i))
                .collect();
            fired
        } else {
            let touched = self.population.touched().members().to_vec();
            let neurons = self.population.neurons_mut();
            touched
                .into_iter()
                .filter(|&i| neurons[i].model.compute_final_state(ctx))
                .collect()
        }
    }

    /// Settle the synapses that spiked or whose neuron fired; returns them
    fn learn(&mut self, ctx: &StepContext, fired: &MarkSet) -> MarkSet {
        let count = self.population.synapses().len();
        let mut learners = MarkSet::with_capacity(count);
        if self.update_mode.all_synapses() {
            for index in 0..count {
                learners.insert(index);
            }
        } else {
            for &index in self.population.spiked().members() {
                learners.insert(index);
            }
            for &neuron in fired.members() {
                for &index in &self.population.neurons()[neuron].incoming {
                    learners.insert(index);
                }
            }
        }
        for &index in learners.members() {
            let post_fired = fired.contains(self.population.synapses()[index].neuron);
            self.population.settle_synapse(ctx, index, post_fired);
        }
        learners
    }

    fn service_devices(&mut self, step: Step, fired: &[NeuronId], reporter: &Reporter) {
        for device in &mut self.devices {
            if device.is_input() {
                match device.receive(self.population.group()) {
                    Ok(neurons) => {
                        for neuron in neurons {
                            if let Some(index) = self.population.local_index(neuron) {
                                self.pending_fires.insert(index);
                            }
                        }
                    }
                    Err(err) => reporter.error(&err),
                }
            } else if let Err(err) = device.send_firing(step, self.delaying, self.population.group(), fired) {
                reporter.error(&err);
            }
        }
    }

    fn pace(&mut self, store: &dyn ParameterStore, reporter: &Reporter) {
        let compute = self.step_started.elapsed();
        let mut sleep = self.min_step.saturating_sub(compute);
        for device in &mut self.devices {
            match device.pace(store, reporter.group(), compute) {
                Ok(wait) => sleep = sleep.max(wait),
                Err(err) => reporter.warning(format!("pacing for device {} failed: {}", device.id(), err)),
            }
        }
        self.delaying = self.devices.iter().any(DeviceBridge::is_delaying);
        if !sleep.is_zero() {
            thread::sleep(sleep);
        }
        self.step_started = Instant::now();
    }

    fn apply_noise(&mut self, ctx: &StepContext, picked: Vec<usize>) {
        match self.noise.injection() {
            NoiseInjection::Fire => self.pending_fires.extend(picked),
            NoiseInjection::Effect(amount) => {
                for index in picked {
                    self.population.inject(ctx, index, amount);
                }
            }
        }
    }

    /// Inject noise once; returns how many neurons were selected
    pub fn inject_noise(&mut self, mode: NoiseMode) -> Result<usize> {
        let picked = self.noise.select(mode, self.population.neurons().len())?;
        let count = picked.len();
        let ctx = self.clock.context();
        self.apply_noise(&ctx, picked);
        Ok(count)
    }

    /// Queue neurons to fire at the next barrier close.
    ///
    /// Rejects the whole list if any id lies outside the group.
    pub fn fire_neurons(&mut self, neurons: &[NeuronId]) -> Result<()> {
        let indices = neurons
            .iter()
            .map(|&id| {
                self.population.local_index(id).ok_or_else(|| {
                    RuntimeError::validation(format!("neuron {} is not in group {}", id, self.population.group_id()))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        self.pending_fires.extend(indices);
        Ok(())
    }

    /// Reload one parameter family from the store
    pub fn reload_parameters(
        &mut self,
        scope: ParameterScope,
        store: &dyn ParameterStore,
        config: &SimulationConfig,
    ) -> Result<()> {
        let group = self.population.group().clone();
        match scope {
            ParameterScope::Neuron => {
                let factory = self.loader.neuron_factory(store, group.neuron_type)?;
                factory.set_shared_parameters(&store.neuron_parameters(group.neuron_type)?.to_map())?;
                self.population.neurons_changed();
            }
            ParameterScope::Synapse => {
                let connection_groups = store.connection_groups()?;
                for &cg_id in self.population.incoming_groups().to_vec().iter() {
                    let cg = connection_groups
                        .iter()
                        .find(|cg| cg.id == cg_id)
                        .ok_or_else(|| RuntimeError::malformed_topology(format!("{} disappeared", cg_id)))?;
                    let factory = self.loader.synapse_factory(store, cg.synapse_type)?;
                    factory.set_shared_parameters(cg_id, &store.synapse_parameters(cg_id)?.to_map())?;
                    self.population.synapses_changed(cg_id);
                }
            }
            ParameterScope::Global => {
                let global = config.apply(store.global_parameters()?);
                validate_global(&global)?;
                self.clock.set_step_duration_ms(global.step_duration_ms);
                self.clock.set_live(global.live_clock);
                self.update_mode = global.update_mode;
                self.min_step = Duration::from_millis(global.min_step_duration_ms);
            }
            ParameterScope::Noise => {
                let noise_parameters = store.noise_parameters(group.id)?;
                NoiseGenerator::validate(noise_parameters.mode)?;
                self.noise.set_parameters(noise_parameters);
            }
        }
        log::info!("Group {} reloaded {:?} parameters", group.id, scope);
        Ok(())
    }

    /// Replace weights with the committed weights of the store
    pub fn reload_weights(&mut self, store: &dyn ParameterStore) -> Result<usize> {
        let records = store.load_weights(self.population.group_id())?;
        let applied = self.population.apply_weights(&records);
        if applied < records.len() {
            log::debug!(
                "Group {} ignored {} weights without a synapse",
                self.population.group_id(),
                records.len() - applied
            );
        }
        Ok(applied)
    }

    /// Persist the current weights
    pub fn save_weights(&self, store: &dyn ParameterStore, table: WeightTable) -> Result<usize> {
        let records = self.population.weight_records();
        store.save_weights(table, &records)?;
        Ok(records.len())
    }

    /// Select which units update each step
    pub fn set_update_mode(&mut self, mode: UpdateMode) {
        self.update_mode = mode;
    }

    /// Minimum wall-clock duration of a step
    pub fn set_min_step_duration(&mut self, ms: u64) {
        self.min_step = Duration::from_millis(ms);
    }

    /// Start reporting a unit; returns its channel layout
    pub fn start_monitoring(&mut self, target: MonitorTarget) -> Result<Vec<MonitorChannel>> {
        let (unit, channels) = match target {
            MonitorTarget::Neuron(id) => {
                let index = self
                    .population
                    .local_index(id)
                    .ok_or_else(|| RuntimeError::validation(format!("neuron {} is not in this group", id)))?;
                (MonitoredUnit::Neuron(index), self.population.neurons()[index].model.monitor_schema())
            }
            MonitorTarget::Synapse { from, to } => {
                let index = self
                    .population
                    .synapse_between(from, to)
                    .ok_or_else(|| RuntimeError::validation(format!("no synapse {} -> {} in this group", from, to)))?;
                (MonitoredUnit::Synapse(index), self.population.synapses()[index].model.monitor_schema())
            }
        };
        if !self.monitors.add(target, unit) {
            return Err(RuntimeError::validation(format!("{:?} is already monitored", target)));
        }
        Ok(channels)
    }

    /// Stop reporting a unit
    pub fn stop_monitoring(&mut self, target: MonitorTarget) -> Result<()> {
        if !self.monitors.remove(target) {
            return Err(RuntimeError::validation(format!("{:?} is not monitored", target)));
        }
        Ok(())
    }

    /// Add a listener
    pub fn subscribe(&mut self, endpoint: EndpointId, data: DataKind) {
        match data {
            DataKind::SpikeData => {
                for router in &mut self.routers {
                    router.add_destination(endpoint);
                }
            }
            DataKind::FiringData => self.notifier.subscribe(endpoint),
        }
    }

    /// Remove a listener; peers cannot be unsubscribed from spike data
    pub fn unsubscribe(&mut self, endpoint: EndpointId, data: DataKind) -> Result<()> {
        match data {
            DataKind::SpikeData => {
                if self.routers.iter().any(|r| r.primary() == endpoint) {
                    return Err(RuntimeError::validation(format!("{} is a peer of this group", endpoint)));
                }
                for router in &mut self.routers {
                    router.remove_destination(endpoint)?;
                }
            }
            DataKind::FiringData => self.notifier.unsubscribe(endpoint),
        }
        Ok(())
    }
}

fn validate_global(global: &GlobalParameters) -> Result<()> {
    if global.step_duration_ms.is_nan() || global.step_duration_ms <= 0.0 {
        return Err(RuntimeError::invalid_parameter(
            "step_duration_ms",
            global.step_duration_ms.to_string(),
            "> 0.0",
        ));
    }
    Ok(())
}

/// Compress every synapse leaving `own`; also returns the largest delay per router
fn build_outgoing(
    store: &dyn ParameterStore,
    own: &NeuronGroupRecord,
    groups: &[NeuronGroupRecord],
    router_of: &BTreeMap<GroupId, usize>,
) -> Result<(OutgoingConnections, Vec<u16>)> {
    let mut max_delays = vec![0u16; router_of.len()];
    let mut edges = Vec::new();
    for row in store.connections_from(own.id)? {
        let dest = groups
            .iter()
            .find(|g| g.contains(row.to))
            .ok_or_else(|| RuntimeError::malformed_topology(format!("{} belongs to no group", row.to)))?;
        let router = *router_of.get(&dest.id).ok_or_else(|| {
            RuntimeError::malformed_topology(format!("{} -> {} crosses unconnected groups", row.from, row.to))
        })?;
        max_delays[router] = max_delays[router].max(row.delay);
        edges.push(OutgoingEdge {
            source: (row.from.raw() - own.start_neuron_id.raw()) as u16,
            router,
            delay: row.delay,
            dest: (row.to.raw() - dest.start_neuron_id.raw()) as u16,
        });
    }
    let outgoing = OutgoingConnections::build(own.size() as usize, edges)?;
    Ok((outgoing, max_delays))
}
