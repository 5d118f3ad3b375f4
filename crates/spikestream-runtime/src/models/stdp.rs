//! Spike-timing dependent plasticity synapse (`stdp` plugin)

use super::{check_range, required, MonitorChannel, NeuronModel, SynapseFactory, SynapseModel};
use crate::{clock::StepContext, error::*};
use parking_lot::RwLock;
use spikestream_storage::{ConnectionGroupId, NeuronId, ParameterMap, Step};
use std::{collections::HashMap, sync::Arc};

/// Plugin name
pub const PLUGIN: &str = "stdp";

/// Learning parameters shared by the synapses of a connection group
#[derive(Debug, Clone, PartialEq)]
pub struct StdpParams {
    /// Weight change for a perfectly timed pair
    pub learning_rate: f64,
    /// Decay constant of the timing window (steps)
    pub time_constant: f64,
    /// Lower weight bound
    pub min_weight: f64,
    /// Upper weight bound
    pub max_weight: f64,
}

impl Default for StdpParams {
    fn default() -> Self {
        Self {
            learning_rate: 0.01,
            time_constant: 20.0,
            min_weight: 0.0,
            max_weight: 1.0,
        }
    }
}

impl StdpParams {
    /// Build from a parameter map
    pub fn from_map(params: &ParameterMap) -> Result<Self> {
        let parsed = Self {
            learning_rate: required(params, PLUGIN, "learning_rate")?,
            time_constant: required(params, PLUGIN, "time_constant")?,
            min_weight: required(params, PLUGIN, "min_weight")?,
            max_weight: required(params, PLUGIN, "max_weight")?,
        };
        parsed.validate()?;
        Ok(parsed)
    }

    /// Check bounds and rates
    pub fn validate(&self) -> Result<()> {
        check_range("learning_rate", self.learning_rate, 0.0, 1.0)?;
        if self.time_constant <= 0.0 || self.time_constant.is_nan() {
            return Err(RuntimeError::invalid_parameter(
                "time_constant",
                self.time_constant.to_string(),
                "> 0.0",
            ));
        }
        check_range("min_weight", self.min_weight, -1.0, 1.0)?;
        check_range("max_weight", self.max_weight, -1.0, 1.0)?;
        if self.min_weight > self.max_weight {
            return Err(RuntimeError::invalid_parameter(
                "min_weight",
                format!("{} (with max_weight={})", self.min_weight, self.max_weight),
                "<= max_weight",
            ));
        }
        Ok(())
    }

    fn window(&self, dt: Step) -> f64 {
        (-(dt as f64) / self.time_constant).exp()
    }
}

/// Synapse whose weight follows pre/post spike timing
#[derive(Debug)]
pub struct StdpSynapse {
    from: NeuronId,
    to: NeuronId,
    weight: f64,
    params: Arc<RwLock<StdpParams>>,
    last_pre: Option<Step>,
}

impl StdpSynapse {
    /// Create a synapse; the initial weight is clamped to the bounds
    pub fn new(from: NeuronId, to: NeuronId, weight: f64, params: Arc<RwLock<StdpParams>>) -> Self {
        let mut synapse = Self {
            from,
            to,
            weight: 0.0,
            params,
            last_pre: None,
        };
        synapse.set_weight(weight);
        synapse
    }

    /// Add `delta` to the weight, keeping it within the bounds
    pub fn adjust(&mut self, delta: f64) {
        let params = self.params.read();
        let next = self.weight + delta;
        self.weight = if next.is_nan() {
            self.weight
        } else {
            next.clamp(params.min_weight, params.max_weight)
        };
    }

    /// Bounds currently in force
    pub fn bounds(&self) -> (f64, f64) {
        let params = self.params.read();
        (params.min_weight, params.max_weight)
    }
}

impl SynapseModel for StdpSynapse {
    fn from(&self) -> NeuronId {
        self.from
    }

    fn to(&self) -> NeuronId {
        self.to
    }

    fn on_spike(&mut self, ctx: &StepContext, neuron: &mut dyn NeuronModel, post_last_fire: Option<Step>) {
        neuron.receive_effect(ctx, self.weight, Some(self.from));
        if self.last_pre == Some(ctx.step) {
            return;
        }
        self.last_pre = Some(ctx.step);

        // post before pre: depress
        if let Some(post) = post_last_fire.filter(|&post| post <= ctx.step) {
            let depression = {
                let params = self.params.read();
                params.learning_rate * params.window(ctx.step - post)
            };
            self.adjust(-depression);
        }
    }

    fn compute_final_state(&mut self, ctx: &StepContext, post_fired: bool) {
        if !post_fired {
            return;
        }
        // pre before post: potentiate
        if let Some(pre) = self.last_pre.filter(|&pre| pre <= ctx.step) {
            let potentiation = {
                let params = self.params.read();
                params.learning_rate * params.window(ctx.step - pre)
            };
            self.adjust(potentiation);
        }
    }

    fn weight(&self) -> f64 {
        self.weight
    }

    fn set_weight(&mut self, weight: f64) {
        let (low, high) = self.bounds();
        self.weight = if weight.is_nan() { low } else { weight.clamp(low, high) };
    }

    fn model_changed(&mut self) {
        // bounds may have narrowed
        let weight = self.weight;
        self.set_weight(weight);
    }

    fn describe(&self) -> String {
        format!("{} -> {} stdp({:.3})", self.from, self.to, self.weight)
    }

    fn monitor_schema(&self) -> Vec<MonitorChannel> {
        let (low, high) = self.bounds();
        vec![MonitorChannel::new("weight", low, high)]
    }
}

/// Factory for [`StdpSynapse`]
#[derive(Debug, Default)]
pub struct StdpFactory {
    params: HashMap<ConnectionGroupId, Arc<RwLock<StdpParams>>>,
}

impl StdpFactory {
    /// Create a factory
    pub fn new() -> Self {
        Self::default()
    }
}

impl SynapseFactory for StdpFactory {
    fn plugin(&self) -> &str {
        PLUGIN
    }

    fn set_shared_parameters(&mut self, connection_group: ConnectionGroupId, params: &ParameterMap) -> Result<()> {
        let parsed = StdpParams::from_map(params)?;
        match self.params.get(&connection_group) {
            Some(shared) => *shared.write() = parsed,
            None => {
                self.params.insert(connection_group, Arc::new(RwLock::new(parsed)));
            }
        }
        Ok(())
    }

    fn create(
        &self,
        connection_group: ConnectionGroupId,
        from: NeuronId,
        to: NeuronId,
        weight: f64,
    ) -> Result<Box<dyn SynapseModel>> {
        let params = self
            .params
            .get(&connection_group)
            .ok_or_else(|| RuntimeError::missing_parameter(PLUGIN, format!("parameters of {}", connection_group)))?;
        Ok(Box::new(StdpSynapse::new(from, to, weight, Arc::clone(params))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NeuronFactory, StandardFactory};
    use proptest::prelude::*;

    fn shared(min_weight: f64, max_weight: f64) -> Arc<RwLock<StdpParams>> {
        Arc::new(RwLock::new(StdpParams {
            learning_rate: 0.1,
            time_constant: 10.0,
            min_weight,
            max_weight,
        }))
    }

    fn target() -> Box<dyn NeuronModel> {
        let mut factory = StandardFactory::new();
        factory
            .set_shared_parameters(&ParameterMap::from_pairs([
                ("threshold", 100.0),
                ("decay_rate", 0.0),
                ("refractory_period", 0.0),
            ]))
            .unwrap();
        factory.create(NeuronId::new(2))
    }

    #[test]
    fn test_pre_then_post_potentiates() {
        let mut synapse = StdpSynapse::new(NeuronId::new(1), NeuronId::new(2), 0.5, shared(0.0, 1.0));
        let mut neuron = target();
        synapse.on_spike(&StepContext::at(10, 1.0), neuron.as_mut(), None);
        synapse.compute_final_state(&StepContext::at(12, 1.0), true);
        assert!(synapse.weight() > 0.5);
    }

    #[test]
    fn test_post_then_pre_depresses() {
        let mut synapse = StdpSynapse::new(NeuronId::new(1), NeuronId::new(2), 0.5, shared(0.0, 1.0));
        let mut neuron = target();
        synapse.on_spike(&StepContext::at(10, 1.0), neuron.as_mut(), Some(8));
        assert!(synapse.weight() < 0.5);
    }

    #[test]
    fn test_no_learning_without_post_firing() {
        let mut synapse = StdpSynapse::new(NeuronId::new(1), NeuronId::new(2), 0.5, shared(0.0, 1.0));
        let mut neuron = target();
        synapse.on_spike(&StepContext::at(10, 1.0), neuron.as_mut(), None);
        synapse.compute_final_state(&StepContext::at(10, 1.0), false);
        assert_eq!(synapse.weight(), 0.5);
    }

    #[test]
    fn test_invalid_bounds_rejected() {
        let mut factory = StdpFactory::new();
        let params = ParameterMap::from_pairs([
            ("learning_rate", 0.1),
            ("time_constant", 10.0),
            ("min_weight", 0.8),
            ("max_weight", 0.2),
        ]);
        assert!(factory.set_shared_parameters(ConnectionGroupId::new(1), &params).is_err());
    }

    #[test]
    fn test_reload_narrows_bounds() {
        let params = shared(0.0, 1.0);
        let mut synapse = StdpSynapse::new(NeuronId::new(1), NeuronId::new(2), 0.9, Arc::clone(&params));
        params.write().max_weight = 0.5;
        synapse.model_changed();
        assert_eq!(synapse.weight(), 0.5);
    }

    proptest! {
        #[test]
        fn prop_weight_stays_within_bounds(
            low in -1.0f64..0.0,
            span in 0.0f64..1.0,
            initial in -2.0f64..2.0,
            deltas in proptest::collection::vec(-3.0f64..3.0, 1..50),
        ) {
            let high = (low + span).min(1.0);
            let mut synapse = StdpSynapse::new(NeuronId::new(1), NeuronId::new(2), initial, shared(low, high));
            prop_assert!(synapse.weight() >= low && synapse.weight() <= high);
            for delta in deltas {
                synapse.adjust(delta);
                prop_assert!(synapse.weight() >= low && synapse.weight() <= high);
            }
        }
    }
}
