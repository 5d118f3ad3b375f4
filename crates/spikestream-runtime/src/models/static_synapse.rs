//! Fixed-weight synapse (`weight` plugin)

use super::{NeuronModel, SynapseFactory, SynapseModel};
use crate::{clock::StepContext, error::*};
use spikestream_storage::{ConnectionGroupId, NeuronId, ParameterMap, Step};
use std::collections::HashSet;

/// Plugin name
pub const PLUGIN: &str = "weight";

/// Synapse that delivers its weight unchanged
#[derive(Debug, Clone)]
pub struct StaticSynapse {
    from: NeuronId,
    to: NeuronId,
    weight: f64,
}

impl StaticSynapse {
    /// Create a synapse
    pub fn new(from: NeuronId, to: NeuronId, weight: f64) -> Self {
        Self {
            from,
            to,
            weight: weight.clamp(-1.0, 1.0),
        }
    }
}

impl SynapseModel for StaticSynapse {
    fn from(&self) -> NeuronId {
        self.from
    }

    fn to(&self) -> NeuronId {
        self.to
    }

    fn on_spike(&mut self, ctx: &StepContext, neuron: &mut dyn NeuronModel, _post_last_fire: Option<Step>) {
        neuron.receive_effect(ctx, self.weight, Some(self.from));
    }

    fn compute_final_state(&mut self, _ctx: &StepContext, _post_fired: bool) {}

    fn weight(&self) -> f64 {
        self.weight
    }

    fn set_weight(&mut self, weight: f64) {
        self.weight = weight.clamp(-1.0, 1.0);
    }

    fn describe(&self) -> String {
        format!("{} -> {} weight({:.3})", self.from, self.to, self.weight)
    }
}

/// Factory for [`StaticSynapse`]; the plugin takes no parameters
#[derive(Debug, Default)]
pub struct StaticSynapseFactory {
    configured: HashSet<ConnectionGroupId>,
}

impl StaticSynapseFactory {
    /// Create a factory
    pub fn new() -> Self {
        Self::default()
    }
}

impl SynapseFactory for StaticSynapseFactory {
    fn plugin(&self) -> &str {
        PLUGIN
    }

    fn set_shared_parameters(&mut self, connection_group: ConnectionGroupId, _params: &ParameterMap) -> Result<()> {
        self.configured.insert(connection_group);
        Ok(())
    }

    fn create(
        &self,
        connection_group: ConnectionGroupId,
        from: NeuronId,
        to: NeuronId,
        weight: f64,
    ) -> Result<Box<dyn SynapseModel>> {
        if !self.configured.contains(&connection_group) {
            return Err(RuntimeError::missing_parameter(PLUGIN, format!("parameters of {}", connection_group)));
        }
        Ok(Box::new(StaticSynapse::new(from, to, weight)))
    }
}
