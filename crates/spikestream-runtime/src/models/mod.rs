//! Neuron and synapse model contract
//!
//! A model plugin supplies a factory per model type. The worker hands the
//! factory the shared parameter map of the type (or of each connection group
//! for synapses), asks it for one instance per unit, and afterwards drives the
//! instances through the traits below.

use crate::{clock::StepContext, error::*};
use spikestream_storage::{ConnectionGroupId, NeuronId, ParameterMap, Step};
use std::fmt;

pub mod izhikevich;
pub mod standard;
pub mod static_synapse;
pub mod stdp;

pub use izhikevich::{IzhikevichFactory, IzhikevichNeuron, IzhikevichParams};
pub use standard::{StandardFactory, StandardNeuron, StandardParams};
pub use static_synapse::{StaticSynapse, StaticSynapseFactory};
pub use stdp::{StdpFactory, StdpParams, StdpSynapse};

/// One monitored quantity with its display range
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MonitorChannel {
    /// Quantity name
    pub label: String,
    /// Lower display bound
    pub low: f64,
    /// Upper display bound
    pub high: f64,
}

impl MonitorChannel {
    /// Create a channel description
    pub fn new(label: impl Into<String>, low: f64, high: f64) -> Self {
        Self {
            label: label.into(),
            low,
            high,
        }
    }
}

/// Per-neuron computation
///
/// `receive_effect` may be called any number of times in one step; deferred
/// work (decay, integration) must be applied at most once per step, which
/// models track with the step of their last update.
pub trait NeuronModel: Send + fmt::Debug {
    /// Global id of the neuron
    fn id(&self) -> NeuronId;

    /// Accumulate a synaptic (or injected) effect
    fn receive_effect(&mut self, ctx: &StepContext, amount: f64, source: Option<NeuronId>);

    /// Settle the state for this step; returns `true` when the neuron fires
    fn compute_final_state(&mut self, ctx: &StepContext) -> bool;

    /// Fire regardless of state, resetting as a normal firing would
    fn force_fire(&mut self, ctx: &StepContext);

    /// Shared parameters were replaced
    fn model_changed(&mut self) {}

    /// Short description for logs and inspection
    fn describe(&self) -> String;

    /// Ordered list of monitored quantities
    fn monitor_schema(&self) -> Vec<MonitorChannel>;

    /// Current values, in `monitor_schema` order
    fn monitor_sample(&self, ctx: &StepContext) -> Vec<f64>;

    /// Current membrane potential
    fn potential(&self) -> f64;
}

/// Per-synapse computation
pub trait SynapseModel: Send + fmt::Debug {
    /// Source neuron
    fn from(&self) -> NeuronId;

    /// Destination neuron
    fn to(&self) -> NeuronId;

    /// A presynaptic spike arrived; deliver its effect to the destination neuron
    fn on_spike(&mut self, ctx: &StepContext, neuron: &mut dyn NeuronModel, post_last_fire: Option<Step>);

    /// End-of-step update (learning)
    fn compute_final_state(&mut self, ctx: &StepContext, post_fired: bool);

    /// Weight in `[-1.0, 1.0]`
    fn weight(&self) -> f64;

    /// Replace the weight (clamped to the model's bounds)
    fn set_weight(&mut self, weight: f64);

    /// Shared parameters were replaced
    fn model_changed(&mut self) {}

    /// Short description for logs and inspection
    fn describe(&self) -> String;

    /// Ordered list of monitored quantities
    fn monitor_schema(&self) -> Vec<MonitorChannel> {
        vec![MonitorChannel::new("weight", -1.0, 1.0)]
    }

    /// Current values, in `monitor_schema` order
    fn monitor_sample(&self, _ctx: &StepContext) -> Vec<f64> {
        vec![self.weight()]
    }
}

/// Creates neurons of one model type
pub trait NeuronFactory: Send + fmt::Debug {
    /// Plugin name
    fn plugin(&self) -> &str;

    /// Install the parameter map of the type; fails if a key is missing
    fn set_shared_parameters(&mut self, params: &ParameterMap) -> Result<()>;

    /// Create a neuron sharing the installed parameters
    fn create(&self, id: NeuronId) -> Box<dyn NeuronModel>;
}

/// Creates synapses of one model type, with parameters per connection group
pub trait SynapseFactory: Send + fmt::Debug {
    /// Plugin name
    fn plugin(&self) -> &str;

    /// Install the parameter map of a connection group; fails if a key is missing
    fn set_shared_parameters(&mut self, connection_group: ConnectionGroupId, params: &ParameterMap) -> Result<()>;

    /// Create a synapse sharing the parameters of its connection group
    fn create(
        &self,
        connection_group: ConnectionGroupId,
        from: NeuronId,
        to: NeuronId,
        weight: f64,
    ) -> Result<Box<dyn SynapseModel>>;
}

/// Fetch a required parameter
pub(crate) fn required(params: &ParameterMap, model: &str, key: &str) -> Result<f64> {
    params
        .get(key)
        .ok_or_else(|| RuntimeError::missing_parameter(model, key))
}

/// Reject values outside `[low, high]`
pub(crate) fn check_range(parameter: &str, value: f64, low: f64, high: f64) -> Result<()> {
    if value.is_nan() || value < low || value > high {
        return Err(RuntimeError::invalid_parameter(
            parameter,
            value.to_string(),
            format!("within [{}, {}]", low, high),
        ));
    }
    Ok(())
}
