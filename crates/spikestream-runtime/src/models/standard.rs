//! Lazy-decay integrate-and-fire neuron (`standard` plugin)

use super::{check_range, required, MonitorChannel, NeuronFactory, NeuronModel};
use crate::{clock::StepContext, error::*};
use parking_lot::RwLock;
use spikestream_storage::{NeuronId, ParameterMap, Step};
use std::sync::Arc;

/// Plugin name
pub const PLUGIN: &str = "standard";

/// Parameters shared by all neurons of a type
#[derive(Debug, Clone, PartialEq)]
pub struct StandardParams {
    /// Potential at which the neuron fires
    pub threshold: f64,
    /// Fraction of the potential lost per step
    pub decay_rate: f64,
    /// Steps after a firing during which input is ignored
    pub refractory_period: u32,
}

impl Default for StandardParams {
    fn default() -> Self {
        Self {
            threshold: 1.0,
            decay_rate: 0.0,
            refractory_period: 0,
        }
    }
}

impl StandardParams {
    /// Build from a parameter map
    pub fn from_map(params: &ParameterMap) -> Result<Self> {
        let threshold = required(params, PLUGIN, "threshold")?;
        let decay_rate = required(params, PLUGIN, "decay_rate")?;
        let refractory = required(params, PLUGIN, "refractory_period")?;

        if threshold <= 0.0 || threshold.is_nan() {
            return Err(RuntimeError::invalid_parameter("threshold", threshold.to_string(), "> 0.0"));
        }
        check_range("decay_rate", decay_rate, 0.0, 1.0)?;
        check_range("refractory_period", refractory, 0.0, u32::MAX as f64)?;

        Ok(Self {
            threshold,
            decay_rate,
            refractory_period: refractory.round() as u32,
        })
    }
}

/// Integrate-and-fire neuron whose decay is applied lazily
#[derive(Debug)]
pub struct StandardNeuron {
    id: NeuronId,
    params: Arc<RwLock<StandardParams>>,
    potential: f64,
    last_update: Option<Step>,
    last_fire: Option<Step>,
}

impl StandardNeuron {
    /// Create a neuron at rest
    pub fn new(id: NeuronId, params: Arc<RwLock<StandardParams>>) -> Self {
        Self {
            id,
            params,
            potential: 0.0,
            last_update: None,
            last_fire: None,
        }
    }

    /// Apply the decay owed since the last update, at most once per step
    fn catch_up(&mut self, step: Step, decay_rate: f64) {
        match self.last_update {
            Some(last) if last == step => return,
            Some(last) if step > last && decay_rate > 0.0 => {
                self.potential *= (1.0 - decay_rate).powi((step - last) as i32);
            }
            _ => {}
        }
        self.last_update = Some(step);
    }

    fn refractory(&self, step: Step, period: u32) -> bool {
        match self.last_fire {
            Some(fired) => period > 0 && step.saturating_sub(fired) < period,
            None => false,
        }
    }

    fn fire(&mut self, step: Step) {
        self.potential = 0.0;
        self.last_fire = Some(step);
        self.last_update = Some(step);
    }
}

impl NeuronModel for StandardNeuron {
    fn id(&self) -> NeuronId {
        self.id
    }

    fn receive_effect(&mut self, ctx: &StepContext, amount: f64, _source: Option<NeuronId>) {
        let params = self.params.read().clone();
        self.catch_up(ctx.step, params.decay_rate);
        if self.refractory(ctx.step, params.refractory_period) {
            return;
        }
        self.potential += amount;
    }

    fn compute_final_state(&mut self, ctx: &StepContext) -> bool {
        let params = self.params.read().clone();
        self.catch_up(ctx.step, params.decay_rate);
        if self.last_fire == Some(ctx.step) || self.refractory(ctx.step, params.refractory_period) {
            return false;
        }
        if self.potential >= params.threshold {
            self.fire(ctx.step);
            return true;
        }
        false
    }

    fn force_fire(&mut self, ctx: &StepContext) {
        self.fire(ctx.step);
    }

    fn describe(&self) -> String {
        let params = self.params.read();
        format!(
            "{} standard(threshold={}, decay_rate={}, refractory={})",
            self.id, params.threshold, params.decay_rate, params.refractory_period
        )
    }

    fn monitor_schema(&self) -> Vec<MonitorChannel> {
        let threshold = self.params.read().threshold;
        vec![MonitorChannel::new("potential", -threshold, threshold)]
    }

    fn monitor_sample(&self, _ctx: &StepContext) -> Vec<f64> {
        vec![self.potential]
    }

    fn potential(&self) -> f64 {
        self.potential
    }
}

/// Factory for [`StandardNeuron`]
#[derive(Debug, Default)]
pub struct StandardFactory {
    params: Arc<RwLock<StandardParams>>,
}

impl StandardFactory {
    /// Create a factory with default parameters
    pub fn new() -> Self {
        Self::default()
    }
}

impl NeuronFactory for StandardFactory {
    fn plugin(&self) -> &str {
        PLUGIN
    }

    fn set_shared_parameters(&mut self, params: &ParameterMap) -> Result<()> {
        let parsed = StandardParams::from_map(params)?;
        *self.params.write() = parsed;
        Ok(())
    }

    fn create(&self, id: NeuronId) -> Box<dyn NeuronModel> {
        Box::new(StandardNeuron::new(id, Arc::clone(&self.params)))
    }
}
