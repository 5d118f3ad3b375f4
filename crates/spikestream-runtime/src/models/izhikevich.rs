//! Izhikevich neuron (`izhikevich` plugin)

use super::{required, MonitorChannel, NeuronFactory, NeuronModel};
use crate::{clock::StepContext, error::*};
use parking_lot::RwLock;
use spikestream_storage::{NeuronId, ParameterMap, Step};
use std::sync::Arc;

/// Plugin name
pub const PLUGIN: &str = "izhikevich";

/// Membrane potential at which a spike is emitted (mV)
pub const SPIKE_PEAK: f64 = 30.0;

/// Longest silent gap integrated when a neuron is touched again
const MAX_RELAX_STEPS: u32 = 1000;

/// Parameters shared by all neurons of a type
#[derive(Debug, Clone, PartialEq)]
pub struct IzhikevichParams {
    /// Recovery time scale
    pub a: f64,
    /// Recovery sensitivity
    pub b: f64,
    /// Reset potential (mV)
    pub c: f64,
    /// Recovery increment after a spike
    pub d: f64,
    /// Current injected per unit of synaptic effect
    pub input_scale: f64,
}

impl Default for IzhikevichParams {
    fn default() -> Self {
        // regular spiking
        Self {
            a: 0.02,
            b: 0.2,
            c: -65.0,
            d: 8.0,
            input_scale: 20.0,
        }
    }
}

impl IzhikevichParams {
    /// Build from a parameter map
    pub fn from_map(params: &ParameterMap) -> Result<Self> {
        let parsed = Self {
            a: required(params, PLUGIN, "a")?,
            b: required(params, PLUGIN, "b")?,
            c: required(params, PLUGIN, "c")?,
            d: required(params, PLUGIN, "d")?,
            input_scale: required(params, PLUGIN, "input_scale")?,
        };
        if parsed.a <= 0.0 {
            return Err(RuntimeError::invalid_parameter("a", parsed.a.to_string(), "> 0.0"));
        }
        if parsed.c >= SPIKE_PEAK {
            return Err(RuntimeError::invalid_parameter(
                "c",
                parsed.c.to_string(),
                format!("< {}", SPIKE_PEAK),
            ));
        }
        Ok(parsed)
    }
}

/// Two-variable Izhikevich neuron
#[derive(Debug)]
pub struct IzhikevichNeuron {
    id: NeuronId,
    params: Arc<RwLock<IzhikevichParams>>,
    v: f64,
    u: f64,
    input: f64,
    settled: Option<Step>,
}

impl IzhikevichNeuron {
    /// Create a neuron at its resting point
    pub fn new(id: NeuronId, params: Arc<RwLock<IzhikevichParams>>) -> Self {
        let (c, b) = {
            let p = params.read();
            (p.c, p.b)
        };
        Self {
            id,
            params,
            v: c,
            u: b * c,
            input: 0.0,
            settled: None,
        }
    }

    /// Recovery variable
    pub fn recovery(&self) -> f64 {
        self.u
    }

    fn integrate(&mut self, params: &IzhikevichParams, current: f64, dt_ms: f64) {
        // two half steps for stability
        let half = dt_ms / 2.0;
        for _ in 0..2 {
            self.v += half * (0.04 * self.v * self.v + 5.0 * self.v + 140.0 - self.u + current);
        }
        self.u += dt_ms * params.a * (params.b * self.v - self.u);
    }

    /// Integrate the silent steps before `step`, at most once
    fn relax_until(&mut self, step: Step, params: &IzhikevichParams, dt_ms: f64) {
        let first = match self.settled {
            Some(settled) => settled + 1,
            None => {
                self.settled = Some(step.saturating_sub(1));
                return;
            }
        };
        if step > first {
            let gap = (step - first).min(MAX_RELAX_STEPS);
            for _ in 0..gap {
                self.integrate(params, 0.0, dt_ms);
                if self.v >= SPIKE_PEAK {
                    self.v = params.c;
                    self.u += params.d;
                }
            }
            self.settled = Some(step - 1);
        }
    }
}

impl NeuronModel for IzhikevichNeuron {
    fn id(&self) -> NeuronId {
        self.id
    }

    fn receive_effect(&mut self, ctx: &StepContext, amount: f64, _source: Option<NeuronId>) {
        let params = self.params.read().clone();
        if self.settled == Some(ctx.step) {
            return;
        }
        self.relax_until(ctx.step, &params, ctx.step_duration_ms);
        self.input += amount * params.input_scale;
    }

    fn compute_final_state(&mut self, ctx: &StepContext) -> bool {
        if self.settled == Some(ctx.step) {
            return false;
        }
        let params = self.params.read().clone();
        self.relax_until(ctx.step, &params, ctx.step_duration_ms);

        let current = std::mem::take(&mut self.input);
        self.integrate(&params, current, ctx.step_duration_ms);
        self.settled = Some(ctx.step);

        if self.v >= SPIKE_PEAK {
            self.v = params.c;
            self.u += params.d;
            return true;
        }
        false
    }

    fn force_fire(&mut self, ctx: &StepContext) {
        let params = self.params.read();
        self.v = params.c;
        self.u += params.d;
        self.input = 0.0;
        self.settled = Some(ctx.step);
    }

    fn describe(&self) -> String {
        let p = self.params.read();
        format!("{} izhikevich(a={}, b={}, c={}, d={})", self.id, p.a, p.b, p.c, p.d)
    }

    fn monitor_schema(&self) -> Vec<MonitorChannel> {
        vec![
            MonitorChannel::new("v", -90.0, SPIKE_PEAK),
            MonitorChannel::new("u", -20.0, 20.0),
        ]
    }

    fn monitor_sample(&self, _ctx: &StepContext) -> Vec<f64> {
        vec![self.v, self.u]
    }

    fn potential(&self) -> f64 {
        self.v
    }
}

/// Factory for [`IzhikevichNeuron`]
#[derive(Debug, Default)]
pub struct IzhikevichFactory {
    params: Arc<RwLock<IzhikevichParams>>,
}

impl IzhikevichFactory {
    /// Create a factory with regular-spiking defaults
    pub fn new() -> Self {
        Self::default()
    }
}

impl NeuronFactory for IzhikevichFactory {
    fn plugin(&self) -> &str {
        PLUGIN
    }

    fn set_shared_parameters(&mut self, params: &ParameterMap) -> Result<()> {
        let parsed = IzhikevichParams::from_map(params)?;
        *self.params.write() = parsed;
        Ok(())
    }

    fn create(&self, id: NeuronId) -> Box<dyn NeuronModel> {
        Box::new(IzhikevichNeuron::new(id, Arc::clone(&self.params)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn neuron() -> IzhikevichNeuron {
        IzhikevichNeuron::new(NeuronId::new(1), Arc::new(RwLock::new(IzhikevichParams::default())))
    }

    #[test]
    fn test_strong_input_fires() {
        let mut neuron = neuron();
        let mut fired = false;
        for step in 1..50 {
            let ctx = StepContext::at(step, 1.0);
            neuron.receive_effect(&ctx, 1.0, None);
            if neuron.compute_final_state(&ctx) {
                fired = true;
                break;
            }
        }
        assert!(fired);
        assert_eq!(neuron.potential(), -65.0);
    }

    #[test]
    fn test_quiet_neuron_stays_below_peak() {
        let mut neuron = neuron();
        for step in 1..100 {
            assert!(!neuron.compute_final_state(&StepContext::at(step, 1.0)));
        }
        assert!(neuron.potential() < SPIKE_PEAK);
    }

    #[test]
    fn test_settled_step_is_not_integrated_twice() {
        let mut neuron = neuron();
        let ctx = StepContext::at(3, 1.0);
        neuron.compute_final_state(&ctx);
        let v = neuron.potential();
        assert!(!neuron.compute_final_state(&ctx));
        assert_eq!(neuron.potential(), v);
    }

    #[test]
    fn test_parameter_validation() {
        let mut factory = IzhikevichFactory::new();
        let params = ParameterMap::from_pairs([
            ("a", 0.02),
            ("b", 0.2),
            ("c", 40.0),
            ("d", 8.0),
            ("input_scale", 10.0),
        ]);
        assert!(matches!(
            factory.set_shared_parameters(&params),
            Err(RuntimeError::InvalidParameter { .. })
        ));
    }
}
