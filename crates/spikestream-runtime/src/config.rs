//! Run-time overrides of the stored simulation parameters

use crate::error::*;
use spikestream_storage::{GlobalParameters, UpdateMode};
use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Overrides applied on top of the store's global parameters at load time
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(default))]
pub struct SimulationConfig {
    /// Minimum wall-clock duration of one step (ms)
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub min_step_duration_ms: Option<u64>,
    /// Which units update at barrier close
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub update_mode: Option<UpdateMode>,
    /// Seed for noise injection
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub rng_seed: Option<u64>,
    /// Derive elapsed time from the wall clock
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub live_clock: Option<bool>,
    /// Send a step report every this many steps
    pub report_every: u32,
    /// How long the controller waits for workers to load (ms)
    pub load_timeout_ms: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            min_step_duration_ms: None,
            update_mode: None,
            rng_seed: None,
            live_clock: None,
            report_every: 1,
            load_timeout_ms: 30_000,
        }
    }
}

impl SimulationConfig {
    /// Check the configuration
    pub fn validate(&self) -> Result<()> {
        if self.report_every == 0 {
            return Err(RuntimeError::invalid_parameter("report_every", "0", "> 0"));
        }
        if self.load_timeout_ms == 0 {
            return Err(RuntimeError::invalid_parameter("load_timeout_ms", "0", "> 0"));
        }
        Ok(())
    }

    /// Set the update mode
    pub fn with_update_mode(mut self, mode: UpdateMode) -> Self {
        self.update_mode = Some(mode);
        self
    }

    /// Set the noise seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    /// Set the minimum step duration
    pub fn with_min_step_duration_ms(mut self, ms: u64) -> Self {
        self.min_step_duration_ms = Some(ms);
        self
    }

    /// Load timeout as a duration
    pub fn load_timeout(&self) -> Duration {
        Duration::from_millis(self.load_timeout_ms)
    }

    /// Stored parameters with the overrides applied
    pub fn apply(&self, mut global: GlobalParameters) -> GlobalParameters {
        if let Some(ms) = self.min_step_duration_ms {
            global.min_step_duration_ms = ms;
        }
        if let Some(mode) = self.update_mode {
            global.update_mode = mode;
        }
        if let Some(seed) = self.rng_seed {
            global.rng_seed = Some(seed);
        }
        if let Some(live) = self.live_clock {
            global.live_clock = live;
        }
        global
    }
}
