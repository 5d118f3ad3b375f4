//! Simulation clock

use spikestream_storage::Step;
use std::time::Instant;

/// Snapshot of the clock handed to models while they compute
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepContext {
    /// Current time step
    pub step: Step,
    /// Elapsed simulated time (ms)
    pub time_ms: f64,
    /// Duration of one step (ms)
    pub step_duration_ms: f64,
}

impl StepContext {
    /// Context at `step` with a fixed step duration
    pub fn at(step: Step, step_duration_ms: f64) -> Self {
        Self {
            step,
            time_ms: step as f64 * step_duration_ms,
            step_duration_ms,
        }
    }
}

/// Monotonic step counter with elapsed-time bookkeeping
#[derive(Debug, Clone)]
pub struct SimulationClock {
    step: Step,
    step_duration_ms: f64,
    live: bool,
    started: Option<Instant>,
}

impl SimulationClock {
    /// Create a clock at step 0
    pub fn new(step_duration_ms: f64) -> Self {
        Self {
            step: 0,
            step_duration_ms,
            live: false,
            started: None,
        }
    }

    /// Current time step
    pub fn step(&self) -> Step {
        self.step
    }

    /// Duration of one step (ms)
    pub fn step_duration_ms(&self) -> f64 {
        self.step_duration_ms
    }

    /// Change the step duration; takes effect from the next reading
    pub fn set_step_duration_ms(&mut self, step_duration_ms: f64) {
        self.step_duration_ms = step_duration_ms;
    }

    /// Switch between step-derived and wall-clock elapsed time
    pub fn set_live(&mut self, live: bool) {
        self.live = live;
        if live && self.started.is_none() {
            self.started = Some(Instant::now());
        }
    }

    /// Whether elapsed time follows the wall clock
    pub fn is_live(&self) -> bool {
        self.live
    }

    /// Elapsed time (ms)
    pub fn elapsed_ms(&self) -> f64 {
        match (self.live, self.started) {
            (true, Some(started)) => started.elapsed().as_secs_f64() * 1000.0,
            _ => self.step as f64 * self.step_duration_ms,
        }
    }

    /// Move to the next step
    pub fn advance(&mut self) {
        self.step += 1;
    }

    /// Context for model computation at the current step
    pub fn context(&self) -> StepContext {
        StepContext {
            step: self.step,
            time_ms: self.elapsed_ms(),
            step_duration_ms: self.step_duration_ms,
        }
    }
}
