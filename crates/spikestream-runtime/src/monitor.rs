//! Per-step state monitoring of individual units

use crate::message::MonitorTarget;

/// Arena index of a monitored unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitoredUnit {
    /// Index into the neuron array
    Neuron(usize),
    /// Index into the synapse array
    Synapse(usize),
}

/// Units whose state is reported every step
#[derive(Debug, Default, Clone)]
pub struct MonitorSet {
    entries: Vec<(MonitorTarget, MonitoredUnit)>,
}

impl MonitorSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Start monitoring; returns `false` if the target was already monitored
    pub fn add(&mut self, target: MonitorTarget, unit: MonitoredUnit) -> bool {
        if self.entries.iter().any(|(t, _)| *t == target) {
            return false;
        }
        self.entries.push((target, unit));
        true
    }

    /// Stop monitoring; returns `false` if the target was not monitored
    pub fn remove(&mut self, target: MonitorTarget) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(t, _)| *t != target);
        self.entries.len() != before
    }

    /// Monitored units in the order they were added
    pub fn iter(&self) -> impl Iterator<Item = &(MonitorTarget, MonitoredUnit)> {
        self.entries.iter()
    }

    /// Number of monitored units
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is monitored
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
