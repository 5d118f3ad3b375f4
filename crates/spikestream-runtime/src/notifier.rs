//! Firing notifier: tells listeners which neurons fired each step

use crate::{
    fabric::Fabric,
    message::{EndpointId, Envelope, Message},
};
use spikestream_storage::{GroupId, NeuronId, Step};

/// Collects the neurons that fired in a step and reports them to subscribers
#[derive(Debug, Clone)]
pub struct FiringNotifier {
    group: GroupId,
    subscribers: Vec<EndpointId>,
    fired: Vec<NeuronId>,
}

impl FiringNotifier {
    /// Create a notifier for a group
    pub fn new(group: GroupId) -> Self {
        Self {
            group,
            subscribers: Vec::new(),
            fired: Vec::new(),
        }
    }

    /// Add a subscriber; duplicates are ignored
    pub fn subscribe(&mut self, endpoint: EndpointId) {
        if !self.subscribers.contains(&endpoint) {
            self.subscribers.push(endpoint);
        }
    }

    /// Remove a subscriber
    pub fn unsubscribe(&mut self, endpoint: EndpointId) {
        self.subscribers.retain(|&s| s != endpoint);
    }

    /// Current subscribers
    pub fn subscribers(&self) -> &[EndpointId] {
        &self.subscribers
    }

    /// Record a firing
    pub fn record(&mut self, neuron: NeuronId) {
        self.fired.push(neuron);
    }

    /// Neurons recorded since the last flush
    pub fn fired(&self) -> &[NeuronId] {
        &self.fired
    }

    /// Send the recorded firings to every subscriber and clear them.
    ///
    /// Nothing is sent for a step without firings. Unreachable subscribers
    /// are dropped.
    pub fn flush(&mut self, step: Step, fabric: &dyn Fabric) {
        let neurons = std::mem::take(&mut self.fired);
        if neurons.is_empty() || self.subscribers.is_empty() {
            return;
        }
        let envelope = Envelope::new(
            EndpointId::Worker(self.group),
            Message::FiringNeurons {
                group: self.group,
                step,
                neurons,
            },
        );
        let group = self.group;
        self.subscribers.retain(|&subscriber| match fabric.send(subscriber, envelope.clone()) {
            Ok(()) => true,
            Err(err) => {
                log::warn!("Group {} dropping firing subscriber {}: {}", group, subscriber, err);
                false
            }
        });
    }
}
