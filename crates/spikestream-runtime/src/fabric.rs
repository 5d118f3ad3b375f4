//! Message-passing fabric connecting workers, the controller and observers

use crate::{
    error::*,
    message::{EndpointId, Envelope},
};
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Point-to-point and one-to-many delivery of envelopes
pub trait Fabric: Send + Sync {
    /// Deliver an envelope to one endpoint
    fn send(&self, to: EndpointId, envelope: Envelope) -> Result<()>;

    /// Deliver an envelope to several endpoints, never back to its sender
    fn broadcast(&self, targets: &[EndpointId], envelope: &Envelope) -> Result<()> {
        for &target in targets {
            if target != envelope.from {
                self.send(target, envelope.clone())?;
            }
        }
        Ok(())
    }

    /// Whether an endpoint is registered
    fn contains(&self, endpoint: EndpointId) -> bool;
}

/// In-process fabric backed by unbounded crossbeam channels
#[derive(Debug, Default)]
pub struct ChannelFabric {
    inboxes: RwLock<HashMap<EndpointId, Sender<Envelope>>>,
}

impl ChannelFabric {
    /// Create an empty fabric
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an endpoint and return its inbox
    pub fn register(&self, endpoint: EndpointId) -> Result<Receiver<Envelope>> {
        let mut inboxes = self.inboxes.write();
        if inboxes.contains_key(&endpoint) {
            return Err(RuntimeError::validation(format!("{} is already registered", endpoint)));
        }
        let (tx, rx) = channel::unbounded();
        inboxes.insert(endpoint, tx);
        log::trace!("Registered {}", endpoint);
        Ok(rx)
    }

    /// Remove an endpoint; later sends to it fail
    pub fn unregister(&self, endpoint: EndpointId) {
        self.inboxes.write().remove(&endpoint);
    }

    /// Registered endpoints, sorted
    pub fn endpoints(&self) -> Vec<EndpointId> {
        let mut endpoints: Vec<EndpointId> = self.inboxes.read().keys().copied().collect();
        endpoints.sort_unstable();
        endpoints
    }
}

impl Fabric for ChannelFabric {
    fn send(&self, to: EndpointId, envelope: Envelope) -> Result<()> {
        let sender = self
            .inboxes
            .read()
            .get(&to)
            .cloned()
            .ok_or_else(|| RuntimeError::channel_closed(to))?;
        sender.send(envelope).map_err(|_| RuntimeError::channel_closed(to))
    }

    fn contains(&self, endpoint: EndpointId) -> bool {
        self.inboxes.read().contains_key(&endpoint)
    }
}
