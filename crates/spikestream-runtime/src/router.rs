//! Outbound spike router
//!
//! One router serves one destination worker. Outgoing events wait in a ring of
//! `max_delay + 1` buckets; each barrier close flushes the current bucket as a
//! single [`EventBatch`] to every destination and advances the ring.

use crate::{
    error::*,
    fabric::Fabric,
    message::{EndpointId, Envelope, EventBatch, Message},
};
use spikestream_storage::{GroupId, Step};

#[derive(Debug, Default, Clone)]
struct Bucket {
    entries: Vec<u16>,
    events: u32,
}

/// Delay ring buffer feeding one destination worker and its listeners
#[derive(Debug, Clone)]
pub struct SpikeRouter {
    owner: GroupId,
    primary: EndpointId,
    destinations: Vec<EndpointId>,
    ring: Vec<Bucket>,
    current: usize,
    max_buffer_size: usize,
}

impl SpikeRouter {
    /// Create a router from `owner` to the worker of `destination`
    pub fn new(owner: GroupId, destination: GroupId, max_delay: u16) -> Self {
        let primary = EndpointId::Worker(destination);
        Self {
            owner,
            primary,
            destinations: vec![primary],
            ring: vec![Bucket::default(); max_delay as usize + 1],
            current: 0,
            max_buffer_size: 0,
        }
    }

    /// Worker that owns the router
    pub fn owner(&self) -> GroupId {
        self.owner
    }

    /// Destination worker the router was built for
    pub fn primary(&self) -> EndpointId {
        self.primary
    }

    /// All destinations, primary first
    pub fn destinations(&self) -> &[EndpointId] {
        &self.destinations
    }

    /// Number of ring buckets
    pub fn ring_size(&self) -> usize {
        self.ring.len()
    }

    /// Index of the bucket flushed next
    pub fn position(&self) -> usize {
        self.current
    }

    /// Pre-size every bucket for the worst case computed from the topology
    pub fn reserve(&mut self, max_buffer_size: usize) {
        self.max_buffer_size = max_buffer_size;
        for bucket in &mut self.ring {
            bucket.entries.reserve(max_buffer_size);
        }
    }

    /// Capacity each bucket was sized for
    pub fn max_buffer_size(&self) -> usize {
        self.max_buffer_size
    }

    /// Add a destination; duplicates are ignored
    pub fn add_destination(&mut self, endpoint: EndpointId) {
        if !self.destinations.contains(&endpoint) {
            self.destinations.push(endpoint);
        }
    }

    /// Remove a listener; the primary destination cannot be removed
    pub fn remove_destination(&mut self, endpoint: EndpointId) -> Result<()> {
        if endpoint == self.primary {
            return Err(RuntimeError::validation(format!(
                "cannot remove primary destination {} from router of {}",
                endpoint, self.owner
            )));
        }
        self.destinations.retain(|&d| d != endpoint);
        Ok(())
    }

    /// Queue arena entries (source, dest pairs) to leave after `delay` steps
    pub fn enqueue(&mut self, delay: u16, entries: &[u16]) {
        debug_assert!((delay as usize) < self.ring.len(), "delay beyond ring");
        let index = (self.current + delay as usize) % self.ring.len();
        let bucket = &mut self.ring[index];
        bucket.entries.extend_from_slice(entries);
        bucket.events += (entries.len() / 2) as u32;
    }

    /// Events waiting in the bucket `offset` steps ahead
    pub fn pending(&self, offset: usize) -> u32 {
        self.ring[(self.current + offset) % self.ring.len()].events
    }

    /// Send the current bucket stamped `step`, clear it and advance the ring.
    ///
    /// Listeners that can no longer be reached are dropped; failing to reach
    /// the primary destination is an error. Returns the number of events sent.
    pub fn flush(&mut self, step: Step, fabric: &dyn Fabric) -> Result<u32> {
        let own = EndpointId::Worker(self.owner);
        let bucket = &mut self.ring[self.current];
        let batch = EventBatch::pack(step, self.owner, &bucket.entries);
        debug_assert_eq!(batch.count, bucket.events);
        let sent = bucket.events;
        bucket.entries.clear();
        bucket.events = 0;
        self.current = (self.current + 1) % self.ring.len();

        let envelope = Envelope::new(own, Message::SpikeBatch(batch));
        let mut unreachable = Vec::new();
        // one-to-many; never loops back to the owner
        for &destination in self.destinations.iter().filter(|&&d| d != own) {
            if let Err(err) = fabric.send(destination, envelope.clone()) {
                if destination == self.primary {
                    return Err(err);
                }
                unreachable.push(destination);
            }
        }
        if self.destinations.contains(&own) {
            fabric.send(own, envelope)?;
        }

        for endpoint in unreachable {
            log::warn!("Router {} -> {} dropping unreachable listener {}", self.owner, self.primary, endpoint);
            self.destinations.retain(|&d| d != endpoint);
        }
        Ok(sent)
    }
}
