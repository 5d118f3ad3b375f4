//! Compressed outgoing connections of a group
//!
//! Every synapse leaving the group is stored as two `u16` entries in one flat
//! arena: the local index of the source neuron and the destination-relative id
//! of the target. The arena is sorted by (source, router, delay) and cut into
//! [`ConnectionHolder`]s, so a firing neuron enqueues each of its holders into
//! the matching router with a single slice copy.

use crate::error::*;
use std::ops::Range;

/// Largest number of neurons a group may hold
pub const MAX_GROUP_NEURONS: usize = 1 << 16;

/// A run of arena entries sharing source, destination worker and delay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionHolder {
    /// First arena entry
    pub start: u32,
    /// Number of arena entries (two per synapse)
    pub len: u32,
    /// Transmission delay in steps
    pub delay: u16,
    /// Index of the router serving the destination worker
    pub router: usize,
}

impl ConnectionHolder {
    /// Number of synapses in the holder
    pub fn synapses(&self) -> usize {
        self.len as usize / 2
    }
}

/// One outgoing synapse before compression
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct OutgoingEdge {
    /// Local index of the source neuron
    pub source: u16,
    /// Router serving the destination worker
    pub router: usize,
    /// Transmission delay in steps
    pub delay: u16,
    /// Destination-relative id of the target neuron
    pub dest: u16,
}

/// Arena and holders for all neurons of a group
#[derive(Debug, Default, Clone)]
pub struct OutgoingConnections {
    arena: Vec<u16>,
    holders: Vec<ConnectionHolder>,
    per_neuron: Vec<Range<usize>>,
}

impl OutgoingConnections {
    /// Compress the outgoing edges of a group of `group_size` neurons
    pub fn build(group_size: usize, mut edges: Vec<OutgoingEdge>) -> Result<Self> {
        if group_size > MAX_GROUP_NEURONS {
            return Err(RuntimeError::malformed_topology(format!(
                "group of {} neurons exceeds the {} addressable by 16-bit ids",
                group_size, MAX_GROUP_NEURONS
            )));
        }
        if let Some(edge) = edges.iter().find(|e| e.source as usize >= group_size) {
            return Err(RuntimeError::malformed_topology(format!(
                "source index {} outside group of {}",
                edge.source, group_size
            )));
        }

        edges.sort_unstable();
        edges.dedup();

        let mut arena = Vec::with_capacity(edges.len() * 2);
        let mut holders: Vec<ConnectionHolder> = Vec::new();
        let mut per_neuron = vec![0..0; group_size];
        let mut key: Option<(u16, usize, u16)> = None;

        for edge in &edges {
            let edge_key = (edge.source, edge.router, edge.delay);
            if key != Some(edge_key) {
                holders.push(ConnectionHolder {
                    start: arena.len() as u32,
                    len: 0,
                    delay: edge.delay,
                    router: edge.router,
                });
                let range = &mut per_neuron[edge.source as usize];
                if range.is_empty() {
                    *range = holders.len() - 1..holders.len() - 1;
                }
                range.end = holders.len();
                key = Some(edge_key);
            }
            arena.push(edge.source);
            arena.push(edge.dest);
            if let Some(holder) = holders.last_mut() {
                holder.len += 2;
            }
        }

        Ok(Self {
            arena,
            holders,
            per_neuron,
        })
    }

    /// Holders of one source neuron
    pub fn holders_of(&self, source: usize) -> &[ConnectionHolder] {
        match self.per_neuron.get(source) {
            Some(range) => &self.holders[range.clone()],
            None => &[],
        }
    }

    /// Arena entries covered by a holder
    pub fn entries(&self, holder: &ConnectionHolder) -> &[u16] {
        let start = holder.start as usize;
        &self.arena[start..start + holder.len as usize]
    }

    /// All holders
    pub fn holders(&self) -> &[ConnectionHolder] {
        &self.holders
    }

    /// Number of compressed synapses
    pub fn synapse_count(&self) -> usize {
        self.arena.len() / 2
    }

    /// Largest number of arena entries a router bucket can hold, for each of
    /// `routers` routers.
    ///
    /// A bucket collects the emissions of every delay, so the bound is every
    /// source neuron firing on each of the preceding steps: the sum over all
    /// delays of that router's entries.
    pub fn max_buffer_sizes(&self, routers: usize) -> Vec<usize> {
        let mut sizes = vec![0; routers];
        for holder in &self.holders {
            if let Some(size) = sizes.get_mut(holder.router) {
                *size += holder.len as usize;
            }
        }
        sizes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge(source: u16, router: usize, delay: u16, dest: u16) -> OutgoingEdge {
        OutgoingEdge { source, router, delay, dest }
    }

    #[test]
    fn test_holders_split_by_router_and_delay() {
        let connections = OutgoingConnections::build(
            4,
            vec![
                edge(0, 1, 0, 7),
                edge(0, 0, 2, 3),
                edge(0, 0, 0, 1),
                edge(0, 0, 0, 2),
                edge(2, 0, 0, 5),
            ],
        )
        .unwrap();

        let holders = connections.holders_of(0);
        assert_eq!(holders.len(), 3);
        assert_eq!((holders[0].router, holders[0].delay, holders[0].synapses()), (0, 0, 2));
        assert_eq!((holders[1].router, holders[1].delay), (0, 2));
        assert_eq!((holders[2].router, holders[2].delay), (1, 0));
        assert_eq!(connections.entries(&holders[0]), &[0, 1, 0, 2]);

        assert!(connections.holders_of(1).is_empty());
        assert_eq!(connections.holders_of(2).len(), 1);
        assert!(connections.holders_of(99).is_empty());
        assert_eq!(connections.synapse_count(), 5);
    }

    #[test]
    fn test_max_buffer_sizes() {
        let connections = OutgoingConnections::build(
            3,
            vec![edge(0, 0, 0, 1), edge(1, 0, 0, 1), edge(2, 0, 1, 1), edge(0, 1, 3, 0)],
        )
        .unwrap();
        assert_eq!(connections.max_buffer_sizes(3), vec![6, 2, 0]);
    }

    #[test]
    fn test_oversized_group_rejected() {
        let result = OutgoingConnections::build(MAX_GROUP_NEURONS + 1, Vec::new());
        assert!(matches!(result, Err(RuntimeError::MalformedTopology { .. })));
    }

    #[test]
    fn test_source_outside_group_rejected() {
        assert!(OutgoingConnections::build(2, vec![edge(2, 0, 0, 0)]).is_err());
    }
}
