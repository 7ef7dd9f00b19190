//! Peer graph of mesh nodes.
//!
//! The node table sits behind a reader/writer lock. Readers get cloned
//! per-node snapshots, so graph algorithms running while flags flip never
//! observe a node with half-updated fields.

use std::collections::HashMap;

use parking_lot::RwLock;
use rand::Rng;
use rand::seq::SliceRandom;
use tracing::{debug, info};

use crate::error::{MeshError, Result};
use crate::types::{Node, NodeId, NodeSummary, TopologyStats};

/// The mesh's node table and peer edges.
#[derive(Debug, Default)]
pub struct MeshTopology {
    nodes: RwLock<HashMap<NodeId, Node>>,
}

impl MeshTopology {
    /// Creates an empty topology.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a node, generating an id when none is given.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::NodeAlreadyExists`] if the explicit id is taken.
    pub fn create_node(&self, id: Option<NodeId>, has_internet: bool) -> Result<NodeId> {
        let mut nodes = self.nodes.write();
        let id = match id {
            Some(id) if nodes.contains_key(&id) => return Err(MeshError::NodeAlreadyExists(id)),
            Some(id) => id,
            None => loop {
                let candidate = NodeId::generate();
                if !nodes.contains_key(&candidate) {
                    break candidate;
                }
            },
        };

        debug!(node = %id, has_internet, "node registered");
        nodes.insert(id.clone(), Node::new(id.clone(), has_internet));
        Ok(id)
    }

    /// Adds a symmetric edge between `a` and `b`.
    ///
    /// Returns `false` if they were already connected.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::SelfConnection`] when `a == b` and
    /// [`MeshError::NodeNotFound`] for unknown ids.
    pub fn connect_nodes(&self, a: &NodeId, b: &NodeId) -> Result<bool> {
        if a == b {
            return Err(MeshError::SelfConnection(a.clone()));
        }
        let mut nodes = self.nodes.write();
        ensure_known(&nodes, a)?;
        ensure_known(&nodes, b)?;
        Ok(link(&mut nodes, a, b))
    }

    /// Removes the edge between `a` and `b`.
    ///
    /// Returns `false` if they were not connected.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::NodeNotFound`] for unknown ids.
    pub fn disconnect_nodes(&self, a: &NodeId, b: &NodeId) -> Result<bool> {
        let mut nodes = self.nodes.write();
        ensure_known(&nodes, a)?;
        ensure_known(&nodes, b)?;

        let removed = nodes.get_mut(a).is_some_and(|node| node.peers.remove(b));
        if let Some(node) = nodes.get_mut(b) {
            node.peers.remove(a);
        }
        Ok(removed)
    }

    /// Removes a node together with all of its edges.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::NodeNotFound`] for an unknown id.
    pub fn remove_node(&self, id: &NodeId) -> Result<Node> {
        let mut nodes = self.nodes.write();
        let node = nodes
            .remove(id)
            .ok_or_else(|| MeshError::NodeNotFound(id.clone()))?;
        for peer in &node.peers {
            if let Some(peer) = nodes.get_mut(peer) {
                peer.peers.remove(id);
            }
        }
        debug!(node = %id, peers = node.degree(), "node removed");
        Ok(node)
    }

    /// Tops every node up to `k` random peers it is not yet connected to.
    ///
    /// Nodes still below `k` are preferred as new peers, which approximates a
    /// random k-regular graph. Returns the number of edges added.
    pub fn create_mesh_topology<R: Rng + ?Sized>(&self, k: usize, rng: &mut R) -> usize {
        let mut nodes = self.nodes.write();
        let mut ids: Vec<NodeId> = nodes.keys().cloned().collect();
        ids.sort();

        let mut added = 0;
        for id in &ids {
            let degree = nodes.get(id).map_or(0, Node::degree);
            let needed = k.saturating_sub(degree);
            if needed == 0 {
                continue;
            }

            let mut candidates: Vec<NodeId> = ids
                .iter()
                .filter(|other| {
                    *other != id
                        && nodes
                            .get(id)
                            .is_some_and(|node| !node.is_connected_to(other))
                })
                .cloned()
                .collect();
            candidates.shuffle(rng);
            candidates.sort_by_key(|other| nodes.get(other).map_or(0, Node::degree) >= k);

            for peer in candidates.into_iter().take(needed) {
                if link(&mut nodes, id, &peer) {
                    added += 1;
                }
            }
        }

        info!(nodes = ids.len(), k, edges_added = added, "mesh topology built");
        added
    }

    /// Sets a node's online flag.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::NodeNotFound`] for an unknown id.
    pub fn set_online(&self, id: &NodeId, online: bool) -> Result<()> {
        self.update(id, |node| node.online = online)
    }

    /// Sets a node's internet flag.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::NodeNotFound`] for an unknown id.
    pub fn set_has_internet(&self, id: &NodeId, has_internet: bool) -> Result<()> {
        self.update(id, |node| node.has_internet = has_internet)
    }

    /// Records a node's advertised bandwidth and client count.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::NodeNotFound`] for an unknown id.
    pub fn set_capacity(&self, id: &NodeId, bandwidth: u64, clients: u32) -> Result<()> {
        self.update(id, |node| {
            node.bandwidth = bandwidth;
            node.clients = clients;
        })
    }

    /// Marks a random fraction of nodes offline. Returns the affected ids.
    pub fn inject_failures<R: Rng + ?Sized>(&self, offline_fraction: f64, rng: &mut R) -> Vec<NodeId> {
        let mut nodes = self.nodes.write();
        let mut ids: Vec<NodeId> = nodes.keys().cloned().collect();
        ids.sort();
        ids.shuffle(rng);

        let fraction = offline_fraction.clamp(0.0, 1.0);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
        let count = (ids.len() as f64 * fraction).round() as usize;
        ids.truncate(count);

        for id in &ids {
            if let Some(node) = nodes.get_mut(id) {
                node.online = false;
            }
        }
        info!(count, fraction, "failures injected");
        ids
    }

    /// Returns a copy of one node.
    #[must_use]
    pub fn snapshot(&self, id: &NodeId) -> Option<Node> {
        self.nodes.read().get(id).cloned()
    }

    /// True if the id is registered.
    #[must_use]
    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.read().contains_key(id)
    }

    /// Number of registered nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    /// True when no nodes are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }

    /// All node ids in sorted order.
    #[must_use]
    pub fn node_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.nodes.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Aggregate statistics.
    #[must_use]
    pub fn stats(&self) -> TopologyStats {
        let nodes = self.nodes.read();
        let degree_sum: usize = nodes.values().map(Node::degree).sum();
        #[allow(clippy::cast_precision_loss)]
        let average_degree = if nodes.is_empty() {
            0.0
        } else {
            degree_sum as f64 / nodes.len() as f64
        };
        TopologyStats {
            nodes: nodes.len(),
            edges: degree_sum / 2,
            online: nodes.values().filter(|n| n.online).count(),
            with_internet: nodes.values().filter(|n| n.has_internet).count(),
            average_degree,
        }
    }

    /// Summaries of every node, sorted by id.
    #[must_use]
    pub fn summaries(&self) -> Vec<NodeSummary> {
        let nodes = self.nodes.read();
        let mut summaries: Vec<NodeSummary> = nodes.values().map(NodeSummary::from).collect();
        summaries.sort_by(|a, b| a.id.cmp(&b.id));
        summaries
    }

    fn update(&self, id: &NodeId, f: impl FnOnce(&mut Node)) -> Result<()> {
        let mut nodes = self.nodes.write();
        let node = nodes
            .get_mut(id)
            .ok_or_else(|| MeshError::NodeNotFound(id.clone()))?;
        f(node);
        Ok(())
    }
}

fn ensure_known(nodes: &HashMap<NodeId, Node>, id: &NodeId) -> Result<()> {
    if nodes.contains_key(id) {
        Ok(())
    } else {
        Err(MeshError::NodeNotFound(id.clone()))
    }
}

/// Inserts both directions of an edge. Both ids must exist.
fn link(nodes: &mut HashMap<NodeId, Node>, a: &NodeId, b: &NodeId) -> bool {
    let added = nodes
        .get_mut(a)
        .is_some_and(|node| node.peers.insert(b.clone()));
    if let Some(node) = nodes.get_mut(b) {
        node.peers.insert(a.clone());
    }
    added
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    proptest! {
        #[test]
        fn edges_are_always_symmetric(n in 2usize..40, k in 1usize..8, seed in any::<u64>()) {
            let topology = MeshTopology::new();
            for i in 0..n {
                topology.create_node(Some(NodeId::new(format!("n{i}"))), false).expect("node");
            }
            topology.create_mesh_topology(k, &mut StdRng::seed_from_u64(seed));

            for id in topology.node_ids() {
                let node = topology.snapshot(&id).expect("node");
                prop_assert!(!node.peers.contains(&id));
                prop_assert!(node.degree() >= k.min(n - 1));
                for peer in &node.peers {
                    let other = topology.snapshot(peer).expect("peer");
                    prop_assert!(other.peers.contains(&id));
                }
            }
        }
    }
}
