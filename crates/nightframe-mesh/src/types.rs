//! Core mesh types.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a mesh node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Wraps an existing identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh random identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A node in the peer mesh.
///
/// Peers are kept in a sorted set so traversal order is deterministic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    /// Node identifier.
    pub id: NodeId,
    /// Whether the node currently participates in the mesh.
    pub online: bool,
    /// Whether the node has direct internet access.
    pub has_internet: bool,
    /// Directly connected peers.
    pub peers: BTreeSet<NodeId>,
    /// Advertised bandwidth in kbit/s.
    pub bandwidth: u64,
    /// Number of clients served through this node.
    pub clients: u32,
}

impl Node {
    /// Creates an online node with no peers.
    #[must_use]
    pub fn new(id: NodeId, has_internet: bool) -> Self {
        Self {
            id,
            online: true,
            has_internet,
            peers: BTreeSet::new(),
            bandwidth: 0,
            clients: 0,
        }
    }

    /// Number of directly connected peers.
    #[must_use]
    pub fn degree(&self) -> usize {
        self.peers.len()
    }

    /// True if `other` is a direct peer.
    #[must_use]
    pub fn is_connected_to(&self, other: &NodeId) -> bool {
        self.peers.contains(other)
    }
}

/// Serializable view of a [`Node`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSummary {
    /// Node identifier.
    pub id: NodeId,
    /// Online flag.
    pub online: bool,
    /// Internet flag.
    pub has_internet: bool,
    /// Number of peers.
    pub peer_count: usize,
    /// Advertised bandwidth in kbit/s.
    pub bandwidth: u64,
    /// Clients served.
    pub clients: u32,
}

impl From<&Node> for NodeSummary {
    fn from(node: &Node) -> Self {
        Self {
            id: node.id.clone(),
            online: node.online,
            has_internet: node.has_internet,
            peer_count: node.degree(),
            bandwidth: node.bandwidth,
            clients: node.clients,
        }
    }
}

/// Aggregate statistics for a topology.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopologyStats {
    /// Registered nodes.
    pub nodes: usize,
    /// Undirected peer edges.
    pub edges: usize,
    /// Nodes currently online.
    pub online: usize,
    /// Nodes with internet access.
    pub with_internet: usize,
    /// Mean number of peers per node.
    pub average_degree: f64,
}
