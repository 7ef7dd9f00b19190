//! Relay path resolution for nodes without internet access.
//!
//! The resolver runs a breadth-first search from the source over online
//! peers and stops at the first internet-capable node it discovers, which is
//! therefore at minimum hop distance. Peers are visited in sorted id order,
//! so ties between equally distant gateways go to the smallest id on the
//! earliest branch. Nothing is cached: every query reads the current
//! topology.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::RelayConfig;
use crate::topology::MeshTopology;
use crate::types::NodeId;

/// Why a relay query failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayFailure {
    /// The source id is not registered.
    SourceNotFound,
    /// The source is offline and has no internet of its own.
    SourceOffline,
    /// No internet-capable node is reachable within the hop limit.
    NoPathWithinMaxHops,
}

impl fmt::Display for RelayFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::SourceNotFound => "source not found",
            Self::SourceOffline => "source offline",
            Self::NoPathWithinMaxHops => "no path within max hops",
        })
    }
}

/// Result of a relay query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayPath {
    /// Node the query started from.
    pub source: NodeId,
    /// Nodes from the source to the gateway, both included. Empty on failure.
    pub path: Vec<NodeId>,
    /// Number of edges in `path`.
    pub hop_count: usize,
    /// Whether a gateway was found.
    pub success: bool,
    /// Reason for failure, if any.
    pub failure_reason: Option<RelayFailure>,
    /// `hop_count` times the configured per-hop latency.
    pub estimated_latency: Duration,
}

impl RelayPath {
    fn found(source: NodeId, path: Vec<NodeId>, per_hop: Duration) -> Self {
        let hop_count = path.len().saturating_sub(1);
        Self {
            source,
            estimated_latency: per_hop * u32::try_from(hop_count).unwrap_or(u32::MAX),
            path,
            hop_count,
            success: true,
            failure_reason: None,
        }
    }

    fn failed(source: NodeId, reason: RelayFailure) -> Self {
        Self {
            source,
            path: Vec::new(),
            hop_count: 0,
            success: false,
            failure_reason: Some(reason),
            estimated_latency: Duration::ZERO,
        }
    }

    /// The gateway node, when the query succeeded.
    #[must_use]
    pub fn gateway(&self) -> Option<&NodeId> {
        if self.success { self.path.last() } else { None }
    }
}

/// How well the current topology serves internet-less nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayCoverage {
    /// Online nodes without internet.
    pub candidates: usize,
    /// Candidates with a relay path.
    pub resolved: usize,
    /// Candidates without one.
    pub unresolved: usize,
    /// Mean hop count over resolved candidates.
    pub mean_hops: f64,
}

/// Finds relay paths over a shared topology.
#[derive(Debug, Clone)]
pub struct RelayResolver {
    topology: Arc<MeshTopology>,
    config: RelayConfig,
}

impl RelayResolver {
    /// Creates a resolver.
    #[must_use]
    pub const fn new(topology: Arc<MeshTopology>, config: RelayConfig) -> Self {
        Self { topology, config }
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Finds the nearest internet-capable node reachable from `source`.
    #[must_use]
    pub fn find_relay_path(&self, source: &NodeId) -> RelayPath {
        let Some(origin) = self.topology.snapshot(source) else {
            return self.fail(source, RelayFailure::SourceNotFound);
        };
        if origin.has_internet {
            return RelayPath::found(
                source.clone(),
                vec![source.clone()],
                self.config.per_hop_latency,
            );
        }
        if !origin.online {
            return self.fail(source, RelayFailure::SourceOffline);
        }

        let mut visited: HashSet<NodeId> = HashSet::from([source.clone()]);
        let mut parents: HashMap<NodeId, NodeId> = HashMap::new();
        // (node, number of nodes on its path including the source)
        let mut frontier: VecDeque<(NodeId, usize)> = VecDeque::from([(source.clone(), 1)]);

        while let Some((id, path_len)) = frontier.pop_front() {
            if path_len >= self.config.max_hops {
                continue;
            }
            let Some(node) = self.topology.snapshot(&id) else {
                continue;
            };

            for peer in &node.peers {
                if visited.contains(peer) {
                    continue;
                }
                let Some(candidate) = self.topology.snapshot(peer) else {
                    continue;
                };
                if !candidate.online {
                    continue;
                }

                visited.insert(peer.clone());
                parents.insert(peer.clone(), id.clone());

                if candidate.has_internet {
                    let path = trace_back(&parents, source, peer);
                    let found = RelayPath::found(source.clone(), path, self.config.per_hop_latency);
                    debug!(
                        source = %source,
                        gateway = %peer,
                        hops = found.hop_count,
                        "relay path found"
                    );
                    return found;
                }
                frontier.push_back((peer.clone(), path_len + 1));
            }
        }

        self.fail(source, RelayFailure::NoPathWithinMaxHops)
    }

    /// Resolves every online node without internet and summarises the result.
    #[must_use]
    pub fn relay_coverage(&self) -> RelayCoverage {
        let mut candidates = 0;
        let mut resolved = 0;
        let mut total_hops = 0;

        for id in self.topology.node_ids() {
            let Some(node) = self.topology.snapshot(&id) else {
                continue;
            };
            if node.has_internet || !node.online {
                continue;
            }
            candidates += 1;
            let path = self.find_relay_path(&id);
            if path.success {
                resolved += 1;
                total_hops += path.hop_count;
            }
        }

        #[allow(clippy::cast_precision_loss)]
        let mean_hops = if resolved == 0 {
            0.0
        } else {
            total_hops as f64 / resolved as f64
        };
        RelayCoverage {
            candidates,
            resolved,
            unresolved: candidates - resolved,
            mean_hops,
        }
    }

    fn fail(&self, source: &NodeId, reason: RelayFailure) -> RelayPath {
        debug!(source = %source, %reason, max_hops = self.config.max_hops, "relay path not found");
        RelayPath::failed(source.clone(), reason)
    }
}

fn trace_back(parents: &HashMap<NodeId, NodeId>, source: &NodeId, target: &NodeId) -> Vec<NodeId> {
    let mut path = vec![target.clone()];
    let mut current = target;
    while current != source {
        match parents.get(current) {
            Some(parent) => {
                path.push(parent.clone());
                current = parent;
            }
            None => break,
        }
    }
    path.reverse();
    path
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(n: usize, max_hops: usize) -> (RelayResolver, Vec<NodeId>) {
        let topology = Arc::new(MeshTopology::new());
        let ids: Vec<NodeId> = (0..n)
            .map(|i| {
                topology
                    .create_node(Some(NodeId::new(i.to_string())), i == n - 1)
                    .expect("node")
            })
            .collect();
        for pair in ids.windows(2) {
            topology.connect_nodes(&pair[0], &pair[1]).expect("connect");
        }
        let resolver = RelayResolver::new(topology, RelayConfig::default().with_max_hops(max_hops));
        (resolver, ids)
    }

    #[test]
    fn test_five_node_chain_reaches_gateway() {
        let (resolver, ids) = chain(5, 5);
        let path = resolver.find_relay_path(&ids[0]);

        assert!(path.success);
        assert_eq!(path.path, ids);
        assert_eq!(path.hop_count, 4);
        assert_eq!(path.estimated_latency, Duration::from_millis(200));
        assert_eq!(path.gateway(), Some(&ids[4]));
    }

    #[test]
    fn test_seven_node_chain_exceeds_max_hops() {
        let (resolver, ids) = chain(7, 5);
        let path = resolver.find_relay_path(&ids[0]);

        assert!(!path.success);
        assert_eq!(path.failure_reason, Some(RelayFailure::NoPathWithinMaxHops));
        assert_eq!(
            path.failure_reason.map(|r| r.to_string()).as_deref(),
            Some("no path within max hops")
        );
        assert!(path.path.is_empty());
    }

    #[test]
    fn test_internet_source_is_trivial_path() {
        let (resolver, ids) = chain(3, 5);
        let path = resolver.find_relay_path(&ids[2]);
        assert!(path.success);
        assert_eq!(path.path, vec![ids[2].clone()]);
        assert_eq!(path.hop_count, 0);
        assert_eq!(path.estimated_latency, Duration::ZERO);
    }

    #[test]
    fn test_unknown_and_offline_sources() {
        let (resolver, ids) = chain(3, 5);
        let ghost = resolver.find_relay_path(&NodeId::new("ghost"));
        assert_eq!(ghost.failure_reason, Some(RelayFailure::SourceNotFound));
        assert_eq!(ghost.failure_reason.map(|r| r.to_string()).as_deref(), Some("source not found"));

        resolver.topology.set_online(&ids[0], false).expect("offline");
        let offline = resolver.find_relay_path(&ids[0]);
        assert_eq!(offline.failure_reason, Some(RelayFailure::SourceOffline));
    }

    #[test]
    fn test_offline_relay_blocks_path_until_it_returns() {
        let (resolver, ids) = chain(4, 5);
        resolver.topology.set_online(&ids[2], false).expect("offline");
        assert!(!resolver.find_relay_path(&ids[0]).success);

        resolver.topology.set_online(&ids[2], true).expect("online");
        assert!(resolver.find_relay_path(&ids[0]).success);
    }

    #[test]
    fn test_prefers_fewest_hops_then_sorted_order() {
        let topology = Arc::new(MeshTopology::new());
        let add = |id: &str, internet: bool| {
            topology
                .create_node(Some(NodeId::new(id)), internet)
                .expect("node")
        };
        let src = add("src", false);
        let a = add("a", false);
        let b = add("b", false);
        let far = add("far", true);
        let gw_b = add("gw-b", true);
        let gw_c = add("gw-c", true);
        let c = add("c", false);

        // src - a - b - {far, gw-b}   3 hops
        // src - c - gw-c              2 hops
        topology.connect_nodes(&src, &a).expect("edge");
        topology.connect_nodes(&a, &b).expect("edge");
        topology.connect_nodes(&b, &far).expect("edge");
        topology.connect_nodes(&b, &gw_b).expect("edge");
        topology.connect_nodes(&src, &c).expect("edge");
        topology.connect_nodes(&c, &gw_c).expect("edge");

        let resolver = RelayResolver::new(topology, RelayConfig::default());
        let path = resolver.find_relay_path(&src);
        assert_eq!(path.path, vec![src, c, gw_c]);
        assert_eq!(path.hop_count, 2);
    }

    #[test]
    fn test_equal_hop_tie_goes_to_sorted_peer() {
        let topology = Arc::new(MeshTopology::new());
        let src = topology.create_node(Some("src".into()), false).expect("src");
        let z = topology.create_node(Some("z-gw".into()), true).expect("z");
        let a = topology.create_node(Some("a-gw".into()), true).expect("a");
        topology.connect_nodes(&src, &z).expect("edge");
        topology.connect_nodes(&src, &a).expect("edge");

        let resolver = RelayResolver::new(topology, RelayConfig::default());
        assert_eq!(resolver.find_relay_path(&src).gateway(), Some(&a));
    }

    #[test]
    fn test_relay_coverage_counts_candidates() {
        let (resolver, ids) = chain(7, 5);
        // Nodes 2..=5 are within reach of gateway 6, nodes 0 and 1 are not.
        let coverage = resolver.relay_coverage();
        assert_eq!(coverage.candidates, 6);
        assert_eq!(coverage.resolved, 4);
        assert_eq!(coverage.unresolved, 2);
        assert!((coverage.mean_hops - 2.5).abs() < 1e-9);

        resolver.topology.set_online(&ids[0], false).expect("offline");
        assert_eq!(resolver.relay_coverage().candidates, 5);
    }
}
