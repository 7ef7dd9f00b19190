//! Epidemic gossip propagation over the peer graph.
//!
//! One call to [`GossipEngine::propagate`] models a single epidemic round run
//! to quiescence: every node that receives the message forwards it once to up
//! to `fanout` random peers that have not received it yet. A node is marked as
//! received on first contact and is never revisited, even if a shorter path
//! to it turns up later in the same run.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::GossipConfig;
use crate::error::{MeshError, Result};
use crate::topology::MeshTopology;
use crate::types::NodeId;

/// A message disseminated through the mesh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GossipMessage {
    /// Message identifier.
    pub id: String,
    /// Node the message originates from.
    pub source: NodeId,
    /// Opaque payload.
    pub payload: Vec<u8>,
}

impl GossipMessage {
    /// Creates a message.
    #[must_use]
    pub fn new(id: impl Into<String>, source: NodeId, payload: Vec<u8>) -> Self {
        Self {
            id: id.into(),
            source,
            payload,
        }
    }
}

/// Outcome of one propagation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropagationResult {
    /// Message that was propagated.
    pub message_id: String,
    /// Originating node.
    pub source: NodeId,
    /// Nodes that received the message, the source included.
    pub nodes_reached: usize,
    /// Nodes registered when the run started.
    pub total_nodes: usize,
    /// `nodes_reached / total_nodes` as a percentage.
    pub coverage_percent: f64,
    /// Forwards dropped by simulated packet loss.
    pub packets_lost: usize,
    /// Nodes that held the message at the hop limit and did not forward it.
    pub dropped_at_max_hops: usize,
    /// Forwards addressed to offline peers.
    pub offline_unreached: usize,
    /// Number of nodes first reached at each hop distance.
    pub hop_distribution: BTreeMap<u32, usize>,
    /// Sum of simulated per-hop latency over every delivered forward.
    pub simulated_latency: Duration,
}

impl PropagationResult {
    /// Coverage as a fraction in `[0, 1]`.
    #[must_use]
    pub fn coverage(&self) -> f64 {
        coverage_fraction(self.nodes_reached, self.total_nodes)
    }

    /// Largest hop distance any node was reached at.
    #[must_use]
    pub fn max_hop(&self) -> u32 {
        self.hop_distribution.keys().next_back().copied().unwrap_or(0)
    }
}

/// Aggregate over repeated propagation runs from one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageSummary {
    /// Number of runs.
    pub runs: usize,
    /// Mean coverage percentage.
    pub mean_coverage_percent: f64,
    /// Lowest coverage percentage seen.
    pub min_coverage_percent: f64,
    /// Highest coverage percentage seen.
    pub max_coverage_percent: f64,
    /// Mean forwards lost per run.
    pub mean_packets_lost: f64,
}

/// Runs gossip propagation against a shared topology.
#[derive(Debug)]
pub struct GossipEngine {
    topology: Arc<MeshTopology>,
    config: GossipConfig,
    rng: Mutex<StdRng>,
}

impl GossipEngine {
    /// Creates an engine seeded from OS entropy.
    #[must_use]
    pub fn new(topology: Arc<MeshTopology>, config: GossipConfig) -> Self {
        Self {
            topology,
            config,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Replaces the engine's random source.
    #[must_use]
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = Mutex::new(rng);
        self
    }

    /// Reseeds the engine for reproducible runs.
    #[must_use]
    pub fn with_seed(self, seed: u64) -> Self {
        self.with_rng(StdRng::seed_from_u64(seed))
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &GossipConfig {
        &self.config
    }

    /// Propagates `message_id` from `source` using the engine's random source.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::NodeNotFound`] if `source` is not registered.
    pub fn propagate(&self, source: &NodeId, message_id: &str) -> Result<PropagationResult> {
        let mut rng = self.rng.lock();
        self.propagate_with_rng(source, message_id, &mut *rng)
    }

    /// Propagates using a caller-supplied random source.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::NodeNotFound`] if `source` is not registered.
    pub fn propagate_with_rng<R: Rng + ?Sized>(
        &self,
        source: &NodeId,
        message_id: &str,
        rng: &mut R,
    ) -> Result<PropagationResult> {
        let total_nodes = self.topology.len();
        if !self.topology.contains(source) {
            return Err(MeshError::NodeNotFound(source.clone()));
        }

        let loss = self.config.packet_loss_rate.clamp(0.0, 1.0);
        let mut received: HashSet<NodeId> = HashSet::from([source.clone()]);
        let mut frontier: VecDeque<(NodeId, u32)> = VecDeque::from([(source.clone(), 0)]);
        let mut hop_distribution = BTreeMap::new();
        let mut packets_lost = 0;
        let mut dropped_at_max_hops = 0;
        let mut offline_unreached = 0;
        let mut simulated_latency = Duration::ZERO;

        while let Some((id, hops)) = frontier.pop_front() {
            if hops >= self.config.max_hops {
                dropped_at_max_hops += 1;
                continue;
            }
            let Some(node) = self.topology.snapshot(&id) else {
                continue;
            };

            let mut targets: Vec<&NodeId> = node
                .peers
                .iter()
                .filter(|peer| !received.contains(*peer))
                .collect();
            targets.shuffle(rng);
            targets.truncate(self.config.fanout);

            for peer in targets {
                if loss > 0.0 && rng.gen_bool(loss) {
                    packets_lost += 1;
                    continue;
                }
                if !self.topology.snapshot(peer).is_some_and(|p| p.online) {
                    offline_unreached += 1;
                    continue;
                }

                simulated_latency += self.config.per_hop_latency;
                received.insert(peer.clone());
                frontier.push_back((peer.clone(), hops + 1));
                *hop_distribution.entry(hops + 1).or_insert(0) += 1;
            }
        }

        let nodes_reached = received.len();
        let result = PropagationResult {
            message_id: message_id.to_string(),
            source: source.clone(),
            nodes_reached,
            total_nodes,
            coverage_percent: coverage_fraction(nodes_reached, total_nodes) * 100.0,
            packets_lost,
            dropped_at_max_hops,
            offline_unreached,
            hop_distribution,
            simulated_latency,
        };
        debug!(
            message = message_id,
            source = %source,
            reached = nodes_reached,
            total = total_nodes,
            coverage = result.coverage_percent,
            lost = packets_lost,
            "gossip propagated"
        );
        Ok(result)
    }

    /// Runs `runs` independent propagations from `source` and aggregates them.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::Config`] when `runs` is zero and
    /// [`MeshError::NodeNotFound`] for an unknown source.
    pub fn propagate_many(&self, source: &NodeId, runs: usize) -> Result<CoverageSummary> {
        if runs == 0 {
            return Err(MeshError::Config("at least one run is required".into()));
        }

        let mut sum = 0.0;
        let mut min = f64::MAX;
        let mut max = f64::MIN;
        let mut lost = 0usize;
        for run in 0..runs {
            let result = self.propagate(source, &format!("run-{run}"))?;
            sum += result.coverage_percent;
            min = min.min(result.coverage_percent);
            max = max.max(result.coverage_percent);
            lost += result.packets_lost;
        }

        #[allow(clippy::cast_precision_loss)]
        let n = runs as f64;
        #[allow(clippy::cast_precision_loss)]
        let mean_packets_lost = lost as f64 / n;
        Ok(CoverageSummary {
            runs,
            mean_coverage_percent: sum / n,
            min_coverage_percent: min,
            max_coverage_percent: max,
            mean_packets_lost,
        })
    }
}

#[allow(clippy::cast_precision_loss)]
fn coverage_fraction(reached: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        reached as f64 / total as f64
    }
}
