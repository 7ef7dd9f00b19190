//! In-process boundary used by the orchestration layer.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::info;

use crate::config::MeshConfig;
use crate::error::Result;
use crate::gossip::{GossipEngine, GossipMessage, PropagationResult};
use crate::relay::{RelayFailure, RelayPath, RelayResolver};
use crate::topology::MeshTopology;
use crate::types::NodeId;

/// Number of announcements kept in the service history.
pub const ANNOUNCEMENT_HISTORY: usize = 256;

/// Notifications published by [`MeshService`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MeshEvent {
    /// An update announcement finished propagating.
    AnnouncementPropagated {
        /// Update identifier.
        update_id: String,
        /// Nodes reached.
        nodes_reached: usize,
        /// Coverage percentage.
        coverage_percent: f64,
    },
    /// A relay query completed.
    RelayQueried {
        /// Queried node.
        node: NodeId,
        /// Gateway found, if any.
        gateway: Option<NodeId>,
        /// Failure reason, if any.
        failure: Option<RelayFailure>,
    },
}

/// Gossip and relay operations for one local node.
#[derive(Debug)]
pub struct MeshService {
    local: NodeId,
    topology: Arc<MeshTopology>,
    gossip: GossipEngine,
    relay: RelayResolver,
    history: Mutex<VecDeque<GossipMessage>>,
    events: broadcast::Sender<MeshEvent>,
}

impl MeshService {
    /// Creates a service announcing from `local`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::MeshError::Config`] if the configuration is invalid.
    pub fn new(local: NodeId, topology: Arc<MeshTopology>, config: &MeshConfig) -> Result<Self> {
        config.validate()?;
        let (events, _) = broadcast::channel(256);
        Ok(Self {
            gossip: GossipEngine::new(Arc::clone(&topology), config.gossip.clone()),
            relay: RelayResolver::new(Arc::clone(&topology), config.relay.clone()),
            local,
            topology,
            history: Mutex::new(VecDeque::new()),
            events,
        })
    }

    /// Replaces the gossip engine's random source with a seeded one.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.gossip = self.gossip.with_seed(seed);
        self
    }

    /// The node announcements originate from.
    #[must_use]
    pub const fn local(&self) -> &NodeId {
        &self.local
    }

    /// The shared topology.
    #[must_use]
    pub fn topology(&self) -> &Arc<MeshTopology> {
        &self.topology
    }

    /// Subscribes to service events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<MeshEvent> {
        self.events.subscribe()
    }

    /// Announces an update to the mesh from the local node.
    ///
    /// # Errors
    ///
    /// Returns [`crate::MeshError::NodeNotFound`] if the local node has been
    /// removed from the topology.
    pub fn enqueue_update_announcement(
        &self,
        update_id: &str,
        payload: Vec<u8>,
    ) -> Result<PropagationResult> {
        let message = GossipMessage::new(update_id, self.local.clone(), payload);
        let result = self.gossip.propagate(&message.source, &message.id)?;

        {
            let mut history = self.history.lock();
            if history.len() >= ANNOUNCEMENT_HISTORY {
                history.pop_front();
            }
            history.push_back(message);
        }

        info!(
            update = update_id,
            reached = result.nodes_reached,
            coverage = result.coverage_percent,
            "update announced"
        );
        let _ = self.events.send(MeshEvent::AnnouncementPropagated {
            update_id: update_id.to_string(),
            nodes_reached: result.nodes_reached,
            coverage_percent: result.coverage_percent,
        });
        Ok(result)
    }

    /// Finds a relay path for `node_id` against the current topology.
    #[must_use]
    pub fn query_relay_path(&self, node_id: &NodeId) -> RelayPath {
        let path = self.relay.find_relay_path(node_id);
        let _ = self.events.send(MeshEvent::RelayQueried {
            node: node_id.clone(),
            gateway: path.gateway().cloned(),
            failure: path.failure_reason,
        });
        path
    }

    /// Announcements made so far, oldest first.
    #[must_use]
    pub fn announcements(&self) -> Vec<GossipMessage> {
        self.history.lock().iter().cloned().collect()
    }
}
