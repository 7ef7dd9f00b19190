//! Configuration for gossip propagation and relay resolution.

use std::time::Duration;

use crate::error::{MeshError, Result};

/// Configuration for the gossip engine.
#[derive(Debug, Clone, PartialEq)]
pub struct GossipConfig {
    /// Number of peers each node forwards to.
    pub fanout: usize,
    /// Maximum number of hops a message travels.
    pub max_hops: u32,
    /// Probability in `[0, 1]` that a single forward is lost.
    pub packet_loss_rate: f64,
    /// Simulated latency added per successful hop.
    pub per_hop_latency: Duration,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            fanout: 3,
            max_hops: 6,
            packet_loss_rate: 0.0,
            per_hop_latency: Duration::from_millis(50),
        }
    }
}

impl GossipConfig {
    /// Sets the fanout factor.
    #[must_use]
    pub const fn with_fanout(mut self, fanout: usize) -> Self {
        self.fanout = fanout;
        self
    }

    /// Sets the maximum hop count.
    #[must_use]
    pub const fn with_max_hops(mut self, max_hops: u32) -> Self {
        self.max_hops = max_hops;
        self
    }

    /// Sets the packet loss rate.
    #[must_use]
    pub const fn with_packet_loss_rate(mut self, rate: f64) -> Self {
        self.packet_loss_rate = rate;
        self
    }

    /// Sets the simulated per-hop latency.
    #[must_use]
    pub const fn with_per_hop_latency(mut self, latency: Duration) -> Self {
        self.per_hop_latency = latency;
        self
    }

    /// Checks that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::Config`] if the fanout is zero or the loss rate
    /// is outside `[0, 1]`.
    pub fn validate(&self) -> Result<()> {
        if self.fanout == 0 {
            return Err(MeshError::Config("gossip fanout must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.packet_loss_rate) {
            return Err(MeshError::Config(format!(
                "packet loss rate {} is outside [0, 1]",
                self.packet_loss_rate
            )));
        }
        Ok(())
    }
}

/// Configuration for the relay resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Longest path, counted in nodes including the source, the search explores.
    pub max_hops: usize,
    /// Fixed latency assumed per hop when estimating path latency.
    pub per_hop_latency: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            max_hops: 5,
            per_hop_latency: Duration::from_millis(50),
        }
    }
}

impl RelayConfig {
    /// Sets the maximum hop count.
    #[must_use]
    pub const fn with_max_hops(mut self, max_hops: usize) -> Self {
        self.max_hops = max_hops;
        self
    }

    /// Sets the per-hop latency.
    #[must_use]
    pub const fn with_per_hop_latency(mut self, latency: Duration) -> Self {
        self.per_hop_latency = latency;
        self
    }
}

/// Configuration for a whole mesh: topology degree plus engine settings.
#[derive(Debug, Clone, PartialEq)]
pub struct MeshConfig {
    /// Target number of peers per node when building a random topology.
    pub degree: usize,
    /// Gossip settings.
    pub gossip: GossipConfig,
    /// Relay settings.
    pub relay: RelayConfig,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            degree: 4,
            gossip: GossipConfig::default(),
            relay: RelayConfig::default(),
        }
    }
}

impl MeshConfig {
    /// Creates a config tuned for small meshes.
    #[must_use]
    pub fn small_network() -> Self {
        Self {
            degree: 3,
            gossip: GossipConfig::default().with_fanout(2).with_max_hops(4),
            relay: RelayConfig::default().with_max_hops(4),
        }
    }

    /// Creates a config tuned for large meshes.
    #[must_use]
    pub fn large_network() -> Self {
        Self {
            degree: 6,
            gossip: GossipConfig::default().with_fanout(5).with_max_hops(8),
            relay: RelayConfig::default().with_max_hops(8),
        }
    }

    /// Sets the topology degree.
    #[must_use]
    pub const fn with_degree(mut self, degree: usize) -> Self {
        self.degree = degree;
        self
    }

    /// Sets the gossip settings.
    #[must_use]
    pub const fn with_gossip(mut self, gossip: GossipConfig) -> Self {
        self.gossip = gossip;
        self
    }

    /// Sets the relay settings.
    #[must_use]
    pub const fn with_relay(mut self, relay: RelayConfig) -> Self {
        self.relay = relay;
        self
    }

    /// Validates the nested configurations.
    ///
    /// # Errors
    ///
    /// Returns the first [`MeshError::Config`] found.
    pub fn validate(&self) -> Result<()> {
        self.gossip.validate()
    }
}
