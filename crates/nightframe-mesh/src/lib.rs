//! # nightframe-mesh
//!
//! Peer mesh model for NIGHTFRAME nodes.
//!
//! This crate provides:
//!
//! - An in-memory peer graph with failure injection
//! - Epidemic gossip propagation with bounded fanout and hop count
//! - Relay path resolution for nodes without internet access
//!
//! ## Core Types
//!
//! - [`MeshTopology`]: node table and symmetric peer edges
//! - [`GossipEngine`]: one-round epidemic broadcast with simulated loss
//! - [`RelayResolver`]: minimum-hop search for an internet gateway
//! - [`MeshService`]: the announcement and relay boundary used by callers

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod gossip;
pub mod relay;
pub mod service;
pub mod topology;
pub mod types;

pub use config::{GossipConfig, MeshConfig, RelayConfig};
pub use error::{MeshError, Result};
pub use gossip::{CoverageSummary, GossipEngine, GossipMessage, PropagationResult};
pub use relay::{RelayCoverage, RelayFailure, RelayPath, RelayResolver};
pub use service::{MeshEvent, MeshService};
pub use topology::MeshTopology;
pub use types::{Node, NodeId, NodeSummary, TopologyStats};
