//! Error types for nightframe-mesh.

use thiserror::Error;

use crate::types::NodeId;

/// Errors that can occur in mesh operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MeshError {
    /// No node with this id is registered.
    #[error("node not found: {0}")]
    NodeNotFound(NodeId),

    /// A node with this id is already registered.
    #[error("node already exists: {0}")]
    NodeAlreadyExists(NodeId),

    /// A node cannot be its own peer.
    #[error("cannot connect node {0} to itself")]
    SelfConnection(NodeId),

    /// Configuration rejected by validation.
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Result type for mesh operations.
pub type Result<T> = std::result::Result<T, MeshError>;
