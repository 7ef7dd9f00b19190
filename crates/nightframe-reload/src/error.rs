//! Error types for nightframe-reload.

use thiserror::Error;

/// Errors returned when handing an update to the coordinator.
///
/// Failures while an update is being applied are not returned to the caller;
/// they surface as [`crate::ReloadEvent::Rejected`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReloadError {
    /// The queue is at capacity.
    #[error("reload queue is full ({capacity} pending)")]
    QueueFull {
        /// Configured queue capacity.
        capacity: usize,
    },

    /// The descriptor failed the sanity check.
    #[error("invalid update descriptor: {0}")]
    InvalidDescriptor(String),

    /// The coordinator has shut down.
    #[error("reload coordinator is closed")]
    Closed,

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type for reload operations.
pub type Result<T> = std::result::Result<T, ReloadError>;
