//! Error types for nightframe-resilience.

use std::time::Duration;

use thiserror::Error;

use crate::pool::ResourceClass;

/// Errors surfaced by the resilience primitives.
///
/// Transient operation failures are never reported through this type: the
/// retry executor swallows them and yields `None`. These variants describe
/// the primitives refusing work.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResilienceError {
    /// The circuit breaker is open and rejected the call.
    #[error("circuit '{name}' is open")]
    CircuitOpen {
        /// Name of the breaker's call-site.
        name: String,
    },

    /// The rate limiter denied the attempt.
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited {
        /// How long the caller should wait before trying again.
        retry_after: Duration,
    },

    /// The resource pool for a class is closed.
    #[error("resource pool for {class} is closed")]
    PoolClosed {
        /// The resource class whose pool was closed.
        class: ResourceClass,
    },

    /// Waiting for a resource slot timed out.
    #[error("timed out after {waited:?} waiting for a {class} slot")]
    AcquireTimeout {
        /// The resource class.
        class: ResourceClass,
        /// How long we waited.
        waited: Duration,
    },

    /// The wait was cancelled by the caller.
    #[error("operation cancelled")]
    Cancelled,

    /// The guarded operation itself failed.
    #[error("operation failed: {0}")]
    Operation(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type for resilience operations.
pub type Result<T> = std::result::Result<T, ResilienceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circuit_open_display() {
        let err = ResilienceError::CircuitOpen {
            name: "relay-upstream".to_string(),
        };
        assert_eq!(err.to_string(), "circuit 'relay-upstream' is open");
    }

    #[test]
    fn test_pool_closed_display() {
        let err = ResilienceError::PoolClosed {
            class: ResourceClass::File,
        };
        assert_eq!(err.to_string(), "resource pool for file is closed");
    }

    #[test]
    fn test_cancelled_display() {
        assert_eq!(ResilienceError::Cancelled.to_string(), "operation cancelled");
    }
}
