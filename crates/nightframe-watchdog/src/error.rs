//! Error types for nightframe-watchdog.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while supervising a binary.
///
/// Most of these never escape [`crate::UpdateSupervisor::run`]: step
/// failures inside the loop are logged and the loop keeps polling.
#[derive(Debug, Error)]
pub enum WatchdogError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Another supervisor already owns the binary.
    #[error("binary is already supervised by pid {pid} (lock file {})", lock.display())]
    AlreadyRunning {
        /// Pid recorded in the lock file.
        pid: u32,
        /// Path of the lock file.
        lock: PathBuf,
    },

    /// The update marker carried no usable digest.
    #[error("update signal does not contain a valid sha-256 digest")]
    MissingDigest,

    /// The candidate's digest did not match the expected one.
    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch {
        /// Hex digest announced in the update signal.
        expected: String,
        /// Hex digest of the candidate on disk.
        actual: String,
    },

    /// The child process could not be started.
    #[error("failed to start {}: {source}", binary.display())]
    Spawn {
        /// Binary that failed to start.
        binary: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The child did not exit in time after being killed.
    #[error("process {pid} did not exit after kill")]
    KillTimeout {
        /// Pid of the stuck process.
        pid: u32,
    },

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for watchdog operations.
pub type Result<T> = std::result::Result<T, WatchdogError>;
