//! CLI error types.

use nightframe_mesh::MeshError;
use thiserror::Error;

/// CLI-specific errors.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Mesh model rejected an operation.
    #[error("mesh error: {0}")]
    Mesh(#[from] MeshError),

    /// Output formatting error.
    #[error("format error: {0}")]
    Format(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
