//! # nightframe-cli
//!
//! NIGHTFRAME command-line interface.
//!
//! Provides commands for:
//! - Mesh simulation (gossip coverage and relay reachability)
//! - Relay path checks along a chain of nodes
//! - Host load inspection against degradation thresholds
//!
//! Everything runs locally against an in-memory mesh; no node needs to be
//! running.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod commands;
pub mod error;
pub mod output;

pub use cli::{ChainArgs, Cli, Commands, Format, LoadArgs, SimulateArgs};
pub use error::CliError;
pub use output::OutputFormat;
