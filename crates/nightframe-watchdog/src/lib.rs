//! NIGHTFRAME update supervisor.
//!
//! Runs a node binary as a child process and replaces it in place when a
//! verified update is staged next to it.
//!
//! ## Update protocol
//!
//! With the supervised binary at `/opt/nightframe/node`:
//!
//! 1. Write the new build to `/opt/nightframe/node.update`.
//! 2. Write its hex SHA-256 to `/opt/nightframe/update.signal`.
//!
//! The supervisor copies the candidate to `node.staged` and hashes that copy.
//! Only if it matches does it drain and kill the running child, back up the
//! old binary to `node.bak`, move the staged copy into place and relaunch. A
//! mismatch discards the signal and leaves the running binary untouched.
//!
//! ## Core Types
//!
//! - [`UpdateSupervisor`]: the polling state machine
//! - [`WatchdogConfig`]: paths and timings, loadable from JSON
//! - [`SupervisedProcess`]: a child and its process tree
//! - [`InstanceLock`]: one supervisor per binary

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::unwrap_used)]

pub mod config;
pub mod digest;
pub mod error;
pub mod lock;
pub mod process;
pub mod supervisor;

pub use config::{DEFAULT_SIGNAL_NAME, WatchdogConfig};
pub use error::{Result, WatchdogError};
pub use lock::InstanceLock;
pub use process::SupervisedProcess;
pub use supervisor::{SupervisorEvent, SupervisorState, SupervisorStatus, UpdateSupervisor};
