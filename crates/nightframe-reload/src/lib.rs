//! In-process hot reload for NIGHTFRAME nodes.
//!
//! A [`HotReloadCoordinator`] takes update descriptors from anywhere in the
//! process and applies them one at a time on its own task, publishing a
//! [`ReloadEvent`] at each pipeline stage.
//!
//! ```rust,no_run
//! use nightframe_reload::{HotReloadCoordinator, ReloadConfig, UpdateDescriptor};
//!
//! # async fn example() -> nightframe_reload::Result<()> {
//! let coordinator = HotReloadCoordinator::start(ReloadConfig::default())?;
//! coordinator.enqueue(UpdateDescriptor::new("upd-42", "gossip", "1.4.0"))?;
//! coordinator.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::unwrap_used)]

pub mod config;
pub mod coordinator;
pub mod error;
pub mod types;

pub use config::ReloadConfig;
pub use coordinator::HotReloadCoordinator;
pub use error::{ReloadError, Result};
pub use types::{AppliedUpdate, ReloadEvent, UpdateDescriptor};
