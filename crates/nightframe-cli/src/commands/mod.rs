//! CLI command implementations.
//!
//! - [`simulate`] - Random mesh gossip and relay coverage
//! - [`chain`] - Relay path along a chain
//! - [`load`] - Host load and degradation level

pub mod chain;
pub mod load;
pub mod simulate;

pub use chain::ChainCommand;
pub use load::LoadCommand;
pub use simulate::SimulateCommand;
