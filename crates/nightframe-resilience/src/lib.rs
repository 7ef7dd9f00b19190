//! Resource governance for NIGHTFRAME nodes.
//!
//! This crate keeps a node responsive when the things it depends on are
//! slow, failing, or overloaded:
//!
//! - **Circuit breaking**: stop calling a failing dependency for a cool-down
//! - **Retries**: linear backoff with a bounded error history
//! - **Rate limiting**: fixed-window limiter that tightens under load
//! - **Degradation**: map queue depth, CPU and memory to a service level
//! - **Pooling**: bounded concurrency per resource class
//! - **Liveness and continuity**: detect stalls and silent periods
//!
//! # Quick Start
//!
//! ```rust
//! use nightframe_resilience::{ResourceClass, ResourceGovernor, RetryPolicy};
//!
//! # tokio_test::block_on(async {
//! let governor = ResourceGovernor::default();
//!
//! let fetched = governor
//!     .execute(|| async { Ok::<_, String>("chunk") }, &RetryPolicy::default())
//!     .await;
//! assert_eq!(fetched, Some("chunk"));
//!
//! let hashed = governor
//!     .guard(ResourceClass::Cpu, || async { Ok::<_, String>(42) })
//!     .await;
//! assert_eq!(hashed, Ok(42));
//! # });
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::unwrap_used)]

pub mod circuit;
pub mod continuity;
pub mod degradation;
pub mod error;
pub mod events;
pub mod governor;
pub mod liveness;
pub mod load;
pub mod pool;
pub mod rate_limit;
pub mod retry;

pub use circuit::{BreakerConfig, CallPermit, CircuitBreaker, CircuitState};
pub use continuity::{ActivityRecord, ContinuityStatus, ContinuityTracker};
pub use degradation::{
    DegradationController, DegradationLevel, DegradationThresholds, LevelThreshold, LoadSample,
};
pub use error::{ResilienceError, Result};
pub use events::{EventBus, GovernorEvent};
pub use governor::{GovernorConfig, ResourceGovernor};
pub use liveness::{LivenessConfig, LivenessTimer};
pub use load::{LoadSource, SystemLoadSampler, spawn_load_monitor};
pub use pool::{PoolConfig, PoolPermit, ResourceClass, ResourcePool};
pub use rate_limit::{RateDecision, RateLimitConfig, RateLimiter};
pub use retry::{RecordedError, RetryExecutor, RetryPolicy};
