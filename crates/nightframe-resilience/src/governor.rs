//! Facade bundling the resilience primitives a node runs with.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::circuit::{BreakerConfig, CircuitBreaker};
use crate::continuity::ContinuityTracker;
use crate::degradation::{DegradationController, DegradationThresholds};
use crate::error::Result;
use crate::events::{DEFAULT_EVENT_CAPACITY, EventBus, GovernorEvent};
use crate::liveness::{LivenessConfig, LivenessTimer};
use crate::load::{LoadSource, spawn_load_monitor};
use crate::pool::{PoolConfig, ResourceClass, ResourcePool};
use crate::rate_limit::{RateLimitConfig, RateLimiter};
use crate::retry::{RetryExecutor, RetryPolicy};

/// Configuration for a [`ResourceGovernor`].
#[derive(Debug, Clone, PartialEq)]
pub struct GovernorConfig {
    /// Name used for the governor's circuit breaker.
    pub name: String,
    /// Circuit breaker settings.
    pub breaker: BreakerConfig,
    /// Rate limiter settings.
    pub rate_limit: RateLimitConfig,
    /// Degradation thresholds.
    pub thresholds: DegradationThresholds,
    /// Pool sizes.
    pub pool: PoolConfig,
    /// Liveness settings.
    pub liveness: LivenessConfig,
    /// How often the load monitor samples.
    pub sample_interval: Duration,
    /// Event channel capacity.
    pub event_capacity: usize,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            name: "node".to_string(),
            breaker: BreakerConfig::default(),
            rate_limit: RateLimitConfig::default(),
            thresholds: DegradationThresholds::default(),
            pool: PoolConfig::default(),
            liveness: LivenessConfig::default(),
            sample_interval: Duration::from_secs(10),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl GovernorConfig {
    /// Sets the breaker name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the breaker configuration.
    #[must_use]
    pub const fn with_breaker(mut self, breaker: BreakerConfig) -> Self {
        self.breaker = breaker;
        self
    }

    /// Sets the rate limiter configuration.
    #[must_use]
    pub const fn with_rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    /// Sets the pool configuration.
    #[must_use]
    pub const fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }
}

/// One node's resilience toolkit.
///
/// All primitives publish on a single event bus. Background tasks started
/// with [`ResourceGovernor::start`] stop when [`ResourceGovernor::shutdown`]
/// is called.
#[derive(Debug)]
pub struct ResourceGovernor {
    events: EventBus,
    breaker: CircuitBreaker,
    retry: RetryExecutor,
    limiter: Arc<RateLimiter>,
    degradation: Arc<DegradationController>,
    pool: ResourcePool,
    liveness: Arc<LivenessTimer>,
    continuity: ContinuityTracker,
    queue_depth: Arc<AtomicUsize>,
    sample_interval: Duration,
    cancel: CancellationToken,
}

impl Default for ResourceGovernor {
    fn default() -> Self {
        Self::new(GovernorConfig::default())
    }
}

impl ResourceGovernor {
    /// Builds the governor.
    #[must_use]
    pub fn new(config: GovernorConfig) -> Self {
        let events = EventBus::new(config.event_capacity);
        Self {
            breaker: CircuitBreaker::new(config.name, config.breaker).with_events(events.clone()),
            retry: RetryExecutor::new(),
            limiter: Arc::new(RateLimiter::new(&config.rate_limit).with_events(events.clone())),
            degradation: Arc::new(
                DegradationController::new(config.thresholds).with_events(events.clone()),
            ),
            pool: ResourcePool::new(config.pool),
            liveness: Arc::new(LivenessTimer::new(config.liveness).with_events(events.clone())),
            continuity: ContinuityTracker::new(),
            queue_depth: Arc::new(AtomicUsize::new(0)),
            sample_interval: config.sample_interval,
            cancel: CancellationToken::new(),
            events,
        }
    }

    /// Subscribes to events from every primitive.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<GovernorEvent> {
        self.events.subscribe()
    }

    /// Runs `op` with retries, consulting the circuit breaker before each
    /// attempt. Returns `None` when every attempt failed or was refused.
    ///
    /// Dropping the returned future mid-attempt releases the breaker; a
    /// half-open attempt abandoned that way re-opens the circuit.
    pub async fn execute<F, Fut, T, E>(&self, mut op: F, policy: &RetryPolicy) -> Option<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: fmt::Display,
    {
        let breaker = &self.breaker;
        let result = self
            .retry
            .execute_cancellable(
                || {
                    let attempt = breaker.admit().map(|permit| (permit, op()));
                    async move {
                        let Some((permit, fut)) = attempt else {
                            return Err(format!("circuit '{}' is open", breaker.name()));
                        };
                        match fut.await {
                            Ok(value) => {
                                permit.succeeded();
                                Ok(value)
                            }
                            Err(e) => {
                                permit.failed();
                                Err(e.to_string())
                            }
                        }
                    }
                },
                policy,
                &self.cancel,
            )
            .await;

        if result.is_some() {
            self.continuity.record("execute");
            self.liveness.heartbeat();
        }
        result
    }

    /// Runs `op` while holding a slot of `class`.
    ///
    /// # Errors
    ///
    /// See [`ResourcePool::guard`].
    pub async fn guard<F, Fut, T, E>(&self, class: ResourceClass, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: fmt::Display,
    {
        self.pool.guard(class, op, &self.cancel).await
    }

    /// Asks the rate limiter whether one more attempt may proceed.
    pub fn allow(&self) -> bool {
        self.limiter.allow()
    }

    /// Counter the load monitor reads as the current queue depth.
    #[must_use]
    pub fn queue_depth(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.queue_depth)
    }

    /// Starts the load monitor and liveness checker.
    pub fn start<S: LoadSource>(&self, source: S) -> Vec<JoinHandle<()>> {
        info!(interval = ?self.sample_interval, "starting resource governor");
        vec![
            spawn_load_monitor(
                source,
                Arc::clone(&self.degradation),
                Some(Arc::clone(&self.limiter)),
                Arc::clone(&self.queue_depth),
                self.sample_interval,
                self.cancel.child_token(),
            ),
            self.liveness.spawn_checker(self.cancel.child_token()),
        ]
    }

    /// Cancels background tasks and any in-progress waits.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        self.pool.close();
    }

    /// The circuit breaker.
    #[must_use]
    pub const fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// The retry executor.
    #[must_use]
    pub const fn retry(&self) -> &RetryExecutor {
        &self.retry
    }

    /// The rate limiter.
    #[must_use]
    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// The degradation controller.
    #[must_use]
    pub fn degradation(&self) -> &DegradationController {
        &self.degradation
    }

    /// The resource pool.
    #[must_use]
    pub const fn pool(&self) -> &ResourcePool {
        &self.pool
    }

    /// The liveness timer.
    #[must_use]
    pub fn liveness(&self) -> &LivenessTimer {
        &self.liveness
    }

    /// The continuity tracker.
    #[must_use]
    pub const fn continuity(&self) -> &ContinuityTracker {
        &self.continuity
    }
}
