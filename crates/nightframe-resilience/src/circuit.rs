//! Circuit breaker.
//!
//! A breaker guards one call-site. After `failure_threshold` consecutive
//! failures it opens and rejects calls until `cool_down` has elapsed, then
//! admits a single half-open trial whose outcome decides whether it closes
//! again or re-opens with a fresh cool-down.
//!
//! [`CircuitBreaker::admit`] hands out a [`CallPermit`]. A half-open permit
//! dropped before its outcome is recorded counts as a failed trial, so a
//! cancelled or timed-out call cannot leave the breaker waiting forever.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{ResilienceError, Result};
use crate::events::{EventBus, GovernorEvent};

/// State of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls flow normally.
    Closed,
    /// Calls are rejected until the cool-down elapses.
    Open,
    /// A single trial call is permitted.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Configuration for a circuit breaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// How long the circuit stays open before a trial call is allowed.
    pub cool_down: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cool_down: Duration::from_secs(30),
        }
    }
}

impl BreakerConfig {
    /// Sets the failure threshold (minimum 1).
    #[must_use]
    pub const fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = if threshold == 0 { 1 } else { threshold };
        self
    }

    /// Sets the cool-down window.
    #[must_use]
    pub const fn with_cool_down(mut self, cool_down: Duration) -> Self {
        self.cool_down = cool_down;
        self
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

/// Circuit breaker safe for concurrent callers.
///
/// All transitions happen under one lock so two callers racing through an
/// expired cool-down cannot both obtain the half-open trial.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
    events: Option<EventBus>,
}

impl CircuitBreaker {
    /// Creates a closed breaker for the named call-site.
    #[must_use]
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                trial_in_flight: false,
            }),
            events: None,
        }
    }

    /// Creates a breaker with default configuration.
    #[must_use]
    pub fn with_defaults(name: impl Into<String>) -> Self {
        Self::new(name, BreakerConfig::default())
    }

    /// Publishes state transitions on the given bus.
    #[must_use]
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Returns the call-site name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Returns the current state without triggering any transition.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Returns the current consecutive failure count.
    #[must_use]
    pub fn consecutive_failures(&self) -> u32 {
        self.inner.lock().consecutive_failures
    }

    /// Asks whether a call may proceed now.
    ///
    /// An open breaker whose cool-down has elapsed moves to half-open and
    /// grants exactly one trial; further calls are refused until that trial's
    /// outcome is recorded. Callers of this low-level form must always follow
    /// up with [`record_success`](Self::record_success) or
    /// [`record_failure`](Self::record_failure); prefer [`admit`](Self::admit).
    pub fn can_execute(&self) -> bool {
        self.try_admit().is_some()
    }

    /// Asks for permission to make one call.
    ///
    /// Returns `None` when the breaker refuses. The permit records nothing
    /// until [`CallPermit::succeeded`] or [`CallPermit::failed`] is called;
    /// dropping an unsettled half-open permit re-opens the circuit.
    #[must_use]
    pub fn admit(&self) -> Option<CallPermit<'_>> {
        self.try_admit().map(|trial| CallPermit {
            breaker: self,
            trial,
            settled: false,
        })
    }

    /// Returns `Some(true)` for the half-open trial, `Some(false)` for a
    /// normal closed-state call and `None` when refused.
    fn try_admit(&self) -> Option<bool> {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => Some(false),
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .map_or(Duration::MAX, |opened| opened.elapsed());
                if elapsed >= self.config.cool_down {
                    self.transition(&mut inner, CircuitState::HalfOpen);
                    inner.trial_in_flight = true;
                    Some(true)
                } else {
                    None
                }
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    None
                } else {
                    inner.trial_in_flight = true;
                    Some(true)
                }
            }
        }
    }

    /// Records a successful call.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures = 0;
        inner.trial_in_flight = false;
        if inner.state != CircuitState::Closed {
            inner.opened_at = None;
            self.transition(&mut inner, CircuitState::Closed);
        }
    }

    /// Records a failed call.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        inner.trial_in_flight = false;
        match inner.state {
            CircuitState::Closed => {
                if inner.consecutive_failures >= self.config.failure_threshold {
                    inner.opened_at = Some(Instant::now());
                    self.transition(&mut inner, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                inner.opened_at = Some(Instant::now());
                self.transition(&mut inner, CircuitState::Open);
            }
            CircuitState::Open => {
                // A late outcome from a call admitted before the trip.
            }
        }
    }

    fn abandon_trial(&self) {
        let mut inner = self.inner.lock();
        if inner.state != CircuitState::HalfOpen || !inner.trial_in_flight {
            return;
        }
        inner.trial_in_flight = false;
        inner.opened_at = Some(Instant::now());
        warn!(breaker = %self.name, "half-open call abandoned before completing");
        self.transition(&mut inner, CircuitState::Open);
    }

    /// Forces the breaker back to closed.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.trial_in_flight = false;
        if inner.state != CircuitState::Closed {
            self.transition(&mut inner, CircuitState::Closed);
        }
    }

    /// Runs `op` through the breaker, recording its outcome.
    ///
    /// # Errors
    ///
    /// Returns [`ResilienceError::CircuitOpen`] if the breaker refuses the
    /// call, or [`ResilienceError::Operation`] carrying the operation's error.
    pub async fn call<F, Fut, T, E>(&self, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: fmt::Display,
    {
        let Some(permit) = self.admit() else {
            return Err(ResilienceError::CircuitOpen {
                name: self.name.clone(),
            });
        };

        match op().await {
            Ok(value) => {
                permit.succeeded();
                Ok(value)
            }
            Err(e) => {
                permit.failed();
                Err(ResilienceError::Operation(e.to_string()))
            }
        }
    }

    fn transition(&self, inner: &mut BreakerInner, to: CircuitState) {
        let from = inner.state;
        if from == to {
            return;
        }
        inner.state = to;

        match to {
            CircuitState::Open => warn!(
                breaker = %self.name,
                failures = inner.consecutive_failures,
                "circuit opened"
            ),
            _ => info!(breaker = %self.name, %from, %to, "circuit state changed"),
        }

        if let Some(events) = &self.events {
            events.emit(GovernorEvent::CircuitStateChanged {
                name: self.name.clone(),
                from,
                to,
            });
        }
    }
}

/// Permission for one call through a [`CircuitBreaker`].
#[derive(Debug)]
#[must_use = "an unsettled half-open permit re-opens the circuit when dropped"]
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    settled: bool,
}

impl CallPermit<'_> {
    /// Whether this permit is the single half-open trial.
    #[must_use]
    pub const fn is_trial(&self) -> bool {
        self.trial
    }

    /// Records a successful outcome.
    pub fn succeeded(mut self) {
        self.settled = true;
        self.breaker.record_success();
    }

    /// Records a failed outcome.
    pub fn failed(mut self) {
        self.settled = true;
        self.breaker.record_failure();
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.trial {
            self.breaker.abandon_trial();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const COOL_DOWN: Duration = Duration::from_millis(20);

    fn fast_breaker(threshold: u32) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            BreakerConfig::default()
                .with_failure_threshold(threshold)
                .with_cool_down(COOL_DOWN),
        )
    }

    async fn past_cool_down() {
        tokio::time::advance(COOL_DOWN + Duration::from_millis(1)).await;
    }

    #[test]
    fn test_breaker_starts_closed() {
        let breaker = CircuitBreaker::with_defaults("svc");
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.can_execute());
        assert_eq!(breaker.config().failure_threshold, 5);
    }

    #[test]
    fn test_opens_after_exact_threshold() {
        let breaker = fast_breaker(3);

        breaker.record_failure();
        breaker.record_failure();
        assert!(breaker.can_execute());
        assert_eq!(breaker.state(), CircuitState::Closed);

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.can_execute());
    }

    #[test]
    fn test_success_resets_failure_count() {
        let breaker = fast_breaker(3);
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.consecutive_failures(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stays_open_until_cool_down_elapses() {
        let breaker = fast_breaker(1);
        breaker.record_failure();

        tokio::time::advance(COOL_DOWN - Duration::from_millis(1)).await;
        assert!(!breaker.can_execute());
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(breaker.can_execute());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_permits_exactly_one_trial() {
        let breaker = fast_breaker(2);
        breaker.record_failure();
        breaker.record_failure();
        assert!(!breaker.can_execute());

        past_cool_down().await;

        assert!(breaker.can_execute());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(!breaker.can_execute());
        assert!(!breaker.can_execute());
    }

    #[tokio::test(start_paused = true)]
    async fn test_trial_success_closes() {
        let breaker = fast_breaker(1);
        breaker.record_failure();
        past_cool_down().await;

        assert!(breaker.can_execute());
        breaker.record_success();

        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.can_execute());
        assert!(breaker.can_execute());
    }

    #[tokio::test(start_paused = true)]
    async fn test_trial_failure_reopens_with_fresh_cool_down() {
        let breaker = fast_breaker(1);
        breaker.record_failure();
        past_cool_down().await;

        assert!(breaker.can_execute());
        breaker.record_failure();

        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.can_execute());

        past_cool_down().await;
        assert!(breaker.can_execute());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_half_open_call_reopens() {
        let breaker = fast_breaker(1);
        breaker.record_failure();
        past_cool_down().await;

        let timed_out = tokio::time::timeout(
            Duration::from_millis(10),
            breaker.call(std::future::pending::<std::result::Result<(), String>>),
        )
        .await;
        assert!(timed_out.is_err());

        // The abandoned trial counts as a failure with a fresh cool-down.
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.can_execute());

        past_cool_down().await;
        assert!(breaker.can_execute());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_trial_permit_reopens() {
        let breaker = fast_breaker(1);
        breaker.record_failure();
        past_cool_down().await;

        let permit = breaker.admit().expect("trial");
        assert!(permit.is_trial());
        drop(permit);

        assert_eq!(breaker.state(), CircuitState::Open);
        past_cool_down().await;
        let permit = breaker.admit().expect("second trial");
        permit.succeeded();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn test_dropped_closed_permit_changes_nothing() {
        let breaker = fast_breaker(1);
        let permit = breaker.admit().expect("closed");
        assert!(!permit.is_trial());
        drop(permit);

        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.consecutive_failures(), 0);
    }

    #[test]
    fn test_reset_closes() {
        let breaker = fast_breaker(1);
        breaker.record_failure();
        breaker.reset();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.consecutive_failures(), 0);
    }

    #[test]
    fn test_transitions_are_published() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        let breaker = fast_breaker(1).with_events(bus);

        breaker.record_failure();

        let event = rx.try_recv().expect("event");
        assert_eq!(
            event,
            GovernorEvent::CircuitStateChanged {
                name: "test".to_string(),
                from: CircuitState::Closed,
                to: CircuitState::Open,
            }
        );
    }

    #[test]
    fn test_concurrent_trial_is_granted_once() {
        // Outside a runtime the breaker runs on the real clock.
        let breaker = Arc::new(fast_breaker(1));
        breaker.record_failure();
        std::thread::sleep(COOL_DOWN + Duration::from_millis(10));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let b = Arc::clone(&breaker);
                std::thread::spawn(move || b.can_execute())
            })
            .collect();

        let granted = handles
            .into_iter()
            .map(|h| h.join().expect("thread"))
            .filter(|allowed| *allowed)
            .count();
        assert_eq!(granted, 1);
    }

    #[tokio::test]
    async fn test_call_records_outcomes() {
        let breaker = fast_breaker(2);

        let ok: Result<u32> = breaker.call(|| async { Ok::<_, String>(7) }).await;
        assert_eq!(ok, Ok(7));

        let err: Result<u32> = breaker
            .call(|| async { Err::<u32, _>("boom".to_string()) })
            .await;
        assert_eq!(err, Err(ResilienceError::Operation("boom".to_string())));
        let _ = breaker
            .call(|| async { Err::<u32, _>("boom".to_string()) })
            .await;

        let rejected: Result<u32> = breaker.call(|| async { Ok::<_, String>(1) }).await;
        assert_eq!(
            rejected,
            Err(ResilienceError::CircuitOpen {
                name: "test".to_string()
            })
        );
    }
}
