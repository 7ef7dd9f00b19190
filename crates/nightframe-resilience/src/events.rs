//! Outbound event channel shared by the resilience primitives.
//!
//! Primitives publish state transitions here instead of calling back into
//! presentation code. Subscribers that fall behind lose the oldest events.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast;

use crate::circuit::CircuitState;
use crate::degradation::DegradationLevel;

/// Default capacity of the event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// An event emitted by one of the resilience primitives.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GovernorEvent {
    /// A circuit breaker changed state.
    CircuitStateChanged {
        /// Breaker call-site name.
        name: String,
        /// Previous state.
        from: CircuitState,
        /// New state.
        to: CircuitState,
    },
    /// The degradation level changed.
    DegradationChanged {
        /// Previous level.
        from: DegradationLevel,
        /// New level.
        to: DegradationLevel,
    },
    /// The rate limit was adjusted.
    RateLimitAdjusted {
        /// Previous limit.
        from: u32,
        /// New limit.
        to: u32,
    },
    /// No heartbeat was seen within the liveness threshold.
    LivenessTimeout {
        /// Time since the last heartbeat when the checker fired.
        silent_for: Duration,
    },
}

/// Broadcast bus for [`GovernorEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<GovernorEvent>,
}

impl EventBus {
    /// Creates a bus with the given channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publishes an event. Having no subscribers is not an error.
    pub fn emit(&self, event: GovernorEvent) {
        let _ = self.tx.send(event);
    }

    /// Subscribes to future events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<GovernorEvent> {
        self.tx.subscribe()
    }

    /// Returns the number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
