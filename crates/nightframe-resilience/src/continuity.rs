//! Activity continuity tracking.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;

/// Default number of activity records kept.
pub const DEFAULT_CAPACITY: usize = 1000;

/// Default silence after which continuity is considered broken.
pub const DEFAULT_MAX_SILENCE: Duration = Duration::from_secs(5 * 60);

/// One recorded activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivityRecord {
    /// Wall-clock time of the activity.
    pub at: DateTime<Utc>,
    /// What happened.
    pub activity: String,
}

/// Continuity report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContinuityStatus {
    /// False once the tracker has been silent longer than the limit.
    pub continuous: bool,
    /// Time since the last activity (or since creation if none yet).
    pub silent_for: Duration,
    /// Records currently held.
    pub recorded: usize,
}

#[derive(Debug)]
struct TrackerState {
    records: VecDeque<ActivityRecord>,
    last_activity: Instant,
}

/// Bounded history of recent activity.
#[derive(Debug)]
pub struct ContinuityTracker {
    capacity: usize,
    max_silence: Duration,
    state: Mutex<TrackerState>,
}

impl Default for ContinuityTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ContinuityTracker {
    /// Creates a tracker with default capacity and silence limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_CAPACITY, DEFAULT_MAX_SILENCE)
    }

    /// Creates a tracker with explicit limits.
    #[must_use]
    pub fn with_limits(capacity: usize, max_silence: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            max_silence,
            state: Mutex::new(TrackerState {
                records: VecDeque::with_capacity(capacity),
                last_activity: Instant::now(),
            }),
        }
    }

    /// Records an activity, evicting the oldest record when full.
    pub fn record(&self, activity: impl Into<String>) {
        let mut state = self.state.lock();
        if state.records.len() >= self.capacity {
            state.records.pop_front();
        }
        state.records.push_back(ActivityRecord {
            at: Utc::now(),
            activity: activity.into(),
        });
        state.last_activity = Instant::now();
    }

    /// True while the silence limit has not been exceeded.
    #[must_use]
    pub fn is_continuous(&self) -> bool {
        self.status().continuous
    }

    /// Current report.
    #[must_use]
    pub fn status(&self) -> ContinuityStatus {
        let state = self.state.lock();
        let silent_for = Instant::now().saturating_duration_since(state.last_activity);
        ContinuityStatus {
            continuous: silent_for <= self.max_silence,
            silent_for,
            recorded: state.records.len(),
        }
    }

    /// The most recent `n` records, newest last.
    #[must_use]
    pub fn recent(&self, n: usize) -> Vec<ActivityRecord> {
        let state = self.state.lock();
        let skip = state.records.len().saturating_sub(n);
        state.records.iter().skip(skip).cloned().collect()
    }
}
