//! Load-based graceful degradation.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::events::{EventBus, GovernorEvent};

/// Degradation level, from normal operation (0) to critical (3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradationLevel {
    /// Level 0: full service.
    Normal = 0,
    /// Level 1: throttle incoming work.
    Reduced = 1,
    /// Level 2: skip non-essential work.
    Minimal = 2,
    /// Level 3: essential work only.
    Critical = 3,
}

impl DegradationLevel {
    /// Numeric level.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Level from its numeric value; values above 3 saturate to critical.
    #[must_use]
    pub const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Normal,
            1 => Self::Reduced,
            2 => Self::Minimal,
            _ => Self::Critical,
        }
    }
}

impl fmt::Display for DegradationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Normal => "normal",
            Self::Reduced => "reduced",
            Self::Minimal => "minimal",
            Self::Critical => "critical",
        };
        write!(f, "{name}")
    }
}

/// One snapshot of node load.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LoadSample {
    /// Pending work items.
    pub queue_depth: usize,
    /// CPU utilisation, 0–100.
    pub cpu_percent: f32,
    /// Memory utilisation, 0–100.
    pub memory_percent: f32,
}

impl LoadSample {
    /// Creates a sample.
    #[must_use]
    pub const fn new(queue_depth: usize, cpu_percent: f32, memory_percent: f32) -> Self {
        Self {
            queue_depth,
            cpu_percent,
            memory_percent,
        }
    }
}

/// Trigger values for one degradation level. Any single metric strictly
/// above its threshold is enough to reach the level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LevelThreshold {
    /// Queue depth threshold.
    pub queue_depth: usize,
    /// CPU percent threshold.
    pub cpu_percent: f32,
    /// Memory percent threshold.
    pub memory_percent: f32,
}

impl LevelThreshold {
    fn exceeded_by(&self, sample: &LoadSample) -> bool {
        sample.queue_depth > self.queue_depth
            || sample.cpu_percent > self.cpu_percent
            || sample.memory_percent > self.memory_percent
    }
}

/// Thresholds for levels 1, 2 and 3.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DegradationThresholds {
    /// Entry into [`DegradationLevel::Reduced`].
    pub reduced: LevelThreshold,
    /// Entry into [`DegradationLevel::Minimal`].
    pub minimal: LevelThreshold,
    /// Entry into [`DegradationLevel::Critical`].
    pub critical: LevelThreshold,
}

impl Default for DegradationThresholds {
    fn default() -> Self {
        Self {
            reduced: LevelThreshold {
                queue_depth: 100,
                cpu_percent: 70.0,
                memory_percent: 80.0,
            },
            minimal: LevelThreshold {
                queue_depth: 500,
                cpu_percent: 85.0,
                memory_percent: 90.0,
            },
            critical: LevelThreshold {
                queue_depth: 1000,
                cpu_percent: 95.0,
                memory_percent: 95.0,
            },
        }
    }
}

impl DegradationThresholds {
    /// Level implied by a sample; the highest matching level wins.
    #[must_use]
    pub fn level_for(&self, sample: &LoadSample) -> DegradationLevel {
        if self.critical.exceeded_by(sample) {
            DegradationLevel::Critical
        } else if self.minimal.exceeded_by(sample) {
            DegradationLevel::Minimal
        } else if self.reduced.exceeded_by(sample) {
            DegradationLevel::Reduced
        } else {
            DegradationLevel::Normal
        }
    }
}

/// Maps load samples to a degradation level and reports transitions.
#[derive(Debug)]
pub struct DegradationController {
    thresholds: DegradationThresholds,
    level: AtomicU8,
    events: Option<EventBus>,
}

impl Default for DegradationController {
    fn default() -> Self {
        Self::new(DegradationThresholds::default())
    }
}

impl DegradationController {
    /// Creates a controller at [`DegradationLevel::Normal`].
    #[must_use]
    pub fn new(thresholds: DegradationThresholds) -> Self {
        Self {
            thresholds,
            level: AtomicU8::new(DegradationLevel::Normal.as_u8()),
            events: None,
        }
    }

    /// Publishes level transitions on the given bus.
    #[must_use]
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Returns the thresholds.
    #[must_use]
    pub const fn thresholds(&self) -> &DegradationThresholds {
        &self.thresholds
    }

    /// Current level.
    #[must_use]
    pub fn level(&self) -> DegradationLevel {
        DegradationLevel::from_u8(self.level.load(Ordering::SeqCst))
    }

    /// True at level 1 and above.
    #[must_use]
    pub fn should_throttle(&self) -> bool {
        self.level() >= DegradationLevel::Reduced
    }

    /// True at level 2 and above.
    #[must_use]
    pub fn should_skip_non_essential(&self) -> bool {
        self.level() >= DegradationLevel::Minimal
    }

    /// Feeds a sample and returns the resulting level.
    pub fn update(&self, sample: &LoadSample) -> DegradationLevel {
        let next = self.thresholds.level_for(sample);
        let previous = DegradationLevel::from_u8(self.level.swap(next.as_u8(), Ordering::SeqCst));

        if previous != next {
            if next > previous {
                warn!(
                    from = %previous,
                    to = %next,
                    queue_depth = sample.queue_depth,
                    cpu = sample.cpu_percent,
                    memory = sample.memory_percent,
                    "degradation level raised"
                );
            } else {
                info!(from = %previous, to = %next, "degradation level lowered");
            }
            if let Some(events) = &self.events {
                events.emit(GovernorEvent::DegradationChanged {
                    from: previous,
                    to: next,
                });
            }
        }

        next
    }
}
