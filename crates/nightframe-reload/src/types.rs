//! Update descriptors, applied records and coordinator events.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{ReloadError, Result};

/// An update waiting to be applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateDescriptor {
    /// Unique update id.
    pub id: String,
    /// Component the update targets.
    pub component: String,
    /// Version being installed.
    pub version: String,
    /// Opaque update body.
    #[serde(skip)]
    pub payload: Vec<u8>,
}

impl UpdateDescriptor {
    /// Creates a descriptor with an empty payload.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        component: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            component: component.into(),
            version: version.into(),
            payload: Vec::new(),
        }
    }

    /// Attaches a payload.
    #[must_use]
    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }

    /// Checks that the descriptor names an update and a component.
    ///
    /// # Errors
    ///
    /// Returns [`ReloadError::InvalidDescriptor`] for a blank id or component.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(ReloadError::InvalidDescriptor("empty id".into()));
        }
        if self.component.trim().is_empty() {
            return Err(ReloadError::InvalidDescriptor(format!(
                "update '{}' has an empty component",
                self.id
            )));
        }
        Ok(())
    }
}

/// An update that went through the full pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedUpdate {
    /// The applied descriptor.
    pub descriptor: UpdateDescriptor,
    /// Commit time.
    pub applied_at: DateTime<Utc>,
    /// Time from announce to commit.
    pub took: Duration,
}

/// Pipeline progress for one update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReloadEvent {
    /// The update was taken off the queue.
    Announced {
        /// Update id.
        id: String,
        /// Target component.
        component: String,
        /// Version being installed.
        version: String,
    },
    /// Integration started.
    Integrating {
        /// Update id.
        id: String,
    },
    /// Validation started.
    Validating {
        /// Update id.
        id: String,
    },
    /// The update was committed.
    Committed {
        /// Update id.
        id: String,
        /// Commit time.
        applied_at: DateTime<Utc>,
    },
    /// The update was refused.
    Rejected {
        /// Update id.
        id: String,
        /// Why it was refused.
        reason: String,
    },
}

impl ReloadEvent {
    /// Id of the update the event is about.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Announced { id, .. }
            | Self::Integrating { id }
            | Self::Validating { id }
            | Self::Committed { id, .. }
            | Self::Rejected { id, .. } => id,
        }
    }
}
