//! Event types for controller observability.
//!
//! Events provide a unified stream of staging lifecycle activity. They are
//! advisory; dropped events never affect the state machine.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::queue::QueueState;

/// Envelope wrapping all staging events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagingEventEnvelope {
    /// Unique event id
    pub id: Uuid,

    /// Event timestamp
    pub timestamp: chrono::DateTime<chrono::Utc>,

    /// Team the controller runs for
    pub team: String,

    /// Event severity
    pub severity: EventSeverity,

    /// The actual event
    pub event: StagingEvent,
}

impl StagingEventEnvelope {
    /// Wrap an event with a fresh id and the current timestamp.
    pub fn new(team: impl Into<String>, severity: EventSeverity, event: StagingEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: chrono::Utc::now(),
            team: team.into(),
            severity,
            event,
        }
    }
}

/// Event severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

/// Staging controller events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StagingEvent {
    /// A queue item was adopted as the current item
    ItemAdopted {
        queue: String,
        namespace: String,
    },

    /// The current item advanced to a new state
    StateChanged {
        queue: String,
        from: QueueState,
        to: QueueState,
    },

    /// All configured test runners were triggered
    TestsTriggered {
        queue: String,
        runners: Vec<String>,
    },

    /// Testing finished with an aggregate outcome
    TestsFinished {
        queue: String,
        passed: bool,
    },

    /// Cleanup exceeded its timeout and escalated to forced deletion
    CleanupForced {
        queue: String,
        namespace: String,
    },

    /// The stored copy disappeared and ownership was released
    ItemCancelled {
        queue: String,
    },

    /// A history record was written
    HistoryRecorded {
        queue: String,
        history: String,
    },
}
