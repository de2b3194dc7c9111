//! Queue item types
//!
//! A QueueItem is the unit of work the staging controller drives through its
//! state machine. The controller only ever writes `status`; everything under
//! `spec` is immutable for the item's lifetime.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Object identity and server-side bookkeeping.
///
/// `resource_version` is owned by the store and must be excluded when
/// comparing an in-memory copy against a fetched one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectMeta {
    /// Object name, unique within a namespace
    pub name: String,

    /// Namespace the object lives in
    pub namespace: String,

    /// Free-form labels
    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    /// Server-side revision counter, bumped on every update
    #[serde(default)]
    pub resource_version: u64,
}

/// The kind of work a queue item requests.
///
/// The type selects which state subgraph the controller applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueType {
    /// Verify a component upgrade in the staging namespace
    Upgrade,

    /// Promote the current staging versions to the active environment
    PromoteToActive,

    /// Demote the active environment back to its previous versions
    DemoteFromActive,

    /// Verify a pull request bundle
    PullRequest,
}

impl QueueType {
    /// Returns `true` for the promote/demote subgraph (no cleaning states).
    pub fn is_active_promotion(&self) -> bool {
        matches!(self, QueueType::PromoteToActive | QueueType::DemoteFromActive)
    }
}

/// One component version carried by a queue item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueComponent {
    /// Component name as listed in team configuration
    pub name: String,

    /// Image repository
    pub repository: String,

    /// Image version/tag under test
    pub version: String,
}

/// Desired work, written by the queue producer and never by the controller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueSpec {
    /// Owning team
    pub team_name: String,

    /// Which state subgraph applies
    #[serde(default)]
    pub queue_type: QueueType,

    /// Ordered component versions under test
    #[serde(default)]
    pub components: Vec<QueueComponent>,

    /// Skip triggering any test runner and mark the item tested
    #[serde(default)]
    pub skip_test_runner: bool,
}

impl Default for QueueType {
    fn default() -> Self {
        QueueType::Upgrade
    }
}

/// States of the queue item state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueState {
    /// Not yet picked up, or picked up and waiting for initialization
    Waiting,

    /// Cleaning the namespace before deploying
    CleaningBefore,

    /// Waiting for an external actor to verify component images exist
    DetectingImageMissing,

    /// Installing the requested releases
    Creating,

    /// Triggering and polling test runners
    Testing,

    /// Writing the history record and stable components
    Collecting,

    /// Cleaning the namespace after testing
    CleaningAfter,

    /// Removing the queue item itself
    Deleting,

    /// Terminal; the producer removes the item
    Finished,

    /// The stored copy disappeared; ownership is released
    Cancelling,
}

impl Default for QueueState {
    fn default() -> Self {
        QueueState::Waiting
    }
}

impl fmt::Display for QueueState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            QueueState::Waiting => "waiting",
            QueueState::CleaningBefore => "cleaning_before",
            QueueState::DetectingImageMissing => "detecting_image_missing",
            QueueState::Creating => "creating",
            QueueState::Testing => "testing",
            QueueState::Collecting => "collecting",
            QueueState::CleaningAfter => "cleaning_after",
            QueueState::Deleting => "deleting",
            QueueState::Finished => "finished",
            QueueState::Cancelling => "cancelling",
        };
        f.write_str(s)
    }
}

/// Tri-valued condition status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// Names of the conditions the controller maintains on a queue item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueConditionType {
    /// Cleanup before deploying has started
    CleaningBeforeStarted,

    /// Namespace was clean before deploying
    CleanedBefore,

    /// Deployment of the requested releases has started
    DeployStarted,

    /// All requested releases installed successfully
    Deployed,

    /// Test runners have been triggered
    TestTriggered,

    /// Result reported by the teamcity runner
    TeamcityTestResult,

    /// Result reported by the gitlab runner
    GitlabTestResult,

    /// Aggregate test outcome
    Tested,

    /// Cleanup after testing has started
    CleaningAfterStarted,

    /// Namespace was clean after testing
    CleanedAfter,
}

/// A named fact about a queue item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueCondition {
    /// Condition name
    pub condition_type: QueueConditionType,

    /// Current status
    pub status: ConditionStatus,

    /// Human-readable detail
    pub message: String,

    /// When `(status, message)` last changed
    pub last_transition_time: DateTime<Utc>,
}

/// Per-runner status carried on the queue item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestRunnerStatus {
    /// Teamcity-specific status, present once the runner was triggered
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub teamcity: Option<TeamcityTestStatus>,
}

/// Status reported back from the teamcity runner.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TeamcityTestStatus {
    /// Build number of the triggered build
    #[serde(default)]
    pub build_number: String,
}

/// Observed state, written exclusively by the controller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueStatus {
    /// Current state machine state
    #[serde(default)]
    pub state: QueueState,

    /// Times this item entered its first state
    #[serde(default)]
    pub no_of_processed: u32,

    /// Stamped when testing begins, cleared when the item leaves Testing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_testing_time: Option<DateTime<Utc>>,

    /// Stamped when deployment begins
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_deploy_time: Option<DateTime<Utc>>,

    /// Append-only condition list, keyed by condition type
    #[serde(default)]
    pub conditions: Vec<QueueCondition>,

    /// Deploy engine chosen at init
    #[serde(default)]
    pub deploy_engine: String,

    /// Name of the history record emitted at Collecting
    #[serde(default)]
    pub queue_history_name: String,

    /// Per-runner status
    #[serde(default)]
    pub test_runner: TestRunnerStatus,
}

impl QueueStatus {
    /// Set a condition, idempotently.
    ///
    /// Setting an already-equal `(status, message)` pair is a no-op and does
    /// not touch the transition time.
    pub fn set_condition(
        &mut self,
        condition_type: QueueConditionType,
        status: ConditionStatus,
        message: impl Into<String>,
    ) {
        let message = message.into();
        if let Some(existing) = self
            .conditions
            .iter_mut()
            .find(|c| c.condition_type == condition_type)
        {
            if existing.status == status && existing.message == message {
                return;
            }
            existing.status = status;
            existing.message = message;
            existing.last_transition_time = Utc::now();
            return;
        }

        self.conditions.push(QueueCondition {
            condition_type,
            status,
            message,
            last_transition_time: Utc::now(),
        });
    }

    /// Returns `true` when the condition exists with status `True`.
    pub fn is_condition_true(&self, condition_type: QueueConditionType) -> bool {
        self.conditions
            .iter()
            .any(|c| c.condition_type == condition_type && c.status == ConditionStatus::True)
    }

    /// Latest transition time of a condition, if it was ever set.
    pub fn condition_latest_time(
        &self,
        condition_type: QueueConditionType,
    ) -> Option<DateTime<Utc>> {
        self.conditions
            .iter()
            .find(|c| c.condition_type == condition_type)
            .map(|c| c.last_transition_time)
    }
}

/// One unit of deployment+test work.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    /// Identity
    pub metadata: ObjectMeta,

    /// Desired work
    pub spec: QueueSpec,

    /// Observed state
    #[serde(default)]
    pub status: QueueStatus,
}

impl QueueItem {
    /// Create a pending item in `Waiting`.
    pub fn new(
        team_name: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
        components: Vec<QueueComponent>,
        queue_type: QueueType,
    ) -> Self {
        Self {
            metadata: ObjectMeta {
                name: name.into(),
                namespace: namespace.into(),
                ..ObjectMeta::default()
            },
            spec: QueueSpec {
                team_name: team_name.into(),
                queue_type,
                components,
                skip_test_runner: false,
            },
            status: QueueStatus::default(),
        }
    }

    /// Shorthand for the current state.
    pub fn state(&self) -> QueueState {
        self.status.state
    }

    /// Value-level equality over persisted fields, excluding the
    /// server-owned `resource_version`.
    ///
    /// This is the comparator behind "the store wins on mismatch": a fetch
    /// that differs only in revision must not count as an external edit.
    pub fn same_as(&self, other: &QueueItem) -> bool {
        self.metadata.name == other.metadata.name
            && self.metadata.namespace == other.metadata.namespace
            && self.metadata.labels == other.metadata.labels
            && self.spec == other.spec
            && self.status == other.status
    }
}
