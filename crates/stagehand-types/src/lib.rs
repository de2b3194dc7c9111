//! Stagehand Types - Core types for staging environment orchestration
//!
//! Stagehand drives short-lived staging environments for a team's software
//! components: it picks queued work, deploys the requested component versions
//! into an isolated namespace, runs integration tests against the result,
//! records the outcome and cleans the namespace up again.
//!
//! ## Key Concepts
//!
//! - **QueueItem**: one unit of deployment+test work for a set of components
//! - **Condition**: a named tri-valued fact about a QueueItem with a message
//!   and transition time
//! - **Component**: a top-level deployable listed in team configuration
//! - **QueueHistory**: the immutable per-run record emitted when collecting
//! - **Events**: unified observability stream of controller activity

#![deny(unsafe_code)]

pub mod component;
pub mod config;
pub mod events;
pub mod history;
pub mod queue;

pub use component::{release_name, Component, ComponentChart, ComponentImage, ComponentSet};
pub use config::{
    ConfigDeploy, ConfigGitlab, ConfigSpec, ConfigStaging, ConfigTeamcity, ConfigTestMock,
    ConfigTestRunner,
};
pub use events::{EventSeverity, StagingEvent, StagingEventEnvelope};
pub use history::{history_name, QueueHistory, QueueHistorySpec, StableComponent};
pub use queue::{
    ConditionStatus, ObjectMeta, QueueComponent, QueueCondition, QueueConditionType, QueueItem,
    QueueSpec, QueueState, QueueStatus, QueueType, TeamcityTestStatus, TestRunnerStatus,
};
