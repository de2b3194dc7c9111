//! Controller error types.
//!
//! Errors returned to the tick loop pace retries; they never abort the
//! controller. Variants carrying their own terminal semantics
//! (`TestTimeout`, `TestRunnerNotFound`) are surfaced after the item has
//! already advanced, purely for observability.

use stagehand_engine::EngineError;
use stagehand_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StagingError {
    /// Transient store failure; the tick retries from the same state.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Deploy engine or test runner failure; the tick retries.
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    /// No deployment configuration resolvable; the item stays in Waiting.
    #[error("cannot get deployment configuration, namespace: {namespace}, queue: {queue}")]
    MissingDeployConfig { namespace: String, queue: String },

    /// Testing exceeded its timeout; the item has advanced to Collecting.
    #[error("queue testing timeout")]
    TestTimeout,

    /// A test configuration exists but no configured runner is registered;
    /// the item has advanced to Collecting.
    #[error("test runner not found")]
    TestRunnerNotFound,

    /// Forced cleanup escalation fired; the state is unchanged and the next
    /// tick re-checks.
    #[error("force cleaning up components, namespace: {namespace}")]
    ForceDeletingComponents { namespace: String },
}
