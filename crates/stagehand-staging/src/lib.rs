//! Stagehand Staging - the per-team staging controller
//!
//! The controller owns exactly one in-flight queue item at a time and drives
//! it through a finite state machine: clean the namespace, deploy the
//! requested component versions, run external tests, collect the outcome,
//! clean up again. Its in-memory view is kept consistent with the persistent
//! object store, which external actors may mutate at any moment; deletion of
//! the stored copy is interpreted as cancellation.
//!
//! ## Ordering guarantees
//!
//! - Persist-then-advance: every state change is written to the store before
//!   the handler returns, so a restarted controller resumes from the
//!   persisted state.
//! - The sync step is the only place external state overrides memory, and
//!   the store always wins.
//! - Exactly one tick runs at a time; there is no intra-item parallelism.

#![deny(unsafe_code)]

pub mod cleanup;
pub mod controller;
pub mod error;
mod testing;

pub use cleanup::{is_cleanup_timeout, wait_components_cleaned, DEFAULT_CLEANUP_TIMEOUT};
pub use controller::{
    ControllerOptions, GitlabCredentials, RunnerCredentials, StagingController,
    TeamcityCredentials, Transition,
};
pub use error::StagingError;
pub use testing::{TEST_POLLING, TEST_TIMEOUT};
