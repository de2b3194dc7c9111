//! Stagehand Store - persistence interfaces for the staging controller
//!
//! The controller talks to three narrow seams:
//!
//! - [`ObjectStore`]: typed access to queue items, history records and the
//!   orchestrator resources cleanup inspects and deletes
//! - [`QueueSource`]: the producer-ordered queue of pending work
//! - [`ConfigSource`]: per-team configuration resolution
//!
//! The in-memory implementations back the default daemon wiring and every
//! test. Production deployments substitute an orchestrator-backed store.

#![deny(unsafe_code)]

pub mod error;
pub mod memory;
pub mod object;
pub mod source;

pub use error::{Result, StoreError};
pub use memory::{InMemoryConfigSource, InMemoryObjectStore, InMemoryQueueSource};
pub use object::{
    label_selector_matches, DeleteOptions, LabelSelector, ObjectStore, PropagationPolicy,
    ResourceKind, ResourceObject,
};
pub use source::{ConfigSource, QueueSource};
