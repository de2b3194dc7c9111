//! Queue and configuration sources.

use async_trait::async_trait;
use stagehand_types::{ComponentSet, ConfigSpec, QueueItem};

use crate::error::Result;

/// The producer-ordered queue of pending work.
///
/// Ordering, priority, admission and removal are the producer's concern;
/// the controller only ever asks for the next item.
#[async_trait]
pub trait QueueSource: Send + Sync {
    /// Highest-priority pending item in `namespace`, or `None`.
    async fn first(&self, namespace: &str) -> Result<Option<QueueItem>>;
}

/// Per-team configuration resolution.
#[async_trait]
pub trait ConfigSource: Send + Sync {
    /// Resolved configuration for `team`.
    async fn get(&self, team: &str) -> Result<ConfigSpec>;

    /// Parent components configured for `team`.
    async fn parent_components(&self, team: &str) -> Result<ComponentSet>;
}
