//! Object store trait and resource model.
//!
//! The cleanup coordinator never sees concrete workload types; it lists and
//! deletes resources by kind and label selector through this trait.

use std::collections::BTreeMap;

use async_trait::async_trait;
use stagehand_types::{QueueHistory, QueueItem, StableComponent};

use crate::error::Result;

/// Key-value map matched as a subset against resource labels.
pub type LabelSelector = BTreeMap<String, String>;

/// Orchestrator resource kinds cleanup knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Pod,
    Service,
    PersistentVolumeClaim,
    Deployment,
    StatefulSet,
    DaemonSet,
    Job,
}

/// Deletion propagation policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PropagationPolicy {
    /// Delete the object and let the orchestrator reap dependents later
    #[default]
    Background,
    /// Delete dependents first
    Foreground,
    /// Leave dependents behind
    Orphan,
}

/// Options applied to delete calls.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeleteOptions {
    /// Propagation policy
    pub propagation: PropagationPolicy,

    /// Grace period; `Some(0)` kills immediately
    pub grace_period_seconds: Option<u64>,
}

impl DeleteOptions {
    /// Background propagation, default grace.
    pub fn background() -> Self {
        Self {
            propagation: PropagationPolicy::Background,
            grace_period_seconds: None,
        }
    }

    /// Background propagation, zero grace.
    pub fn background_no_grace() -> Self {
        Self {
            propagation: PropagationPolicy::Background,
            grace_period_seconds: Some(0),
        }
    }
}

/// An orchestrator resource as seen by cleanup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceObject {
    /// Resource kind
    pub kind: ResourceKind,

    /// Resource name
    pub name: String,

    /// Namespace
    pub namespace: String,

    /// Labels the selectors match against
    pub labels: BTreeMap<String, String>,
}

/// Returns `true` when every selector entry is present in `labels`.
pub fn label_selector_matches(selector: &LabelSelector, labels: &BTreeMap<String, String>) -> bool {
    selector
        .iter()
        .all(|(k, v)| labels.get(k).is_some_and(|l| l == v))
}

/// Typed access to the persistent object store.
///
/// Get/update/delete semantics follow the orchestrator model: updates carry
/// the caller's `resource_version` and conflict when it is stale; deletes of
/// absent objects are not an error.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch a queue item; `Ok(None)` when it does not exist.
    async fn get_queue(&self, namespace: &str, name: &str) -> Result<Option<QueueItem>>;

    /// Write a queue item back, bumping its revision.
    async fn update_queue(&self, item: &QueueItem) -> Result<QueueItem>;

    /// Remove a queue item. Absent objects are ignored.
    async fn delete_queue(&self, namespace: &str, name: &str) -> Result<()>;

    /// Append an immutable history record.
    async fn create_history(&self, history: &QueueHistory) -> Result<()>;

    /// Fetch a history record by name.
    async fn get_history(&self, namespace: &str, name: &str) -> Result<Option<QueueHistory>>;

    /// Record a component version as stable, replacing any previous entry.
    async fn upsert_stable_component(
        &self,
        namespace: &str,
        component: &StableComponent,
    ) -> Result<()>;

    /// List resources of `kind` in `namespace` matching `selector`.
    async fn list(
        &self,
        kind: ResourceKind,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<ResourceObject>>;

    /// Delete a single resource. Absent objects are ignored.
    async fn delete(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
        options: DeleteOptions,
    ) -> Result<()>;

    /// Delete every resource of `kind` in `namespace` matching `selector`.
    async fn delete_all_of(
        &self,
        kind: ResourceKind,
        namespace: &str,
        selector: &LabelSelector,
        options: DeleteOptions,
    ) -> Result<()>;
}
