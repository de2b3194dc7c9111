//! In-memory implementations of the store interfaces.
//!
//! Suitable for development and testing; the daemon also wires them in when
//! no orchestrator backend is configured. Production deployments substitute
//! an orchestrator-backed store behind the same traits.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dashmap::DashMap;
use stagehand_types::{ComponentSet, ConfigSpec, QueueHistory, QueueItem, QueueState, StableComponent};

use crate::error::{Result, StoreError};
use crate::object::{
    label_selector_matches, DeleteOptions, LabelSelector, ObjectStore, ResourceKind,
    ResourceObject,
};
use crate::source::{ConfigSource, QueueSource};

type NamespacedKey = (String, String);

/// A delete issued against the in-memory store, kept for inspection.
#[derive(Debug, Clone)]
pub struct DeletionRecord {
    /// Kind the delete targeted
    pub kind: ResourceKind,

    /// Namespace
    pub namespace: String,

    /// Name for single deletes, `None` for delete-all-of
    pub name: Option<String>,

    /// Selector for delete-all-of calls
    pub selector: LabelSelector,

    /// Options the caller passed
    pub options: DeleteOptions,
}

/// In-memory object store.
#[derive(Default)]
pub struct InMemoryObjectStore {
    queues: DashMap<NamespacedKey, QueueItem>,
    histories: DashMap<NamespacedKey, QueueHistory>,
    stable_components: DashMap<NamespacedKey, StableComponent>,
    resources: DashMap<(ResourceKind, String, String), ResourceObject>,
    revision: AtomicU64,
    deletions: Mutex<Vec<DeletionRecord>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a queue item as the producer would.
    pub fn create_queue(&self, item: QueueItem) -> Result<QueueItem> {
        let key = (item.metadata.namespace.clone(), item.metadata.name.clone());
        if self.queues.contains_key(&key) {
            return Err(StoreError::AlreadyExists {
                namespace: key.0,
                name: key.1,
            });
        }

        let mut stored = item;
        stored.metadata.resource_version = self.next_revision();
        self.queues.insert(key, stored.clone());
        Ok(stored)
    }

    /// Seed an orchestrator resource, e.g. a leftover pod for cleanup tests.
    pub fn insert_resource(&self, resource: ResourceObject) {
        self.resources.insert(
            (
                resource.kind,
                resource.namespace.clone(),
                resource.name.clone(),
            ),
            resource,
        );
    }

    /// Stable components recorded for `namespace`.
    pub fn stable_components(&self, namespace: &str) -> Vec<StableComponent> {
        self.stable_components
            .iter()
            .filter(|e| e.key().0 == namespace)
            .map(|e| e.value().clone())
            .collect()
    }

    /// History records in `namespace`.
    pub fn histories(&self, namespace: &str) -> Vec<QueueHistory> {
        self.histories
            .iter()
            .filter(|e| e.key().0 == namespace)
            .map(|e| e.value().clone())
            .collect()
    }

    /// Deletes issued so far, in call order.
    pub fn deletion_log(&self) -> Vec<DeletionRecord> {
        self.deletions.lock().expect("deletion log poisoned").clone()
    }

    fn next_revision(&self) -> u64 {
        self.revision.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn record_deletion(&self, record: DeletionRecord) {
        self.deletions
            .lock()
            .expect("deletion log poisoned")
            .push(record);
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn get_queue(&self, namespace: &str, name: &str) -> Result<Option<QueueItem>> {
        let key = (namespace.to_string(), name.to_string());
        Ok(self.queues.get(&key).map(|q| q.clone()))
    }

    async fn update_queue(&self, item: &QueueItem) -> Result<QueueItem> {
        let key = (item.metadata.namespace.clone(), item.metadata.name.clone());
        let mut entry = self.queues.get_mut(&key).ok_or_else(|| StoreError::NotFound {
            namespace: key.0.clone(),
            name: key.1.clone(),
        })?;

        let stored = entry.value().metadata.resource_version;
        if stored != item.metadata.resource_version {
            return Err(StoreError::Conflict {
                namespace: key.0,
                name: key.1,
                stored,
                given: item.metadata.resource_version,
            });
        }

        let mut updated = item.clone();
        updated.metadata.resource_version = self.next_revision();
        *entry.value_mut() = updated.clone();
        Ok(updated)
    }

    async fn delete_queue(&self, namespace: &str, name: &str) -> Result<()> {
        self.queues
            .remove(&(namespace.to_string(), name.to_string()));
        Ok(())
    }

    async fn create_history(&self, history: &QueueHistory) -> Result<()> {
        let key = (
            history.metadata.namespace.clone(),
            history.metadata.name.clone(),
        );
        if self.histories.contains_key(&key) {
            return Err(StoreError::AlreadyExists {
                namespace: key.0,
                name: key.1,
            });
        }
        self.histories.insert(key, history.clone());
        Ok(())
    }

    async fn get_history(&self, namespace: &str, name: &str) -> Result<Option<QueueHistory>> {
        let key = (namespace.to_string(), name.to_string());
        Ok(self.histories.get(&key).map(|h| h.clone()))
    }

    async fn upsert_stable_component(
        &self,
        namespace: &str,
        component: &StableComponent,
    ) -> Result<()> {
        self.stable_components.insert(
            (namespace.to_string(), component.name.clone()),
            component.clone(),
        );
        Ok(())
    }

    async fn list(
        &self,
        kind: ResourceKind,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<ResourceObject>> {
        Ok(self
            .resources
            .iter()
            .filter(|e| {
                let r = e.value();
                r.kind == kind
                    && r.namespace == namespace
                    && label_selector_matches(selector, &r.labels)
            })
            .map(|e| e.value().clone())
            .collect())
    }

    async fn delete(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
        options: DeleteOptions,
    ) -> Result<()> {
        self.record_deletion(DeletionRecord {
            kind,
            namespace: namespace.to_string(),
            name: Some(name.to_string()),
            selector: LabelSelector::new(),
            options,
        });
        self.resources
            .remove(&(kind, namespace.to_string(), name.to_string()));
        Ok(())
    }

    async fn delete_all_of(
        &self,
        kind: ResourceKind,
        namespace: &str,
        selector: &LabelSelector,
        options: DeleteOptions,
    ) -> Result<()> {
        self.record_deletion(DeletionRecord {
            kind,
            namespace: namespace.to_string(),
            name: None,
            selector: selector.clone(),
            options,
        });
        self.resources.retain(|_, r| {
            !(r.kind == kind
                && r.namespace == namespace
                && label_selector_matches(selector, &r.labels))
        });
        Ok(())
    }
}

/// In-memory queue source.
///
/// Items live in the shared object store; the source only tracks producer
/// ordering. `first` returns the oldest non-finished item still present.
pub struct InMemoryQueueSource {
    store: Arc<InMemoryObjectStore>,
    order: Mutex<Vec<NamespacedKey>>,
}

impl InMemoryQueueSource {
    pub fn new(store: Arc<InMemoryObjectStore>) -> Self {
        Self {
            store,
            order: Mutex::new(Vec::new()),
        }
    }

    /// Enqueue an item: create it in the store and append it to the order.
    pub fn add(&self, item: QueueItem) -> Result<QueueItem> {
        let stored = self.store.create_queue(item)?;
        self.order.lock().expect("queue order poisoned").push((
            stored.metadata.namespace.clone(),
            stored.metadata.name.clone(),
        ));
        Ok(stored)
    }

    /// Remove an item as the producer would, from the order and the store.
    pub async fn remove(&self, item: &QueueItem) -> Result<()> {
        let key = (item.metadata.namespace.clone(), item.metadata.name.clone());
        self.order
            .lock()
            .expect("queue order poisoned")
            .retain(|k| k != &key);
        self.store.delete_queue(&key.0, &key.1).await
    }
}

#[async_trait]
impl QueueSource for InMemoryQueueSource {
    async fn first(&self, namespace: &str) -> Result<Option<QueueItem>> {
        let order = {
            let guard = self.order.lock().expect("queue order poisoned");
            guard.clone()
        };

        for (ns, name) in order {
            if ns != namespace {
                continue;
            }
            if let Some(item) = self.store.get_queue(&ns, &name).await? {
                if item.state() != QueueState::Finished {
                    return Ok(Some(item));
                }
            }
        }

        Ok(None)
    }
}

/// In-memory config source.
#[derive(Default)]
pub struct InMemoryConfigSource {
    configs: DashMap<String, ConfigSpec>,
    components: DashMap<String, ComponentSet>,
}

impl InMemoryConfigSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the configuration for a team.
    pub fn set_config(&self, team: impl Into<String>, config: ConfigSpec) {
        self.configs.insert(team.into(), config);
    }

    /// Set the parent components for a team.
    pub fn set_components(&self, team: impl Into<String>, components: ComponentSet) {
        self.components.insert(team.into(), components);
    }
}

#[async_trait]
impl ConfigSource for InMemoryConfigSource {
    async fn get(&self, team: &str) -> Result<ConfigSpec> {
        self.configs
            .get(team)
            .map(|c| c.clone())
            .ok_or_else(|| StoreError::NotFound {
                namespace: String::new(),
                name: team.to_string(),
            })
    }

    async fn parent_components(&self, team: &str) -> Result<ComponentSet> {
        Ok(self
            .components
            .get(team)
            .map(|c| c.clone())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use stagehand_types::{QueueComponent, QueueType};

    use super::*;

    fn test_item(name: &str) -> QueueItem {
        QueueItem::new(
            "teamtest",
            "s2h-teamtest",
            name,
            vec![QueueComponent {
                name: "redis".to_string(),
                repository: "bitnami/redis".to_string(),
                version: "5.0.5-debian-9-r160".to_string(),
            }],
            QueueType::Upgrade,
        )
    }

    #[tokio::test]
    async fn update_bumps_revision_and_conflicts_on_stale() {
        let store = InMemoryObjectStore::new();
        let created = store.create_queue(test_item("redis")).unwrap();

        let mut copy = created.clone();
        copy.status.no_of_processed = 1;
        let updated = store.update_queue(&copy).await.unwrap();
        assert!(updated.metadata.resource_version > created.metadata.resource_version);

        // the original copy is now stale
        let err = store.update_queue(&created).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
    }

    #[tokio::test]
    async fn queue_source_returns_items_in_producer_order() {
        let store = Arc::new(InMemoryObjectStore::new());
        let source = InMemoryQueueSource::new(store.clone());

        source.add(test_item("redis")).unwrap();
        source.add(test_item("mariadb")).unwrap();

        let first = source.first("s2h-teamtest").await.unwrap().unwrap();
        assert_eq!(first.metadata.name, "redis");

        source.remove(&first).await.unwrap();
        let next = source.first("s2h-teamtest").await.unwrap().unwrap();
        assert_eq!(next.metadata.name, "mariadb");
    }

    #[tokio::test]
    async fn list_filters_by_kind_namespace_and_selector() {
        let store = InMemoryObjectStore::new();
        let labels: std::collections::BTreeMap<_, _> =
            [("release".to_string(), "ns-redis".to_string())].into();

        store.insert_resource(ResourceObject {
            kind: ResourceKind::Pod,
            name: "redis-0".to_string(),
            namespace: "ns".to_string(),
            labels: labels.clone(),
        });
        store.insert_resource(ResourceObject {
            kind: ResourceKind::Service,
            name: "redis".to_string(),
            namespace: "ns".to_string(),
            labels: labels.clone(),
        });

        let pods = store.list(ResourceKind::Pod, "ns", &labels).await.unwrap();
        assert_eq!(pods.len(), 1);
        assert_eq!(pods[0].name, "redis-0");

        let empty = store
            .list(ResourceKind::Pod, "other", &labels)
            .await
            .unwrap();
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn delete_all_of_records_options() {
        let store = InMemoryObjectStore::new();
        let selector: LabelSelector = [("release".to_string(), "ns-redis".to_string())].into();

        store
            .delete_all_of(
                ResourceKind::Job,
                "ns",
                &selector,
                DeleteOptions::background_no_grace(),
            )
            .await
            .unwrap();

        let log = store.deletion_log();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].kind, ResourceKind::Job);
        assert_eq!(log[0].options.grace_period_seconds, Some(0));
    }
}
