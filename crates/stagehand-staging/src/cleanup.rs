//! Cleanup coordinator.
//!
//! Checks that nothing belonging to the team's parent components is left in
//! the namespace, escalating to forced deletion once the cleanup timeout has
//! passed. The check is idempotent: on an already-clean namespace it returns
//! clean without issuing a single delete.
//!
//! Escalation is layered (release, then workloads and pods, then PVCs)
//! because a release-level delete can stall on finalizers.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use stagehand_engine::DeployEngine;
use stagehand_store::{DeleteOptions, LabelSelector, ObjectStore, ResourceKind, ResourceObject};
use stagehand_types::{release_name, ComponentSet};
use tracing::{debug, error, warn};

use crate::error::StagingError;

/// Floor applied when the configured cleanup timeout is zero.
pub const DEFAULT_CLEANUP_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// Whether cleanup has run long enough to escalate.
///
/// A missing start time never times out; a zero timeout falls back to
/// [`DEFAULT_CLEANUP_TIMEOUT`].
pub fn is_cleanup_timeout(start: Option<DateTime<Utc>>, timeout: Duration) -> bool {
    let Some(start) = start else {
        return false;
    };

    let timeout = if timeout.is_zero() {
        DEFAULT_CLEANUP_TIMEOUT
    } else {
        timeout
    };
    let timeout = chrono::Duration::from_std(timeout).unwrap_or(chrono::Duration::MAX);

    Utc::now() - start > timeout
}

/// Wait-until-clean predicate over the parent components.
///
/// Returns `Ok(true)` once no pods, services or PVCs matching any component's
/// release selectors remain. Returns `Ok(false)` while resources linger.
/// Once `start` is older than the timeout the coordinator force-deletes and
/// surfaces [`StagingError::ForceDeletingComponents`]; the caller keeps the
/// state and re-checks on the next tick.
pub async fn wait_components_cleaned(
    store: &Arc<dyn ObjectStore>,
    engine: &Arc<dyn DeployEngine>,
    parent_components: &ComponentSet,
    namespace: &str,
    start: Option<DateTime<Utc>>,
    cleanup_timeout: Duration,
) -> Result<bool, StagingError> {
    if engine.is_mocked() {
        return Ok(true);
    }

    let force_clean = is_cleanup_timeout(start, cleanup_timeout);

    for component in parent_components.keys() {
        let refname = release_name(namespace, component);
        let selectors = engine.label_selectors(&refname);

        if force_clean {
            if let Err(e) = engine.force_delete(&refname).await {
                error!(refname, namespace, error = %e, "error while force delete");
            }
        }

        let pods = store.list(ResourceKind::Pod, namespace, &selectors).await?;
        if !pods.is_empty() {
            if force_clean {
                force_cleanup_pods(store, namespace, &selectors).await;
                return Err(StagingError::ForceDeletingComponents {
                    namespace: namespace.to_string(),
                });
            }
            debug!(refname, namespace, pods = pods.len(), "pods still present");
            return Ok(false);
        }

        let services = store
            .list(ResourceKind::Service, namespace, &selectors)
            .await?;
        if !services.is_empty() {
            if force_clean {
                force_cleanup_services(store, &services).await;
                return Err(StagingError::ForceDeletingComponents {
                    namespace: namespace.to_string(),
                });
            }
            return Ok(false);
        }

        let pvcs = store
            .list(ResourceKind::PersistentVolumeClaim, namespace, &selectors)
            .await?;
        if !pvcs.is_empty() {
            debug!(refname, namespace, "pvc found, deleting");
            if let Err(e) = store
                .delete_all_of(
                    ResourceKind::PersistentVolumeClaim,
                    namespace,
                    &selectors,
                    DeleteOptions::background(),
                )
                .await
            {
                error!(namespace, error = %e, "delete all pvc error");
            }
            return Ok(false);
        }
    }

    Ok(true)
}

/// Escalated workload deletion, most-owning kinds first so the orchestrator
/// does not recreate what was just removed.
async fn force_cleanup_pods(
    store: &Arc<dyn ObjectStore>,
    namespace: &str,
    selectors: &LabelSelector,
) {
    let graceful = DeleteOptions::background();
    let immediate = DeleteOptions::background_no_grace();

    for (kind, options) in [
        (ResourceKind::Deployment, graceful),
        (ResourceKind::StatefulSet, graceful),
        (ResourceKind::DaemonSet, graceful),
        (ResourceKind::Job, immediate),
        (ResourceKind::Pod, immediate),
    ] {
        warn!(namespace, ?kind, "force delete");
        if let Err(e) = store.delete_all_of(kind, namespace, selectors, options).await {
            error!(namespace, ?kind, error = %e, "force delete error");
        }
    }
}

async fn force_cleanup_services(store: &Arc<dyn ObjectStore>, services: &[ResourceObject]) {
    for service in services {
        warn!(service = %service.name, namespace = %service.namespace, "force delete service");
        if let Err(e) = store
            .delete(
                ResourceKind::Service,
                &service.namespace,
                &service.name,
                DeleteOptions::background(),
            )
            .await
        {
            error!(service = %service.name, error = %e, "delete service error");
        }
    }
}
