//! End-to-end controller flows against the in-memory store.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use stagehand_engine::{
    DeployEngine, Result as EngineResult, TestRunner, TestRunnerResult,
};
use stagehand_staging::{
    wait_components_cleaned, ControllerOptions, RunnerCredentials, StagingController, StagingError,
};
use stagehand_store::{
    InMemoryConfigSource, InMemoryObjectStore, InMemoryQueueSource, ObjectStore, ResourceKind,
    ResourceObject,
};
use stagehand_types::{
    Component, ComponentChart, ComponentImage, ComponentSet, ConditionStatus, ConfigDeploy,
    ConfigSpec, ConfigStaging, ConfigTestMock, ConfigTestRunner, QueueComponent,
    QueueConditionType, QueueItem, QueueState, QueueType, StagingEvent,
};

const TEAM: &str = "teamtest";
const NAMESPACE: &str = "s2h-teamtest";

struct Harness {
    store: Arc<InMemoryObjectStore>,
    queue: Arc<InMemoryQueueSource>,
    config: Arc<InMemoryConfigSource>,
    controller: Arc<StagingController>,
}

fn harness() -> Harness {
    let store = Arc::new(InMemoryObjectStore::new());
    let queue = Arc::new(InMemoryQueueSource::new(store.clone()));
    let config = Arc::new(InMemoryConfigSource::new());
    let controller = StagingController::new(
        TEAM,
        NAMESPACE,
        queue.clone(),
        config.clone(),
        store.clone(),
        RunnerCredentials::default(),
        ControllerOptions {
            tick_interval: Duration::from_millis(10),
            no_queue_delay: Duration::from_millis(10),
            clean_recheck_delay: Duration::from_millis(10),
        },
    );

    Harness {
        store,
        queue,
        config,
        controller,
    }
}

fn deploy_config(
    engine: Option<&str>,
    cleanup_timeout: Duration,
    test_runner: Option<ConfigTestRunner>,
) -> ConfigSpec {
    ConfigSpec {
        staging: Some(ConfigStaging {
            deployment: Some(ConfigDeploy {
                timeout: Duration::from_secs(300),
                component_cleanup_timeout: cleanup_timeout,
                engine: engine.map(String::from),
                test_runner,
            }),
            max_retry: 0,
        }),
    }
}

fn mock_runner_config(result: bool) -> ConfigTestRunner {
    ConfigTestRunner {
        polling_time: Duration::from_millis(10),
        test_mock: Some(ConfigTestMock { result }),
        ..ConfigTestRunner::default()
    }
}

fn redis_components() -> Vec<QueueComponent> {
    vec![QueueComponent {
        name: "redis".to_string(),
        repository: "bitnami/redis".to_string(),
        version: "5.0.5-debian-9-r160".to_string(),
    }]
}

fn redis_component_set() -> ComponentSet {
    [(
        "redis".to_string(),
        Component {
            name: "redis".to_string(),
            chart: ComponentChart {
                repository: "https://charts.bitnami.com/bitnami".to_string(),
                name: "redis".to_string(),
                version: None,
            },
            image: ComponentImage {
                repository: "bitnami/redis".to_string(),
                pattern: String::new(),
            },
            values: serde_json::json!({}),
        },
    )]
    .into()
}

fn upgrade_item(name: &str) -> QueueItem {
    QueueItem::new(TEAM, NAMESPACE, name, redis_components(), QueueType::Upgrade)
}

/// A deploy engine that pretends to manage a real cluster: not mocked, so
/// the cleanup coordinator actually inspects the store.
#[derive(Default)]
struct FakeClusterEngine {
    force_deletes: Mutex<Vec<String>>,
}

#[async_trait]
impl DeployEngine for FakeClusterEngine {
    fn name(&self) -> &str {
        "cluster"
    }

    fn is_mocked(&self) -> bool {
        false
    }

    async fn install(
        &self,
        _refname: &str,
        _component: &Component,
        _item: &QueueItem,
    ) -> EngineResult<()> {
        Ok(())
    }

    async fn delete(&self, _refname: &str) -> EngineResult<()> {
        Ok(())
    }

    async fn force_delete(&self, refname: &str) -> EngineResult<()> {
        self.force_deletes
            .lock()
            .unwrap()
            .push(refname.to_string());
        Ok(())
    }

    fn label_selectors(&self, refname: &str) -> BTreeMap<String, String> {
        [("release".to_string(), refname.to_string())].into()
    }
}

/// A runner that never finishes, registered under the mock runner's name so
/// the test configuration resolves it.
#[derive(Default)]
struct NeverFinishedRunner {
    triggers: AtomicUsize,
}

#[async_trait]
impl TestRunner for NeverFinishedRunner {
    fn name(&self) -> &str {
        "mock"
    }

    async fn trigger(&self, _config: &ConfigTestRunner, _item: &QueueItem) -> EngineResult<()> {
        self.triggers.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get_result(
        &self,
        _config: &ConfigTestRunner,
        _item: &QueueItem,
    ) -> EngineResult<TestRunnerResult> {
        Ok(TestRunnerResult {
            success: false,
            finished: false,
        })
    }
}

async fn stored_state(h: &Harness, name: &str) -> Option<QueueState> {
    h.store
        .get_queue(NAMESPACE, name)
        .await
        .unwrap()
        .map(|q| q.state())
}

#[tokio::test]
async fn happy_path_upgrade_walks_the_full_graph() {
    let h = harness();
    h.config.set_config(
        TEAM,
        deploy_config(None, Duration::from_secs(2), Some(mock_runner_config(true))),
    );
    h.config.set_components(TEAM, redis_component_set());
    let mut events = h.controller.subscribe();

    h.queue.add(upgrade_item("redis")).unwrap();

    for _ in 0..50 {
        let _ = h.controller.process().await;
        if !h.controller.is_busy()
            && h.store.get_queue(NAMESPACE, "redis").await.unwrap().is_none()
        {
            break;
        }
    }

    assert!(!h.controller.is_busy());
    assert!(h.store.get_queue(NAMESPACE, "redis").await.unwrap().is_none());

    let mut path = vec![QueueState::Waiting];
    while let Ok(envelope) = events.try_recv() {
        if let StagingEvent::StateChanged { to, .. } = envelope.event {
            path.push(to);
        }
    }
    assert_eq!(
        path,
        vec![
            QueueState::Waiting,
            QueueState::CleaningBefore,
            QueueState::DetectingImageMissing,
            QueueState::Creating,
            QueueState::Testing,
            QueueState::Collecting,
            QueueState::CleaningAfter,
            QueueState::Deleting,
            QueueState::Finished,
        ],
    );

    let histories = h.store.histories(NAMESPACE);
    assert_eq!(histories.len(), 1);
    assert!(histories[0].metadata.name.starts_with("redis-"));
    assert!(histories[0]
        .spec
        .queue
        .status
        .is_condition_true(QueueConditionType::Tested));

    let stable = h.store.stable_components(NAMESPACE);
    assert_eq!(stable.len(), 1);
    assert_eq!(stable[0].name, "redis");
    assert_eq!(stable[0].version, "5.0.5-debian-9-r160");
}

#[tokio::test]
async fn configured_engine_is_adopted_when_registered() {
    let h = harness();
    h.config
        .set_config(TEAM, deploy_config(Some("helm3"), Duration::ZERO, None));
    h.config.set_components(TEAM, ComponentSet::new());
    h.queue.add(upgrade_item("redis")).unwrap();

    h.controller.process().await.unwrap();

    let item = h.store.get_queue(NAMESPACE, "redis").await.unwrap().unwrap();
    assert_eq!(item.status.deploy_engine, "helm3");
    assert_eq!(item.state(), QueueState::CleaningBefore);
    assert_eq!(item.status.no_of_processed, 1);
    assert!(item.status.queue_history_name.starts_with("redis-"));
}

#[tokio::test]
async fn unregistered_engine_name_keeps_the_default() {
    let h = harness();
    h.config
        .set_config(TEAM, deploy_config(Some("helm2"), Duration::ZERO, None));
    h.config.set_components(TEAM, ComponentSet::new());
    h.queue.add(upgrade_item("redis")).unwrap();

    h.controller.process().await.unwrap();

    let item = h.store.get_queue(NAMESPACE, "redis").await.unwrap().unwrap();
    assert!(item.status.deploy_engine.is_empty());
}

#[tokio::test]
async fn missing_deploy_config_keeps_waiting() {
    let h = harness();
    h.config.set_config(TEAM, ConfigSpec::default());
    h.queue.add(upgrade_item("redis")).unwrap();

    let err = h.controller.process().await.unwrap_err();
    assert!(matches!(err, StagingError::MissingDeployConfig { .. }));

    assert_eq!(stored_state(&h, "redis").await, Some(QueueState::Waiting));
    assert!(h.controller.is_busy());
}

#[tokio::test]
async fn user_cancel_mid_creating_releases_ownership() {
    let h = harness();
    h.config
        .set_config(TEAM, deploy_config(None, Duration::ZERO, None));
    h.config.set_components(TEAM, redis_component_set());
    h.queue.add(upgrade_item("redis")).unwrap();

    for _ in 0..3 {
        h.controller.process().await.unwrap();
    }
    assert_eq!(stored_state(&h, "redis").await, Some(QueueState::Creating));

    // deleted by user
    h.store.delete_queue(NAMESPACE, "redis").await.unwrap();

    h.controller.process().await.unwrap();
    assert!(!h.controller.is_busy());
    assert!(h.store.histories(NAMESPACE).is_empty());
}

#[tokio::test]
async fn test_timeout_fails_and_collects() {
    let h = harness();
    let mut runner_config = mock_runner_config(true);
    runner_config.timeout = Duration::from_secs(1);
    h.config.set_config(
        TEAM,
        deploy_config(None, Duration::ZERO, Some(runner_config)),
    );
    h.config.set_components(TEAM, redis_component_set());
    h.controller
        .load_test_runner(Arc::new(NeverFinishedRunner::default()));
    h.queue.add(upgrade_item("redis")).unwrap();

    let mut timed_out = false;
    for _ in 0..500 {
        match h.controller.process().await {
            Err(StagingError::TestTimeout) => {
                timed_out = true;
                break;
            }
            _ => {}
        }
    }
    assert!(timed_out, "testing never timed out");

    let item = h.store.get_queue(NAMESPACE, "redis").await.unwrap().unwrap();
    assert_eq!(item.state(), QueueState::Collecting);
    let tested = item
        .status
        .conditions
        .iter()
        .find(|c| c.condition_type == QueueConditionType::Tested)
        .unwrap();
    assert_eq!(tested.status, ConditionStatus::False);
    assert_eq!(tested.message, "queue testing timeout");
    // the testing window is closed
    assert!(item.status.start_testing_time.is_none());
}

#[tokio::test]
async fn triggers_fire_once_and_polling_is_a_fixpoint() {
    let h = harness();
    h.config.set_config(
        TEAM,
        deploy_config(None, Duration::ZERO, Some(mock_runner_config(true))),
    );
    h.config.set_components(TEAM, redis_component_set());

    let runner = Arc::new(NeverFinishedRunner::default());
    h.controller.load_test_runner(runner.clone());
    h.queue.add(upgrade_item("redis")).unwrap();

    // reach Testing with the trigger persisted
    for _ in 0..20 {
        let _ = h.controller.process().await;
        let item = h.store.get_queue(NAMESPACE, "redis").await.unwrap().unwrap();
        if item.status.is_condition_true(QueueConditionType::TestTriggered) {
            break;
        }
    }

    let before = h.store.get_queue(NAMESPACE, "redis").await.unwrap().unwrap();
    assert!(before.status.is_condition_true(QueueConditionType::TestTriggered));
    assert!(before.status.start_testing_time.is_some());

    // two more ticks with no external mutation: no writes, no new triggers
    h.controller.process().await.unwrap();
    h.controller.process().await.unwrap();

    let after = h.store.get_queue(NAMESPACE, "redis").await.unwrap().unwrap();
    assert_eq!(
        before.metadata.resource_version,
        after.metadata.resource_version,
    );
    assert!(before.same_as(&after));
    assert_eq!(runner.triggers.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn forced_cleanup_escalates_after_timeout() {
    let h = harness();
    h.config.set_config(
        TEAM,
        deploy_config(Some("cluster"), Duration::from_secs(1), None),
    );
    h.config.set_components(TEAM, redis_component_set());

    let engine = Arc::new(FakeClusterEngine::default());
    h.controller.load_deploy_engine(engine.clone());

    // a leftover pod with matching selectors keeps the namespace dirty
    h.store.insert_resource(ResourceObject {
        kind: ResourceKind::Pod,
        name: "redis-0".to_string(),
        namespace: NAMESPACE.to_string(),
        labels: [(
            "release".to_string(),
            format!("{NAMESPACE}-redis"),
        )]
        .into(),
    });

    h.queue.add(upgrade_item("redis")).unwrap();

    let mut forced = false;
    for _ in 0..300 {
        match h.controller.process().await {
            Err(StagingError::ForceDeletingComponents { .. }) => {
                forced = true;
                break;
            }
            _ => {}
        }
    }
    assert!(forced, "cleanup never escalated");
    assert_eq!(
        stored_state(&h, "redis").await,
        Some(QueueState::CleaningBefore),
    );
    assert!(!engine.force_deletes.lock().unwrap().is_empty());

    // escalation deletes workloads before pods, zero grace for jobs and pods
    let log = h.store.deletion_log();
    let bulk: Vec<_> = log.iter().filter(|r| r.name.is_none()).collect();
    let kinds: Vec<_> = bulk.iter().map(|r| r.kind).collect();
    assert_eq!(
        kinds,
        vec![
            ResourceKind::Deployment,
            ResourceKind::StatefulSet,
            ResourceKind::DaemonSet,
            ResourceKind::Job,
            ResourceKind::Pod,
        ],
    );
    for record in bulk {
        match record.kind {
            ResourceKind::Job | ResourceKind::Pod => {
                assert_eq!(record.options.grace_period_seconds, Some(0));
            }
            _ => assert_eq!(record.options.grace_period_seconds, None),
        }
    }

    // the pod is gone now, so the next tick advances
    h.controller.process().await.unwrap();
    assert_eq!(
        stored_state(&h, "redis").await,
        Some(QueueState::DetectingImageMissing),
    );
}

#[tokio::test]
async fn no_test_config_passes_testing_immediately() {
    let h = harness();
    h.config
        .set_config(TEAM, deploy_config(None, Duration::ZERO, None));
    h.config.set_components(TEAM, redis_component_set());
    h.queue.add(upgrade_item("redis")).unwrap();

    for _ in 0..5 {
        h.controller.process().await.unwrap();
    }

    let item = h.store.get_queue(NAMESPACE, "redis").await.unwrap().unwrap();
    assert_eq!(item.state(), QueueState::Collecting);
    let tested = item
        .status
        .conditions
        .iter()
        .find(|c| c.condition_type == QueueConditionType::Tested)
        .unwrap();
    assert_eq!(tested.status, ConditionStatus::True);
    assert_eq!(
        tested.message,
        "queue testing succeeded because no testing configuration",
    );
}

#[tokio::test]
async fn failed_tests_do_not_record_stable_components() {
    let h = harness();
    h.config.set_config(
        TEAM,
        deploy_config(None, Duration::ZERO, Some(mock_runner_config(false))),
    );
    h.config.set_components(TEAM, redis_component_set());
    h.queue.add(upgrade_item("redis")).unwrap();

    for _ in 0..50 {
        let _ = h.controller.process().await;
        if h.store.get_queue(NAMESPACE, "redis").await.unwrap().is_none() {
            break;
        }
    }

    let histories = h.store.histories(NAMESPACE);
    assert_eq!(histories.len(), 1);
    let tested = histories[0]
        .spec
        .queue
        .status
        .conditions
        .iter()
        .find(|c| c.condition_type == QueueConditionType::Tested)
        .unwrap();
    assert_eq!(tested.status, ConditionStatus::False);
    assert_eq!(tested.message, "queue testing failed");

    assert!(h.store.stable_components(NAMESPACE).is_empty());
}

#[tokio::test]
async fn two_queued_items_run_in_order_without_interleaving() {
    let h = harness();
    h.config.set_config(
        TEAM,
        deploy_config(None, Duration::ZERO, Some(mock_runner_config(true))),
    );
    h.config.set_components(TEAM, redis_component_set());
    let mut events = h.controller.subscribe();

    h.queue.add(upgrade_item("redis")).unwrap();
    h.queue
        .add(QueueItem::new(
            TEAM,
            NAMESPACE,
            "mariadb",
            vec![QueueComponent {
                name: "mariadb".to_string(),
                repository: "bitnami/mariadb".to_string(),
                version: "10.5.8-debian-10-r0".to_string(),
            }],
            QueueType::Upgrade,
        ))
        .unwrap();

    for _ in 0..120 {
        let _ = h.controller.process().await;
        if h.store.get_queue(NAMESPACE, "redis").await.unwrap().is_none()
            && h.store
                .get_queue(NAMESPACE, "mariadb")
                .await
                .unwrap()
                .is_none()
        {
            break;
        }
    }

    let names: Vec<String> = h
        .store
        .histories(NAMESPACE)
        .iter()
        .map(|history| history.metadata.name.clone())
        .collect();
    assert_eq!(names.len(), 2);
    assert!(names.iter().any(|n| n.starts_with("redis-")));
    assert!(names.iter().any(|n| n.starts_with("mariadb-")));

    // the second item is adopted only after the first finished
    let mut order = Vec::new();
    while let Ok(envelope) = events.try_recv() {
        match envelope.event {
            StagingEvent::ItemAdopted { queue, .. } => order.push(format!("adopt:{queue}")),
            StagingEvent::StateChanged {
                queue,
                to: QueueState::Finished,
                ..
            } => order.push(format!("finish:{queue}")),
            _ => {}
        }
    }
    assert_eq!(
        order,
        vec![
            "adopt:redis",
            "finish:redis",
            "adopt:mariadb",
            "finish:mariadb",
        ],
    );
}

#[tokio::test]
async fn promote_path_skips_cleaning_and_finishes_in_store() {
    let h = harness();
    h.config
        .set_config(TEAM, deploy_config(None, Duration::ZERO, None));
    h.config.set_components(TEAM, redis_component_set());
    h.queue
        .add(QueueItem::new(
            TEAM,
            NAMESPACE,
            "redis",
            redis_components(),
            QueueType::PromoteToActive,
        ))
        .unwrap();

    for _ in 0..10 {
        let _ = h.controller.process().await;
        if !h.controller.is_busy() {
            break;
        }
    }

    assert!(!h.controller.is_busy());
    let item = h.store.get_queue(NAMESPACE, "redis").await.unwrap().unwrap();
    assert_eq!(item.state(), QueueState::Finished);
    assert!(item
        .status
        .condition_latest_time(QueueConditionType::CleaningBeforeStarted)
        .is_none());
    assert!(item
        .status
        .condition_latest_time(QueueConditionType::CleaningAfterStarted)
        .is_none());

    // terminal items are stable: re-reading returns the same serialized bytes
    let again = h.store.get_queue(NAMESPACE, "redis").await.unwrap().unwrap();
    assert_eq!(
        serde_json::to_vec(&item).unwrap(),
        serde_json::to_vec(&again).unwrap(),
    );
}

#[tokio::test]
async fn cleanup_on_clean_namespace_issues_no_deletes() {
    let store = Arc::new(InMemoryObjectStore::new());
    let dyn_store: Arc<dyn ObjectStore> = store.clone();
    let engine: Arc<dyn DeployEngine> = Arc::new(FakeClusterEngine::default());

    let cleaned = wait_components_cleaned(
        &dyn_store,
        &engine,
        &redis_component_set(),
        NAMESPACE,
        None,
        Duration::from_secs(1),
    )
    .await
    .unwrap();

    assert!(cleaned);
    assert!(store.deletion_log().is_empty());
}
