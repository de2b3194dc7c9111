//! The staging controller.
//!
//! A single logical worker ticks roughly every second. Each tick adopts a
//! queue item when none is in flight, re-syncs the in-memory copy against
//! the store, and dispatches on `(type, state)` to exactly one handler.
//! Handlers return a [`Transition`]; every advance is persisted before the
//! tick ends.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::Utc;
use stagehand_engine::{
    deploy, DeployEngine, GitlabRunner, Helm3Engine, MockEngine, MockTestRunner, TeamcityRunner,
    TestRunner,
};
use stagehand_store::{ConfigSource, ObjectStore, QueueSource};
use stagehand_types::{
    history_name, release_name, ConditionStatus, EventSeverity, ObjectMeta, QueueConditionType,
    QueueHistory, QueueHistorySpec, QueueItem, QueueState, StableComponent, StagingEvent,
    StagingEventEnvelope,
};
use tokio::sync::{broadcast, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::cleanup::wait_components_cleaned;
use crate::error::StagingError;

/// What a state handler decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Persist the item with the given next state
    Advance(QueueState),

    /// Keep the current state; the next tick re-enters the handler
    Stay,
}

/// Tick pacing. Defaults match production; tests shorten the delays.
#[derive(Debug, Clone)]
pub struct ControllerOptions {
    /// Delay between reconciler ticks
    pub tick_interval: Duration,

    /// Sleep when the queue source has nothing pending
    pub no_queue_delay: Duration,

    /// Sleep between cleanup re-checks while the namespace is not clean
    pub clean_recheck_delay: Duration,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            no_queue_delay: Duration::from_secs(2),
            clean_recheck_delay: Duration::from_secs(2),
        }
    }
}

/// Credentials for the external test runners.
///
/// A runner is registered only when its credentials are present.
#[derive(Debug, Clone, Default)]
pub struct RunnerCredentials {
    pub teamcity: Option<TeamcityCredentials>,
    pub gitlab: Option<GitlabCredentials>,
}

#[derive(Debug, Clone)]
pub struct TeamcityCredentials {
    pub base_url: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct GitlabCredentials {
    pub base_url: String,
    pub token: String,
}

/// Per-team staging controller.
pub struct StagingController {
    pub(crate) team_name: String,
    pub(crate) namespace: String,

    pub(crate) deploy_engines: RwLock<HashMap<String, Arc<dyn DeployEngine>>>,
    pub(crate) test_runners: RwLock<HashMap<String, Arc<dyn TestRunner>>>,

    pub(crate) queue_source: Arc<dyn QueueSource>,
    pub(crate) config_source: Arc<dyn ConfigSource>,
    pub(crate) store: Arc<dyn ObjectStore>,

    /// The only field mutated from outside a handler: sync may reset it on
    /// cancellation. Readers copy before use.
    current_item: Mutex<Option<QueueItem>>,

    pub(crate) event_tx: broadcast::Sender<StagingEventEnvelope>,
    pub(crate) options: ControllerOptions,
}

impl StagingController {
    pub fn new(
        team_name: impl Into<String>,
        namespace: impl Into<String>,
        queue_source: Arc<dyn QueueSource>,
        config_source: Arc<dyn ConfigSource>,
        store: Arc<dyn ObjectStore>,
        credentials: RunnerCredentials,
        options: ControllerOptions,
    ) -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(1024);

        let controller = Self {
            team_name: team_name.into(),
            namespace: namespace.into(),
            deploy_engines: RwLock::new(HashMap::new()),
            test_runners: RwLock::new(HashMap::new()),
            queue_source,
            config_source,
            store,
            current_item: Mutex::new(None),
            event_tx,
            options,
        };

        controller.load_deploy_engine(Arc::new(MockEngine::new()));
        controller.load_deploy_engine(Arc::new(Helm3Engine::new(controller.namespace.clone())));

        controller.load_test_runner(Arc::new(MockTestRunner::new()));
        if let Some(tc) = credentials.teamcity {
            controller.load_test_runner(Arc::new(TeamcityRunner::new(
                tc.base_url,
                tc.username,
                tc.password,
            )));
        }
        if let Some(gl) = credentials.gitlab {
            controller.load_test_runner(Arc::new(GitlabRunner::new(gl.base_url, gl.token)));
        }

        Arc::new(controller)
    }

    /// Register or replace a deploy engine by name. Empty names are skipped.
    pub fn load_deploy_engine(&self, engine: Arc<dyn DeployEngine>) {
        let name = engine.name().to_string();
        if name.is_empty() {
            return;
        }
        self.deploy_engines
            .write()
            .expect("engine registry poisoned")
            .insert(name, engine);
    }

    /// Register or replace a test runner by name. Empty names are skipped.
    pub fn load_test_runner(&self, runner: Arc<dyn TestRunner>) {
        let name = runner.name().to_string();
        if name.is_empty() {
            return;
        }
        self.test_runners
            .write()
            .expect("runner registry poisoned")
            .insert(name, runner);
    }

    /// Whether a queue item is currently in flight.
    pub fn is_busy(&self) -> bool {
        self.current_item().is_some()
    }

    /// A copy of the current item, if any.
    pub fn current_item(&self) -> Option<QueueItem> {
        self.current_item
            .lock()
            .expect("current item lock poisoned")
            .clone()
    }

    /// Subscribe to the controller event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<StagingEventEnvelope> {
        self.event_tx.subscribe()
    }

    /// Run the reconcile loop until `shutdown` flips to `true`.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(team = %self.team_name, namespace = %self.namespace, "staging controller is running");

        let mut tick = tokio::time::interval(self.options.tick_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    if let Err(e) = self.process().await {
                        error!(error = %e, "queue processing failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(team = %self.team_name, "staging controller is shutting down");
    }

    /// One reconciler tick.
    pub async fn process(&self) -> Result<(), StagingError> {
        if self.current_item().is_none() {
            match self.queue_source.first(&self.namespace).await? {
                Some(item) => {
                    info!(queue = %item.metadata.name, "adopting queue item");
                    self.set_current(Some(item.clone()));
                    self.emit(
                        EventSeverity::Info,
                        StagingEvent::ItemAdopted {
                            queue: item.metadata.name,
                            namespace: item.metadata.namespace,
                        },
                    );
                }
                None => {
                    tokio::time::sleep(self.options.no_queue_delay).await;
                    return Ok(());
                }
            }
        }

        let Some(mut item) = self.current_item() else {
            return Ok(());
        };

        // the store is authoritative everywhere except the two states that
        // act on an object already gone
        if !matches!(item.state(), QueueState::Deleting | QueueState::Cancelling) {
            self.sync_with_store(&mut item).await?;
        }

        let transition = if item.spec.queue_type.is_active_promotion() {
            match item.state() {
                QueueState::Waiting => self.init_queue(&mut item).await,
                QueueState::DetectingImageMissing => self.detect_image_missing(&item),
                QueueState::Creating => self.deploy_environment(&mut item).await,
                // promotion environments were already verified by the
                // upgrade runs that produced them
                QueueState::Testing => Ok(Transition::Advance(QueueState::Collecting)),
                QueueState::Collecting => self.collect_result(&mut item).await,
                QueueState::Cancelling => self.cancel_queue(&item),
                QueueState::Finished => self.finish_queue(&item),
                state => {
                    warn!(queue = %item.metadata.name, %state, "state outside promotion subgraph");
                    Ok(Transition::Stay)
                }
            }
        } else {
            match item.state() {
                QueueState::Waiting => self.init_queue(&mut item).await,
                QueueState::CleaningBefore => self.clean_namespace(&mut item, CleanupPhase::Before).await,
                QueueState::DetectingImageMissing => self.detect_image_missing(&item),
                QueueState::Creating => self.deploy_environment(&mut item).await,
                QueueState::Testing => self.start_testing(&mut item).await,
                QueueState::Collecting => self.collect_result(&mut item).await,
                QueueState::CleaningAfter => self.clean_namespace(&mut item, CleanupPhase::After).await,
                QueueState::Deleting => self.delete_queue(&mut item).await,
                QueueState::Cancelling => self.cancel_queue(&item),
                QueueState::Finished => self.finish_queue(&item),
            }
        };

        match transition? {
            Transition::Advance(next) => self.update_queue_with_state(&mut item, next).await?,
            Transition::Stay => {}
        }

        Ok(())
    }

    /// Fetch the stored copy and absorb external mutations.
    ///
    /// Not-found means the item was deleted out from under us and is
    /// interpreted as cancellation. Any other difference replaces the
    /// in-memory copy; revision-only differences are adopted quietly.
    async fn sync_with_store(&self, item: &mut QueueItem) -> Result<(), StagingError> {
        let fetched = self
            .store
            .get_queue(&item.metadata.namespace, &item.metadata.name)
            .await?;

        match fetched {
            None => {
                debug!(
                    queue = %item.metadata.name,
                    namespace = %item.metadata.namespace,
                    "queue got cancel",
                );
                item.status.state = QueueState::Cancelling;
                self.set_current(Some(item.clone()));
            }
            Some(fetched) => {
                if !fetched.same_as(item)
                    || fetched.metadata.resource_version != item.metadata.resource_version
                {
                    *item = fetched;
                    self.set_current(Some(item.clone()));
                }
            }
        }

        Ok(())
    }

    async fn init_queue(&self, item: &mut QueueItem) -> Result<Transition, StagingError> {
        let config = self.config_source.get(&self.team_name).await?;
        let deploy_config =
            config
                .deployment()
                .ok_or_else(|| StagingError::MissingDeployConfig {
                    namespace: self.namespace.clone(),
                    queue: item.metadata.name.clone(),
                })?;

        item.status.no_of_processed += 1;
        item.status.queue_history_name = history_name(&item.metadata.name, Utc::now());
        item.status.start_testing_time = None;
        item.status.start_deploy_time = None;

        if let Some(engine) = deploy_config.engine.as_deref() {
            let registered = self
                .deploy_engines
                .read()
                .expect("engine registry poisoned")
                .contains_key(engine);
            if registered {
                item.status.deploy_engine = engine.to_string();
            }
        }

        if item.spec.queue_type.is_active_promotion() {
            return Ok(Transition::Advance(QueueState::DetectingImageMissing));
        }

        item.status.set_condition(
            QueueConditionType::CleaningBeforeStarted,
            ConditionStatus::True,
            "starts cleaning the namespace before running task",
        );
        Ok(Transition::Advance(QueueState::CleaningBefore))
    }

    async fn clean_namespace(
        &self,
        item: &mut QueueItem,
        phase: CleanupPhase,
    ) -> Result<Transition, StagingError> {
        let engine = self.deploy_engine(item);
        let parents = self.config_source.parent_components(&self.team_name).await?;

        // releases are deleted on every tick until the namespace checks out
        if !item.status.is_condition_true(phase.cleaned_condition()) {
            for component in parents.keys() {
                let refname = release_name(&self.namespace, component);
                if let Err(e) = engine.delete(&refname).await {
                    error!(
                        refname,
                        namespace = %self.namespace,
                        component,
                        error = %e,
                        "cannot delete release",
                    );
                }
            }
        }

        let cleanup_timeout = self
            .config_source
            .get(&self.team_name)
            .await
            .ok()
            .and_then(|c| c.deployment().map(|d| d.component_cleanup_timeout))
            .unwrap_or(Duration::ZERO);

        let cleaned = wait_components_cleaned(
            &self.store,
            &engine,
            &parents,
            &self.namespace,
            item.status.condition_latest_time(phase.started_condition()),
            cleanup_timeout,
        )
        .await;

        let cleaned = match cleaned {
            Err(e @ StagingError::ForceDeletingComponents { .. }) => {
                self.emit(
                    EventSeverity::Warning,
                    StagingEvent::CleanupForced {
                        queue: item.metadata.name.clone(),
                        namespace: self.namespace.clone(),
                    },
                );
                return Err(e);
            }
            other => other?,
        };

        if !cleaned {
            warn!(
                queue = %item.metadata.name,
                state = %item.status.state,
                "waiting for component cleaned",
            );
            tokio::time::sleep(self.options.clean_recheck_delay).await;
            return Ok(Transition::Stay);
        }

        item.status
            .set_condition(phase.cleaned_condition(), ConditionStatus::True, "namespace cleaned");
        Ok(Transition::Advance(phase.next_state()))
    }

    /// Image existence is resolved by an external actor; an actor that needs
    /// to hold an item back rewrites the stored state, which sync absorbs.
    fn detect_image_missing(&self, _item: &QueueItem) -> Result<Transition, StagingError> {
        Ok(Transition::Advance(QueueState::Creating))
    }

    async fn deploy_environment(&self, item: &mut QueueItem) -> Result<Transition, StagingError> {
        let config = self.config_source.get(&self.team_name).await?;
        let deploy_config =
            config
                .deployment()
                .ok_or_else(|| StagingError::MissingDeployConfig {
                    namespace: self.namespace.clone(),
                    queue: item.metadata.name.clone(),
                })?;

        if item.status.start_deploy_time.is_none() {
            item.status.start_deploy_time = Some(Utc::now());
            item.status.set_condition(
                QueueConditionType::DeployStarted,
                ConditionStatus::True,
                "deployment started",
            );
            self.persist(item).await?;
        }

        if let Some(start) = item.status.start_deploy_time {
            let timeout = chrono::Duration::from_std(deploy_config.timeout)
                .unwrap_or(chrono::Duration::MAX);
            if Utc::now() - start > timeout {
                warn!(queue = %item.metadata.name, "deployment timeout, collecting failure");
                item.status.set_condition(
                    QueueConditionType::Deployed,
                    ConditionStatus::False,
                    "deployment timeout",
                );
                return Ok(Transition::Advance(QueueState::Collecting));
            }
        }

        let engine = self.deploy_engine(item);
        let parents = self.config_source.parent_components(&self.team_name).await?;
        for (component_name, component) in &parents {
            let refname = release_name(&self.namespace, component_name);
            engine.install(&refname, component, item).await?;
        }

        item.status.set_condition(
            QueueConditionType::Deployed,
            ConditionStatus::True,
            "deployed successfully",
        );
        Ok(Transition::Advance(QueueState::Testing))
    }

    async fn collect_result(&self, item: &mut QueueItem) -> Result<Transition, StagingError> {
        if item.status.queue_history_name.is_empty() {
            item.status.queue_history_name = history_name(&item.metadata.name, Utc::now());
        }

        let history_ref = item.status.queue_history_name.clone();
        let existing = self.store.get_history(&self.namespace, &history_ref).await?;
        if existing.is_none() {
            let stable_components: Vec<StableComponent> = item
                .spec
                .components
                .iter()
                .map(|c| StableComponent {
                    name: c.name.clone(),
                    repository: c.repository.clone(),
                    version: c.version.clone(),
                })
                .collect();

            let history = QueueHistory {
                metadata: ObjectMeta {
                    name: history_ref.clone(),
                    namespace: self.namespace.clone(),
                    ..ObjectMeta::default()
                },
                spec: QueueHistorySpec {
                    queue: item.clone(),
                    stable_components,
                    created_at: Utc::now(),
                },
            };
            self.store.create_history(&history).await?;
            info!(queue = %item.metadata.name, history = %history_ref, "queue history recorded");
            self.emit(
                EventSeverity::Info,
                StagingEvent::HistoryRecorded {
                    queue: item.metadata.name.clone(),
                    history: history_ref,
                },
            );
        }

        if item.status.is_condition_true(QueueConditionType::Tested) {
            for component in &item.spec.components {
                self.store
                    .upsert_stable_component(
                        &self.namespace,
                        &StableComponent {
                            name: component.name.clone(),
                            repository: component.repository.clone(),
                            version: component.version.clone(),
                        },
                    )
                    .await?;
            }
        }

        if item.spec.queue_type.is_active_promotion() {
            return Ok(Transition::Advance(QueueState::Finished));
        }

        item.status.set_condition(
            QueueConditionType::CleaningAfterStarted,
            ConditionStatus::True,
            "starts cleaning the namespace after running task",
        );
        Ok(Transition::Advance(QueueState::CleaningAfter))
    }

    /// The upgrade path ends with the controller removing the item itself;
    /// the stored copy is gone, so Finished is only reflected in memory and
    /// on the event stream.
    async fn delete_queue(&self, item: &mut QueueItem) -> Result<Transition, StagingError> {
        self.store
            .delete_queue(&item.metadata.namespace, &item.metadata.name)
            .await?;

        self.emit(
            EventSeverity::Info,
            StagingEvent::StateChanged {
                queue: item.metadata.name.clone(),
                from: QueueState::Deleting,
                to: QueueState::Finished,
            },
        );
        item.status.state = QueueState::Finished;
        info!(queue = %item.metadata.name, "queue finished");

        self.set_current(None);
        Ok(Transition::Stay)
    }

    fn cancel_queue(&self, item: &QueueItem) -> Result<Transition, StagingError> {
        info!(queue = %item.metadata.name, "queue cancelled, releasing ownership");
        self.emit(
            EventSeverity::Info,
            StagingEvent::ItemCancelled {
                queue: item.metadata.name.clone(),
            },
        );
        self.set_current(None);
        Ok(Transition::Stay)
    }

    /// Promotion items stay in the store at Finished for the producer to
    /// inspect and remove; the controller only releases ownership.
    fn finish_queue(&self, item: &QueueItem) -> Result<Transition, StagingError> {
        debug!(queue = %item.metadata.name, "queue finished, releasing ownership");
        self.set_current(None);
        Ok(Transition::Stay)
    }

    /// Persist the item with a new state. The write happens before the
    /// handler chain returns, so a crash resumes from the persisted state.
    pub(crate) async fn update_queue_with_state(
        &self,
        item: &mut QueueItem,
        state: QueueState,
    ) -> Result<(), StagingError> {
        if item.status.state != state {
            info!(
                queue = %item.metadata.name,
                from = %item.status.state,
                to = %state,
                "queue state updated",
            );
            self.emit(
                EventSeverity::Info,
                StagingEvent::StateChanged {
                    queue: item.metadata.name.clone(),
                    from: item.status.state,
                    to: state,
                },
            );
            if item.status.state == QueueState::Testing {
                // leaving the testing subgraph
                item.status.start_testing_time = None;
            }
        }

        item.status.state = state;
        self.persist(item).await
    }

    /// Write the item back and adopt the stored revision.
    pub(crate) async fn persist(&self, item: &mut QueueItem) -> Result<(), StagingError> {
        let updated = self.store.update_queue(item).await?;
        *item = updated;
        self.set_current(Some(item.clone()));
        Ok(())
    }

    /// The engine selected for this item, falling back to the default.
    pub(crate) fn deploy_engine(&self, item: &QueueItem) -> Arc<dyn DeployEngine> {
        let engines = self.deploy_engines.read().expect("engine registry poisoned");
        if !item.status.deploy_engine.is_empty() {
            if let Some(engine) = engines.get(&item.status.deploy_engine) {
                return Arc::clone(engine);
            }
        }
        engines
            .get(deploy::mock::ENGINE_NAME)
            .cloned()
            .expect("default engine is registered at construction")
    }

    pub(crate) fn test_runner(&self, name: &str) -> Option<Arc<dyn TestRunner>> {
        self.test_runners
            .read()
            .expect("runner registry poisoned")
            .get(name)
            .cloned()
    }

    pub(crate) fn emit(&self, severity: EventSeverity, event: StagingEvent) {
        let _ = self
            .event_tx
            .send(StagingEventEnvelope::new(self.team_name.as_str(), severity, event));
    }

    fn set_current(&self, item: Option<QueueItem>) {
        *self
            .current_item
            .lock()
            .expect("current item lock poisoned") = item;
    }
}

/// Which end of the run a cleanup pass belongs to.
#[derive(Debug, Clone, Copy)]
enum CleanupPhase {
    Before,
    After,
}

impl CleanupPhase {
    fn started_condition(&self) -> QueueConditionType {
        match self {
            CleanupPhase::Before => QueueConditionType::CleaningBeforeStarted,
            CleanupPhase::After => QueueConditionType::CleaningAfterStarted,
        }
    }

    fn cleaned_condition(&self) -> QueueConditionType {
        match self {
            CleanupPhase::Before => QueueConditionType::CleanedBefore,
            CleanupPhase::After => QueueConditionType::CleanedAfter,
        }
    }

    fn next_state(&self) -> QueueState {
        match self {
            CleanupPhase::Before => QueueState::DetectingImageMissing,
            CleanupPhase::After => QueueState::Deleting,
        }
    }
}
