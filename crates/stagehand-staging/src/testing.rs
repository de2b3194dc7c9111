//! Testing driver for the Testing state.
//!
//! Triggers every runner enabled in the team's test configuration exactly
//! once per item, then polls them on each tick until all report finished.
//! Per-runner result conditions are written once with their final value;
//! the aggregate outcome lands in the `Tested` condition.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use stagehand_engine::runner::{gitlab, teamcity};
use stagehand_engine::{runner, TestRunner};
use stagehand_types::{
    ConditionStatus, ConfigTestRunner, EventSeverity, QueueConditionType, QueueItem, QueueState,
    StagingEvent, TeamcityTestStatus,
};
use tracing::error;

use crate::controller::{StagingController, Transition};
use crate::error::StagingError;

/// Default testing timeout.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(1800);

/// Default poll interval while waiting for results.
pub const TEST_POLLING: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TestResult {
    Success,
    Failure,
    Unknown,
}

/// Whether testing has run past its timeout at `now`.
///
/// Landing exactly on the boundary does not count as timed out.
fn test_timed_out(start: Option<DateTime<Utc>>, timeout: Duration, now: DateTime<Utc>) -> bool {
    let Some(start) = start else {
        return false;
    };
    let timeout =
        chrono::Duration::from_std(timeout).unwrap_or(chrono::Duration::MAX);
    now - start > timeout
}

impl StagingController {
    pub(crate) async fn start_testing(
        &self,
        item: &mut QueueItem,
    ) -> Result<Transition, StagingError> {
        let config = self.config_source.get(&self.team_name).await?;
        let test_config = config.test_runner().cloned();

        let testing_timeout = test_config
            .as_ref()
            .map(|t| t.timeout)
            .filter(|t| !t.is_zero())
            .unwrap_or(TEST_TIMEOUT);

        // timeout is not retried: the failure is persisted together with the
        // advance, then surfaced for observability
        if test_timed_out(item.status.start_testing_time, testing_timeout, Utc::now()) {
            item.status.set_condition(
                QueueConditionType::Tested,
                ConditionStatus::False,
                "queue testing timeout",
            );
            self.update_queue_with_state(item, QueueState::Collecting).await?;
            error!(queue = %item.metadata.name, "test timeout");
            return Err(StagingError::TestTimeout);
        }

        if item.spec.skip_test_runner {
            item.status.set_condition(
                QueueConditionType::Tested,
                ConditionStatus::True,
                "skip running test",
            );
            return Ok(Transition::Advance(QueueState::Collecting));
        }

        let Some(test_config) = test_config else {
            item.status.set_condition(
                QueueConditionType::Tested,
                ConditionStatus::True,
                "queue testing succeeded because no testing configuration",
            );
            return Ok(Transition::Advance(QueueState::Collecting));
        };

        let runners = self.resolve_runners(&test_config);
        if runners.is_empty() {
            item.status.set_condition(
                QueueConditionType::Tested,
                ConditionStatus::False,
                "test runner not found",
            );
            self.update_queue_with_state(item, QueueState::Collecting).await?;
            error!(queue = %item.metadata.name, "test runner not found");
            return Err(StagingError::TestRunnerNotFound);
        }

        if item.status.start_testing_time.is_none() {
            item.status.start_testing_time = Some(Utc::now());
            self.persist(item).await?;
        }

        for test_runner in &runners {
            self.trigger_test(item, test_runner.as_ref(), &test_config)
                .await?;
        }

        if !item.status.is_condition_true(QueueConditionType::TestTriggered) {
            item.status.set_condition(
                QueueConditionType::TestTriggered,
                ConditionStatus::True,
                "queue testing triggered",
            );
            self.persist(item).await?;
            self.emit(
                EventSeverity::Info,
                StagingEvent::TestsTriggered {
                    queue: item.metadata.name.clone(),
                    runners: runners.iter().map(|r| r.name().to_string()).collect(),
                },
            );
        }

        // polling check
        let mut finished = true;
        let mut aggregate = ConditionStatus::True;
        let mut message = "queue testing succeeded";
        for test_runner in &runners {
            let result = self
                .get_test_result(item, test_runner.as_ref(), &test_config)
                .await?;
            match result {
                TestResult::Unknown => finished = false,
                TestResult::Success | TestResult::Failure => {
                    if result == TestResult::Failure {
                        aggregate = ConditionStatus::False;
                        message = "queue testing failed";
                    }
                    self.set_test_result_condition(item, test_runner.name(), result)
                        .await?;
                }
            }
        }

        if finished {
            self.emit(
                EventSeverity::Info,
                StagingEvent::TestsFinished {
                    queue: item.metadata.name.clone(),
                    passed: aggregate == ConditionStatus::True,
                },
            );
            item.status
                .set_condition(QueueConditionType::Tested, aggregate, message);
            return Ok(Transition::Advance(QueueState::Collecting));
        }

        Ok(Transition::Stay)
    }

    /// Runners enabled by the test configuration, in configuration order.
    /// Configured but unregistered runners are dropped.
    fn resolve_runners(&self, test_config: &ConfigTestRunner) -> Vec<Arc<dyn TestRunner>> {
        let mut runners = Vec::new();
        if test_config.teamcity.is_some() {
            runners.extend(self.test_runner(teamcity::RUNNER_NAME));
        }
        if test_config.gitlab.is_some() {
            runners.extend(self.test_runner(gitlab::RUNNER_NAME));
        }
        if test_config.test_mock.is_some() {
            runners.extend(self.test_runner(runner::mock::RUNNER_NAME));
        }
        runners
    }

    async fn trigger_test(
        &self,
        item: &mut QueueItem,
        test_runner: &dyn TestRunner,
        test_config: &ConfigTestRunner,
    ) -> Result<(), StagingError> {
        if item.status.is_condition_true(QueueConditionType::TestTriggered) {
            return Ok(());
        }

        test_runner
            .trigger(test_config, item)
            .await
            .map_err(|e| {
                error!(name = test_runner.name(), error = %e, "testing triggered error");
                e
            })?;

        if test_runner.name() == teamcity::RUNNER_NAME {
            // placeholder until the build reports its own number
            item.status.test_runner.teamcity = Some(TeamcityTestStatus {
                build_number: "Build cannot be triggered in time".to_string(),
            });
        }

        Ok(())
    }

    async fn get_test_result(
        &self,
        item: &QueueItem,
        test_runner: &dyn TestRunner,
        test_config: &ConfigTestRunner,
    ) -> Result<TestResult, StagingError> {
        let result = test_runner
            .get_result(test_config, item)
            .await
            .map_err(|e| {
                error!(name = test_runner.name(), error = %e, "testing get result error");
                e
            })?;

        if !result.finished {
            let polling = if test_config.polling_time.is_zero() {
                TEST_POLLING
            } else {
                test_config.polling_time
            };
            tokio::time::sleep(polling).await;
            return Ok(TestResult::Unknown);
        }

        Ok(if result.success {
            TestResult::Success
        } else {
            TestResult::Failure
        })
    }

    async fn set_test_result_condition(
        &self,
        item: &mut QueueItem,
        runner_name: &str,
        result: TestResult,
    ) -> Result<(), StagingError> {
        let condition_type = match runner_name {
            teamcity::RUNNER_NAME => QueueConditionType::TeamcityTestResult,
            gitlab::RUNNER_NAME => QueueConditionType::GitlabTestResult,
            _ => return Ok(()),
        };

        let (status, message) = match result {
            TestResult::Success => (ConditionStatus::True, "queue testing succeeded"),
            TestResult::Failure => (ConditionStatus::False, "queue testing failed"),
            TestResult::Unknown => (ConditionStatus::Unknown, "unknown result"),
        };

        item.status.set_condition(condition_type, status, message);
        self.persist(item).await
    }
}
