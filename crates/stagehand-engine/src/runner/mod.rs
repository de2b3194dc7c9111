//! Test runner trait and implementations.

pub mod gitlab;
pub mod mock;
pub mod teamcity;

use async_trait::async_trait;
use stagehand_types::{ConfigTestRunner, QueueItem};

use crate::error::Result;

/// Outcome of polling a runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TestRunnerResult {
    /// Whether the run passed; meaningless until `finished`
    pub success: bool,

    /// Whether the run has finished
    pub finished: bool,
}

/// Triggers an external test build and polls it for completion.
#[async_trait]
pub trait TestRunner: Send + Sync {
    /// Stable runner name used for registration and selection.
    fn name(&self) -> &str;

    /// Start the external build for `item`. Called at most once per item.
    async fn trigger(&self, config: &ConfigTestRunner, item: &QueueItem) -> Result<()>;

    /// Poll the external build.
    async fn get_result(
        &self,
        config: &ConfigTestRunner,
        item: &QueueItem,
    ) -> Result<TestRunnerResult>;
}
