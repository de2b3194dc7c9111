//! Mock test runner.

use async_trait::async_trait;
use stagehand_types::{ConfigTestRunner, QueueItem};

use super::{TestRunner, TestRunnerResult};
use crate::error::Result;

pub const RUNNER_NAME: &str = "mock";

/// Reports the result configured in `test_mock`, always finished.
#[derive(Default)]
pub struct MockTestRunner;

impl MockTestRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TestRunner for MockTestRunner {
    fn name(&self) -> &str {
        RUNNER_NAME
    }

    async fn trigger(&self, _config: &ConfigTestRunner, _item: &QueueItem) -> Result<()> {
        Ok(())
    }

    async fn get_result(
        &self,
        config: &ConfigTestRunner,
        _item: &QueueItem,
    ) -> Result<TestRunnerResult> {
        let success = config.test_mock.map(|m| m.result).unwrap_or(false);
        Ok(TestRunnerResult {
            success,
            finished: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use stagehand_types::{ConfigTestMock, QueueType};

    use super::*;

    #[tokio::test]
    async fn reports_configured_result() {
        let runner = MockTestRunner::new();
        let item = QueueItem::new("team", "ns", "redis", vec![], QueueType::Upgrade);
        let config = ConfigTestRunner {
            test_mock: Some(ConfigTestMock { result: true }),
            ..ConfigTestRunner::default()
        };

        let result = runner.get_result(&config, &item).await.unwrap();
        assert!(result.finished);
        assert!(result.success);
    }
}
