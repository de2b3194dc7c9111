//! Gitlab test runner.

use async_trait::async_trait;
use stagehand_types::{ConfigTestRunner, QueueItem};
use tracing::debug;

use super::{TestRunner, TestRunnerResult};
use crate::error::{EngineError, Result};

pub const RUNNER_NAME: &str = "gitlab";

/// Triggers Gitlab pipelines and polls the newest pipeline on the
/// configured ref.
pub struct GitlabRunner {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl GitlabRunner {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            token: token.into(),
        }
    }

    fn gitlab_config<'a>(
        config: &'a ConfigTestRunner,
        op: &str,
    ) -> Result<&'a stagehand_types::ConfigGitlab> {
        config.gitlab.as_ref().ok_or_else(|| EngineError::Trigger {
            runner: RUNNER_NAME.to_string(),
            detail: format!("gitlab configuration missing for {op}"),
        })
    }
}

#[async_trait]
impl TestRunner for GitlabRunner {
    fn name(&self) -> &str {
        RUNNER_NAME
    }

    async fn trigger(&self, config: &ConfigTestRunner, item: &QueueItem) -> Result<()> {
        let gitlab = Self::gitlab_config(config, "trigger")?;

        let url = format!(
            "{}/api/v4/projects/{}/trigger/pipeline",
            self.base_url, gitlab.project_id,
        );
        let resp = self
            .client
            .post(url)
            .form(&[
                ("token", gitlab.pipeline_trigger_token.as_str()),
                ("ref", gitlab.branch.as_str()),
                ("variables[S2H_QUEUE]", item.metadata.name.as_str()),
            ])
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(EngineError::Trigger {
                runner: RUNNER_NAME.to_string(),
                detail: format!("pipeline trigger returned {}", resp.status()),
            });
        }

        debug!(queue = %item.metadata.name, project = %gitlab.project_id, "gitlab pipeline triggered");
        Ok(())
    }

    async fn get_result(
        &self,
        config: &ConfigTestRunner,
        item: &QueueItem,
    ) -> Result<TestRunnerResult> {
        let gitlab = Self::gitlab_config(config, "get result")?;

        let url = format!(
            "{}/api/v4/projects/{}/pipelines",
            self.base_url, gitlab.project_id,
        );
        let resp = self
            .client
            .get(url)
            .query(&[
                ("ref", gitlab.branch.as_str()),
                ("order_by", "id"),
                ("sort", "desc"),
                ("per_page", "1"),
            ])
            .header("PRIVATE-TOKEN", &self.token)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(EngineError::UnexpectedResponse {
                runner: RUNNER_NAME.to_string(),
                detail: format!("pipelines query returned {}", resp.status()),
            });
        }

        let payload: serde_json::Value = resp.json().await?;
        let status = payload
            .as_array()
            .and_then(|p| p.first())
            .and_then(|p| p.get("status"))
            .and_then(|s| s.as_str())
            .unwrap_or("pending");

        debug!(queue = %item.metadata.name, status, "gitlab pipeline status");
        let finished = matches!(status, "success" | "failed" | "canceled" | "skipped");
        Ok(TestRunnerResult {
            success: status == "success",
            finished,
        })
    }
}
