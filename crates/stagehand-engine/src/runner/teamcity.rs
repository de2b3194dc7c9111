//! Teamcity test runner.

use async_trait::async_trait;
use stagehand_types::{ConfigTestRunner, QueueItem};
use tracing::{debug, warn};

use super::{TestRunner, TestRunnerResult};
use crate::error::{EngineError, Result};

pub const RUNNER_NAME: &str = "teamcity";

/// Triggers Teamcity builds over its REST API and polls the latest build
/// on the queue item's branch.
pub struct TeamcityRunner {
    client: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
}

impl TeamcityRunner {
    pub fn new(
        base_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            username: username.into(),
            password: password.into(),
        }
    }

    fn branch_for(config: &ConfigTestRunner, item: &QueueItem) -> String {
        let configured = config
            .teamcity
            .as_ref()
            .map(|t| t.branch.clone())
            .unwrap_or_default();
        if configured.is_empty() {
            format!("s2h/{}", item.metadata.name)
        } else {
            configured
        }
    }
}

#[async_trait]
impl TestRunner for TeamcityRunner {
    fn name(&self) -> &str {
        RUNNER_NAME
    }

    async fn trigger(&self, config: &ConfigTestRunner, item: &QueueItem) -> Result<()> {
        let teamcity = config.teamcity.as_ref().ok_or_else(|| EngineError::Trigger {
            runner: RUNNER_NAME.to_string(),
            detail: "teamcity configuration missing".to_string(),
        })?;

        let branch = Self::branch_for(config, item);
        let body = serde_json::json!({
            "branchName": branch,
            "buildType": { "id": teamcity.build_type_id },
            "properties": {
                "property": [
                    { "name": "queue", "value": item.metadata.name },
                    { "name": "namespace", "value": item.metadata.namespace },
                ],
            },
        });

        let resp = self
            .client
            .post(format!("{}/app/rest/buildQueue", self.base_url))
            .basic_auth(&self.username, Some(&self.password))
            .header("Accept", "application/json")
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(EngineError::Trigger {
                runner: RUNNER_NAME.to_string(),
                detail: format!("build queue returned {}", resp.status()),
            });
        }

        debug!(queue = %item.metadata.name, branch, "teamcity build queued");
        Ok(())
    }

    async fn get_result(
        &self,
        config: &ConfigTestRunner,
        item: &QueueItem,
    ) -> Result<TestRunnerResult> {
        let teamcity = config.teamcity.as_ref().ok_or_else(|| {
            EngineError::UnexpectedResponse {
                runner: RUNNER_NAME.to_string(),
                detail: "teamcity configuration missing".to_string(),
            }
        })?;

        let branch = Self::branch_for(config, item);
        let locator = format!(
            "buildType:{},branch:{},running:any,count:1",
            teamcity.build_type_id, branch,
        );
        let resp = self
            .client
            .get(format!("{}/app/rest/builds", self.base_url))
            .query(&[("locator", locator.as_str())])
            .basic_auth(&self.username, Some(&self.password))
            .header("Accept", "application/json")
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(EngineError::UnexpectedResponse {
                runner: RUNNER_NAME.to_string(),
                detail: format!("builds query returned {}", resp.status()),
            });
        }

        let payload: serde_json::Value = resp.json().await?;
        let build = match payload
            .get("build")
            .and_then(|b| b.as_array())
            .and_then(|b| b.first())
        {
            Some(build) => build,
            None => {
                // queued but not yet visible
                warn!(queue = %item.metadata.name, "no teamcity build found yet");
                return Ok(TestRunnerResult {
                    success: false,
                    finished: false,
                });
            }
        };

        let state = build.get("state").and_then(|s| s.as_str()).unwrap_or("");
        let status = build.get("status").and_then(|s| s.as_str()).unwrap_or("");

        Ok(TestRunnerResult {
            success: status.eq_ignore_ascii_case("SUCCESS"),
            finished: state.eq_ignore_ascii_case("finished"),
        })
    }
}
