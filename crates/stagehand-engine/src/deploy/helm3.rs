//! Helm v3 deploy engine.
//!
//! Drives the `helm` binary. Releases are installed with
//! `helm upgrade --install` so re-running an interrupted install converges,
//! and removed with `helm uninstall`; the force path skips hooks so a stuck
//! finalizer cannot block escalation.

use std::collections::BTreeMap;
use std::process::Stdio;

use async_trait::async_trait;
use stagehand_types::{Component, QueueItem};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use super::DeployEngine;
use crate::error::{EngineError, Result};

pub const ENGINE_NAME: &str = "helm3";

/// Deploy engine backed by the helm CLI.
pub struct Helm3Engine {
    namespace: String,
}

impl Helm3Engine {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    async fn run_helm(&self, args: &[&str], stdin: Option<&[u8]>) -> Result<String> {
        debug!(?args, "running helm");
        let mut cmd = Command::new("helm");
        cmd.args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn()?;
        if let Some(values) = stdin {
            let mut handle = child.stdin.take().ok_or_else(|| {
                EngineError::Command("helm stdin unavailable".to_string())
            })?;
            handle.write_all(values).await?;
            drop(handle);
        }

        let output = child.wait_with_output().await?;
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if !output.status.success() {
            return Err(EngineError::Command(format!(
                "helm {} exited with {}: {}",
                args.first().copied().unwrap_or_default(),
                output.status,
                stderr.trim(),
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn uninstall(&self, refname: &str, no_hooks: bool) -> Result<()> {
        let mut args = vec!["uninstall", refname, "--namespace", self.namespace.as_str()];
        if no_hooks {
            args.push("--no-hooks");
        }

        match self.run_helm(&args, None).await {
            Ok(_) => Ok(()),
            // uninstalling an absent release is not a failure
            Err(EngineError::Command(detail)) if detail.contains("not found") => {
                debug!(refname, "release already absent");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl DeployEngine for Helm3Engine {
    fn name(&self) -> &str {
        ENGINE_NAME
    }

    fn is_mocked(&self) -> bool {
        false
    }

    async fn install(&self, refname: &str, component: &Component, item: &QueueItem) -> Result<()> {
        let chart = &component.chart;
        let mut args = vec![
            "upgrade",
            "--install",
            refname,
            chart.name.as_str(),
            "--namespace",
            self.namespace.as_str(),
            "--repo",
            chart.repository.as_str(),
        ];
        if let Some(version) = chart.version.as_deref() {
            args.push("--version");
            args.push(version);
        }

        // overlay the version under test onto the chart values
        let mut values = component.values.clone();
        if let Some(queued) = item
            .spec
            .components
            .iter()
            .find(|c| c.name == component.name)
        {
            if let serde_json::Value::Object(ref mut map) = values {
                map.entry("image".to_string())
                    .or_insert_with(|| serde_json::json!({}));
                if let Some(image) = map.get_mut("image").and_then(|v| v.as_object_mut()) {
                    image.insert(
                        "repository".to_string(),
                        serde_json::Value::String(queued.repository.clone()),
                    );
                    image.insert(
                        "tag".to_string(),
                        serde_json::Value::String(queued.version.clone()),
                    );
                }
            }
        }

        let payload = serde_json::to_vec(&values)?;
        args.push("--values");
        args.push("-");

        self.run_helm(&args, Some(&payload)).await?;
        Ok(())
    }

    async fn delete(&self, refname: &str) -> Result<()> {
        self.uninstall(refname, false).await
    }

    async fn force_delete(&self, refname: &str) -> Result<()> {
        if let Err(e) = self.uninstall(refname, true).await {
            // force deletion is best effort; cleanup escalation continues
            warn!(refname, error = %e, "force uninstall failed");
        }
        Ok(())
    }

    fn label_selectors(&self, refname: &str) -> BTreeMap<String, String> {
        [("release".to_string(), refname.to_string())].into()
    }
}
