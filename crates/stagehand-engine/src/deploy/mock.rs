//! Mock deploy engine.

use std::collections::BTreeMap;

use async_trait::async_trait;
use dashmap::DashSet;
use stagehand_types::{Component, QueueItem};
use tracing::debug;

use super::DeployEngine;
use crate::error::Result;

pub const ENGINE_NAME: &str = "mock";

/// Records install/delete calls without touching any cluster.
#[derive(Default)]
pub struct MockEngine {
    releases: DashSet<String>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a release is currently "installed".
    pub fn is_installed(&self, refname: &str) -> bool {
        self.releases.contains(refname)
    }
}

#[async_trait]
impl DeployEngine for MockEngine {
    fn name(&self) -> &str {
        ENGINE_NAME
    }

    fn is_mocked(&self) -> bool {
        true
    }

    async fn install(&self, refname: &str, component: &Component, _item: &QueueItem) -> Result<()> {
        debug!(refname, component = %component.name, "mock install");
        self.releases.insert(refname.to_string());
        Ok(())
    }

    async fn delete(&self, refname: &str) -> Result<()> {
        self.releases.remove(refname);
        Ok(())
    }

    async fn force_delete(&self, refname: &str) -> Result<()> {
        self.releases.remove(refname);
        Ok(())
    }

    fn label_selectors(&self, refname: &str) -> BTreeMap<String, String> {
        [("release".to_string(), refname.to_string())].into()
    }
}
