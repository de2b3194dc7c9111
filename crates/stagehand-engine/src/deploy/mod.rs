//! Deploy engine trait and implementations.

pub mod helm3;
pub mod mock;

use std::collections::BTreeMap;

use async_trait::async_trait;
use stagehand_types::{Component, QueueItem};

use crate::error::Result;

/// Installs and removes named releases in the staging namespace.
///
/// `refname` is the deterministic release name derived from
/// `(namespace, component)`; the same name is used for install and delete.
#[async_trait]
pub trait DeployEngine: Send + Sync {
    /// Stable engine name used for registration and selection.
    fn name(&self) -> &str;

    /// Mocked engines skip real cluster work; cleanup treats their
    /// namespaces as already clean.
    fn is_mocked(&self) -> bool;

    /// Install or upgrade the release for `component`.
    async fn install(&self, refname: &str, component: &Component, item: &QueueItem) -> Result<()>;

    /// Remove the release, keeping resource deletion graceful.
    async fn delete(&self, refname: &str) -> Result<()>;

    /// Remove the release aggressively, skipping hooks. Best effort.
    async fn force_delete(&self, refname: &str) -> Result<()>;

    /// Label selectors matching every resource the release owns.
    fn label_selectors(&self, refname: &str) -> BTreeMap<String, String>;
}
