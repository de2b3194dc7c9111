//! Stagehand Engine - pluggable deploy engines and test runners
//!
//! Both plugin families are addressed by stable name:
//!
//! - Deploy engines: `mock`, `helm3`
//! - Test runners: `mock`, `teamcity`, `gitlab`
//!
//! The controller registers defaults at construction and resolves per-item
//! engines from team configuration. External runners are only registered
//! when their credentials are present.

#![deny(unsafe_code)]

pub mod deploy;
pub mod error;
pub mod runner;

pub use deploy::{helm3::Helm3Engine, mock::MockEngine, DeployEngine};
pub use error::{EngineError, Result};
pub use runner::{
    gitlab::GitlabRunner, mock::MockTestRunner, teamcity::TeamcityRunner, TestRunner,
    TestRunnerResult,
};
