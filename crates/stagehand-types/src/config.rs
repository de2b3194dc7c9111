//! Per-team configuration as resolved by the config source.
//!
//! The controller only reads `staging.deployment`; everything else belongs
//! to the producer side of the system.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Resolved configuration for one team.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigSpec {
    /// Staging environment settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staging: Option<ConfigStaging>,
}

impl ConfigSpec {
    /// The deploy configuration, when one is resolvable.
    pub fn deployment(&self) -> Option<&ConfigDeploy> {
        self.staging.as_ref().and_then(|s| s.deployment.as_ref())
    }

    /// The test runner configuration, when one is resolvable.
    pub fn test_runner(&self) -> Option<&ConfigTestRunner> {
        self.deployment().and_then(|d| d.test_runner.as_ref())
    }
}

/// Staging section of the team configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigStaging {
    /// Deployment settings for the staging namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment: Option<ConfigDeploy>,

    /// Producer-side retry budget; the controller only reports outcome
    #[serde(default)]
    pub max_retry: u32,
}

/// Deployment settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigDeploy {
    /// Overall deployment timeout
    #[serde(default = "default_deploy_timeout", with = "duration_secs")]
    pub timeout: Duration,

    /// Per-component cleanup timeout before forced escalation.
    /// Zero means the controller default applies.
    #[serde(default, with = "duration_secs")]
    pub component_cleanup_timeout: Duration,

    /// Deploy engine to use, by registered name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine: Option<String>,

    /// Test runner configuration; absent means testing is skipped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_runner: Option<ConfigTestRunner>,
}

impl Default for ConfigDeploy {
    fn default() -> Self {
        Self {
            timeout: default_deploy_timeout(),
            component_cleanup_timeout: Duration::ZERO,
            engine: None,
            test_runner: None,
        }
    }
}

fn default_deploy_timeout() -> Duration {
    Duration::from_secs(1800)
}

/// Test runner configuration.
///
/// Each populated sub-config enables the runner of the same name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigTestRunner {
    /// Testing timeout; zero means the controller default applies
    #[serde(default, with = "duration_secs")]
    pub timeout: Duration,

    /// Poll interval while waiting for results; zero means the default
    #[serde(default, with = "duration_secs")]
    pub polling_time: Duration,

    /// Teamcity runner settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub teamcity: Option<ConfigTeamcity>,

    /// Gitlab runner settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gitlab: Option<ConfigGitlab>,

    /// Mock runner settings, for tests and dry runs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_mock: Option<ConfigTestMock>,
}

/// Teamcity build to trigger.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigTeamcity {
    /// Build type id
    pub build_type_id: String,

    /// Branch to run against
    #[serde(default)]
    pub branch: String,
}

/// Gitlab pipeline to trigger.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigGitlab {
    /// Project id
    pub project_id: String,

    /// Ref to run against
    #[serde(default)]
    pub branch: String,

    /// Pipeline trigger token
    #[serde(default)]
    pub pipeline_trigger_token: String,
}

/// Mock runner settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigTestMock {
    /// Result the mock runner reports
    pub result: bool,
}

/// Serde helper for durations expressed as whole seconds.
pub mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}
