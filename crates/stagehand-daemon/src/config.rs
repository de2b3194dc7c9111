//! Configuration for the staging daemon.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};
use stagehand_staging::{GitlabCredentials, RunnerCredentials, TeamcityCredentials};

use crate::error::{DaemonError, DaemonResult};

/// Main daemon configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Controller identity and scope
    #[serde(default)]
    pub staging: StagingConfig,

    /// External test runner credentials
    #[serde(default)]
    pub credentials: CredentialsConfig,
}

impl DaemonConfig {
    /// Load from a TOML file, or defaults when no path is given.
    pub fn load(path: Option<&str>) -> DaemonResult<Self> {
        match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)?;
                toml::from_str(&raw)
                    .map_err(|e| DaemonError::Config(format!("{path}: {e}")))
            }
            None => Ok(Self::default()),
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address
    pub listen_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8090".parse().expect("valid default listen addr"),
        }
    }
}

/// Controller identity and scope.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StagingConfig {
    /// Team this controller works for
    #[serde(default)]
    pub team_name: String,

    /// Namespace the staging environment lives in
    #[serde(default)]
    pub namespace: String,

    /// Opaque token peers must present on the RPC surface
    #[serde(default)]
    pub auth_token: String,
}

/// External runner credentials; a runner is registered only when its
/// section is present.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CredentialsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub teamcity: Option<TeamcityCredentialConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gitlab: Option<GitlabCredentialConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamcityCredentialConfig {
    pub base_url: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitlabCredentialConfig {
    pub base_url: String,
    #[serde(default)]
    pub token: String,
}

impl CredentialsConfig {
    /// Map onto the controller's credential set.
    pub fn runner_credentials(&self) -> RunnerCredentials {
        RunnerCredentials {
            teamcity: self.teamcity.as_ref().map(|t| TeamcityCredentials {
                base_url: t.base_url.clone(),
                username: t.username.clone(),
                password: t.password.clone(),
            }),
            gitlab: self.gitlab.as_ref().map(|g| GitlabCredentials {
                base_url: g.base_url.clone(),
                token: g.token.clone(),
            }),
        }
    }
}
