//! Team component configuration types.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Map of parent component name to its configuration.
pub type ComponentSet = BTreeMap<String, Component>;

/// A top-level component listed in team configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Component {
    /// Component name
    pub name: String,

    /// Chart used to install the component
    #[serde(default)]
    pub chart: ComponentChart,

    /// Image the component runs
    #[serde(default)]
    pub image: ComponentImage,

    /// Values overlaid onto the chart at install time
    #[serde(default)]
    pub values: serde_json::Value,
}

/// Chart coordinates for a component.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComponentChart {
    /// Chart repository URL
    pub repository: String,

    /// Chart name
    pub name: String,

    /// Pinned chart version, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Image coordinates for a component.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComponentImage {
    /// Image repository
    pub repository: String,

    /// Tag match pattern used by the upstream version detector
    #[serde(default)]
    pub pattern: String,
}

/// Deterministic release name for a component in a namespace.
///
/// Used for both install and delete, so it must be stable across runs.
pub fn release_name(namespace: &str, component: &str) -> String {
    format!("{namespace}-{component}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_name_is_deterministic() {
        assert_eq!(release_name("s2h-teamtest", "redis"), "s2h-teamtest-redis");
        assert_eq!(
            release_name("s2h-teamtest", "redis"),
            release_name("s2h-teamtest", "redis"),
        );
    }
}
