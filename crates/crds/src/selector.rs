//! Selector types shared by LogConfig and ClusterLogConfig
//!
//! A selector decides which targets a pipeline configuration applies to:
//! pods (by label), workloads, the node the agent runs on (by node label),
//! or the whole cluster.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Kind of target a selector addresses.
///
/// Serializes as lowercase ("pod", "workload", ...) to stay compatible with
/// existing manifests.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum SelectorType {
    /// Pods matched by label selector
    #[default]
    Pod,

    /// Workloads (Deployments, DaemonSets, ...) matched by label selector
    Workload,

    /// The node the agent runs on, matched by node selector
    Node,

    /// The aggregator cluster itself
    Cluster,

    /// Every target; used for shared kinds such as Sink and Interceptor
    All,
}

impl SelectorType {
    /// Lowercase wire name of the selector type.
    pub fn as_str(self) -> &'static str {
        match self {
            SelectorType::Pod => "pod",
            SelectorType::Workload => "workload",
            SelectorType::Node => "node",
            SelectorType::Cluster => "cluster",
            SelectorType::All => "all",
        }
    }
}

impl fmt::Display for SelectorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Selector attached to a LogConfig or ClusterLogConfig.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Selector {
    /// Target kind
    #[serde(rename = "type")]
    pub selector_type: SelectorType,

    /// Cluster name the configuration belongs to (empty matches the default cluster)
    #[serde(default)]
    pub cluster: String,

    /// Pod label selector, used by `pod` and `workload` types.
    /// A value of `*` matches any value for that key.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub label_selector: BTreeMap<String, String>,

    /// Node label selector, used by the `node` type
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,
}

/// Pipeline body of a configuration.
///
/// Only references are interpreted by the discovery controller; `sources` is
/// passed through to the agent untouched.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Pipeline {
    /// Source definitions (YAML text)
    #[serde(default)]
    pub sources: String,

    /// Name of the Sink resource this pipeline writes to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sink_ref: Option<String>,

    /// Name of the Interceptor resource applied to this pipeline
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interceptor_ref: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_deserializes_wire_format() {
        let yaml = r#"
type: pod
cluster: prod
labelSelector:
  app: nginx
"#;
        let selector: Selector = serde_yaml::from_str(yaml).expect("valid selector");
        assert_eq!(selector.selector_type, SelectorType::Pod);
        assert_eq!(selector.cluster, "prod");
        assert_eq!(selector.label_selector.get("app").map(String::as_str), Some("nginx"));
        assert!(selector.node_selector.is_empty());
    }

    #[test]
    fn test_selector_cluster_defaults_to_empty() {
        let selector: Selector = serde_yaml::from_str("type: node").expect("valid selector");
        assert_eq!(selector.selector_type, SelectorType::Node);
        assert_eq!(selector.cluster, "");
    }

    #[test]
    fn test_selector_type_display() {
        assert_eq!(SelectorType::Workload.to_string(), "workload");
        assert_eq!(SelectorType::All.to_string(), "all");
    }
}
