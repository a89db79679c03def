//! Helper functions shared by filters and reconcilers
//!
//! Object keys, pod readiness, cluster ownership and label matching.

use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;

/// Annotation marking a sidecar-injected copy of a configuration.
/// Its presence (any value) excludes the object from this controller.
pub const INJECTOR_ANNOTATION_KEY: &str = "sidecar.loggie.io/inject";

/// Label selector value matching any value of the key.
pub const WILDCARD_LABEL_VALUE: &str = "*";

/// Builds the `<namespace>/<name>` key, or `<name>` for cluster-scoped objects.
///
/// Returns `None` when the object has no name.
pub fn meta_namespace_key(meta: &ObjectMeta) -> Option<String> {
    let name = meta.name.as_deref().filter(|n| !n.is_empty())?;
    Some(namespaced_key(meta.namespace.as_deref(), name))
}

/// Joins a namespace and a name into a cache key.
pub fn namespaced_key(namespace: Option<&str>, name: &str) -> String {
    match namespace {
        Some(ns) if !ns.is_empty() => format!("{}/{}", ns, name),
        _ => name.to_string(),
    }
}

/// Splits a cache key into namespace and name.
pub fn split_key(key: &str) -> (Option<&str>, &str) {
    match key.split_once('/') {
        Some((ns, name)) => (Some(ns), name),
        None => (None, key),
    }
}

/// Whether the resource version token differs between two snapshots.
pub fn version_changed(old: &ObjectMeta, new: &ObjectMeta) -> bool {
    old.resource_version != new.resource_version
}

/// Whether the spec generation differs between two snapshots.
/// Status-only updates leave the generation untouched.
pub fn generation_changed(old: &ObjectMeta, new: &ObjectMeta) -> bool {
    old.generation != new.generation
}

/// Whether a pod is ready to have its logs collected.
///
/// The pod must be `Running` and every container must have started, so
/// that container log files exist on the node.
pub fn is_pod_ready(pod: &Pod) -> bool {
    let Some(status) = pod.status.as_ref() else {
        return false;
    };
    if status.phase.as_deref() != Some("Running") {
        return false;
    }
    let Some(containers) = status.container_statuses.as_ref() else {
        return false;
    };
    !containers.is_empty()
        && containers
            .iter()
            .all(|c| c.state.as_ref().is_some_and(|s| s.running.is_some()))
}

/// Cluster-scoping check for configuration objects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ownership {
    cluster: String,
}

impl Ownership {
    /// Creates an ownership check for the configured cluster name.
    pub fn new(cluster: impl Into<String>) -> Self {
        Self { cluster: cluster.into() }
    }

    /// The configured cluster name.
    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    /// A resource belongs to this controller iff its selector names the
    /// configured cluster and it carries no sidecar-injection annotation.
    pub fn belongs(&self, selector_cluster: &str, annotations: Option<&BTreeMap<String, String>>) -> bool {
        if self.cluster != selector_cluster {
            return false;
        }

        // If there's a sidecar-injected annotation, just ignore it
        !annotations.is_some_and(|a| a.contains_key(INJECTOR_ANNOTATION_KEY))
    }
}

/// Whether `labels` satisfy every entry of `selector`.
///
/// An empty selector matches everything. A selector value of `*` only
/// requires the key to be present.
pub fn labels_match(selector: &BTreeMap<String, String>, labels: Option<&BTreeMap<String, String>>) -> bool {
    selector.iter().all(|(key, want)| {
        labels
            .and_then(|l| l.get(key))
            .is_some_and(|have| want == WILDCARD_LABEL_VALUE || have == want)
    })
}
