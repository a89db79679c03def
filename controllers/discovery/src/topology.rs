//! Mode-specific controller state.
//!
//! Cluster mode watches pods and nodes and keeps pod, cluster and node
//! indices. Fleet mode watches Vm objects and keeps only a node index.
//! ClusterLogConfig, Sink and Interceptor caches exist in both modes.

use crate::index::MatchIndex;
use crate::reconcile_helpers::split_key;
use crds::{ClusterLogConfig, Interceptor, LogConfig, Sink, Vm};
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::Resource;
use kube_runtime::reflector::{ObjectRef, Store};
use std::collections::BTreeMap;
use std::sync::Arc;

/// This agent's own Node or Vm, fetched once at startup.
#[derive(Debug, Clone)]
pub enum SelfIdentity {
    Node(Arc<Node>),
    Vm(Arc<Vm>),
}

impl SelfIdentity {
    pub fn kind(&self) -> &'static str {
        match self {
            SelfIdentity::Node(_) => "node",
            SelfIdentity::Vm(_) => "vm",
        }
    }

    pub fn name(&self) -> &str {
        let meta = match self {
            SelfIdentity::Node(node) => node.meta(),
            SelfIdentity::Vm(vm) => vm.meta(),
        };
        meta.name.as_deref().unwrap_or_default()
    }

    pub fn labels(&self) -> Option<&BTreeMap<String, String>> {
        match self {
            SelfIdentity::Node(node) => node.metadata.labels.as_ref(),
            SelfIdentity::Vm(vm) => vm.metadata.labels.as_ref(),
        }
    }
}

/// Caches shared by both modes.
#[derive(Clone)]
pub struct SharedListers {
    pub cluster_log_configs: Store<ClusterLogConfig>,
    pub sinks: Store<Sink>,
    pub interceptors: Store<Interceptor>,
}

#[derive(Clone)]
pub struct ClusterTopology {
    pub pods: Store<Pod>,
    pub nodes: Store<Node>,
    pub log_configs: Store<LogConfig>,
    pub pod_index: MatchIndex,
    pub cluster_index: MatchIndex,
    pub node_index: MatchIndex,
}

#[derive(Clone)]
pub struct FleetTopology {
    pub vms: Store<Vm>,
    pub node_index: MatchIndex,
}

/// State selected once at construction time.
#[derive(Clone)]
pub enum Topology {
    Cluster(ClusterTopology),
    Fleet(FleetTopology),
}

impl Topology {
    pub fn mode(&self) -> &'static str {
        match self {
            Topology::Cluster(_) => "cluster",
            Topology::Fleet(_) => "fleet",
        }
    }

    /// The node index exists in both modes.
    pub fn node_index(&self) -> &MatchIndex {
        match self {
            Topology::Cluster(cluster) => &cluster.node_index,
            Topology::Fleet(fleet) => &fleet.node_index,
        }
    }
}

/// Looks up a cached object by its `<namespace>/<name>` or `<name>` key.
pub fn get_by_key<K>(store: &Store<K>, key: &str) -> Option<Arc<K>>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    let (namespace, name) = split_key(key);
    let object_ref = match namespace {
        Some(ns) => ObjectRef::new(name).within(ns),
        None => ObjectRef::new(name),
    };
    store.get(&object_ref)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::informer::ChangeFeed;
    use crate::test_utils::*;
    use kube_runtime::watcher;

    #[test]
    fn test_get_by_key() {
        let mut feed = ChangeFeed::<Pod>::default();
        feed.observe(&watcher::Event::Apply(create_test_pod("default", "p", "1", true)));
        let store = feed.store();

        assert!(get_by_key(&store, "default/p").is_some());
        assert!(get_by_key(&store, "other/p").is_none());
        assert!(get_by_key(&store, "p").is_none());
    }

    #[test]
    fn test_self_identity_accessors() {
        let identity = SelfIdentity::Vm(Arc::new(create_test_vm("vm-1", "1", &[("zone", "a")])));
        assert_eq!(identity.kind(), "vm");
        assert_eq!(identity.name(), "vm-1");
        assert_eq!(identity.labels().and_then(|l| l.get("zone")).map(String::as_str), Some("a"));
    }
}
