//! Selector-resolution reconcilers.
//!
//! The reconcilers keep the match indices in step with configurations,
//! pods and this agent's own labels, and log which targets a pipeline is
//! attached to or detached from. They read the caches and never build
//! pipelines themselves.
//!
//! A pipeline that references a Sink or Interceptor missing from the cache
//! is reported as a transient error so the configuration is retried once
//! the reference shows up.

mod log_config;
mod node;
mod pipeline_refs;
mod pod;

pub use log_config::ConfigReconciler;
pub use node::SelfReconciler;
pub use pipeline_refs::ReferenceReconciler;
pub use pod::PodReconciler;

use crate::error::ReconcileError;
use crate::filter::SelectorConfig;
use crate::index::{IndexKind, MatchIndex};
use crate::pattern::FieldPatterns;
use crate::reconcile_helpers::{Ownership, meta_namespace_key};
use crate::topology::{SelfIdentity, SharedListers, Topology, get_by_key};
use crds::{Pipeline, Selector, SelectorType};
use kube::Resource;
use kube_runtime::reflector::Store;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

/// Everything a reconciler reads. Built once at bootstrap.
pub struct ReconcileContext {
    pub topology: Topology,
    pub shared: SharedListers,
    pub identity: SelfIdentity,
    pub ownership: Ownership,
    pub patterns: FieldPatterns,
}

impl ReconcileContext {
    /// Current labels of this agent's Node or Vm.
    ///
    /// Prefers the watched copy, falling back to the snapshot fetched at startup.
    pub fn self_labels(&self) -> Option<BTreeMap<String, String>> {
        let name = self.identity.name();
        let watched = match &self.topology {
            Topology::Cluster(cluster) => get_by_key(&cluster.nodes, name).map(|n| n.metadata.labels.clone()),
            Topology::Fleet(fleet) => get_by_key(&fleet.vms, name).map(|vm| vm.metadata.labels.clone()),
        };
        watched.unwrap_or_else(|| self.identity.labels().cloned())
    }

    /// Index holding matches of `selector_type`, if this mode has one.
    pub fn index_for(&self, selector_type: SelectorType) -> Option<&MatchIndex> {
        match (&self.topology, selector_type) {
            (Topology::Cluster(cluster), SelectorType::Pod | SelectorType::Workload) => Some(&cluster.pod_index),
            (Topology::Cluster(cluster), SelectorType::Cluster) => Some(&cluster.cluster_index),
            (topology, SelectorType::Node) => Some(topology.node_index()),
            _ => None,
        }
    }

    /// Every index of this mode.
    pub fn indices(&self) -> Vec<&MatchIndex> {
        match &self.topology {
            Topology::Cluster(cluster) => vec![&cluster.pod_index, &cluster.cluster_index, &cluster.node_index],
            Topology::Fleet(fleet) => vec![&fleet.node_index],
        }
    }

    /// Cached configurations that belong to this controller, LogConfigs first.
    pub fn owned_configs(&self) -> Vec<OwnedConfig> {
        let mut configs = Vec::new();
        if let Topology::Cluster(cluster) = &self.topology {
            collect_owned(&cluster.log_configs, &self.ownership, &mut configs);
        }
        collect_owned(&self.shared.cluster_log_configs, &self.ownership, &mut configs);
        configs
    }

    /// Checks that the Sink and Interceptor a pipeline references are cached.
    pub fn check_references(&self, config_key: &str, pipeline: Option<&Pipeline>) -> Result<(), ReconcileError> {
        let Some(pipeline) = pipeline else {
            return Ok(());
        };
        let missing = |kind: &'static str, name: &str| ReconcileError::MissingReference {
            kind,
            name: name.to_string(),
            config: config_key.to_string(),
        };

        if let Some(sink) = pipeline.sink_ref.as_deref() {
            if get_by_key(&self.shared.sinks, sink).is_none() {
                return Err(missing("sink", sink));
            }
        }
        if let Some(interceptor) = pipeline.interceptor_ref.as_deref() {
            if get_by_key(&self.shared.interceptors, interceptor).is_none() {
                return Err(missing("interceptor", interceptor));
            }
        }
        Ok(())
    }

    /// Extra fields rendered for a matched target.
    pub fn target_fields(&self, index: IndexKind, target: &str) -> BTreeMap<String, String> {
        match (index, &self.topology) {
            (IndexKind::Pod, Topology::Cluster(cluster)) => get_by_key(&cluster.pods, target)
                .map(|pod| self.patterns.render_pod(&pod))
                .unwrap_or_default(),
            (IndexKind::Node, _) => match &self.identity {
                SelfIdentity::Node(node) => self.patterns.render_node(node),
                SelfIdentity::Vm(vm) => self.patterns.render_vm(vm),
            },
            _ => BTreeMap::new(),
        }
    }

    /// Makes `target` matched by exactly the `wanted` configurations of `index`.
    pub fn sync_target(&self, index: &MatchIndex, target: &str, wanted: &BTreeSet<String>) {
        let current: BTreeSet<String> = index.configs_for(target).into_iter().collect();
        let target = [target.to_string()];
        for config in wanted.difference(&current) {
            index.add_target(config, &target[0]);
            self.report(config, index.kind(), &target, &[]);
        }
        for config in current.difference(wanted) {
            index.remove_target(config, &target[0]);
            self.report(config, index.kind(), &[], &target);
        }
    }

    /// Logs the outcome of a match update.
    pub fn report(&self, config: &str, index: IndexKind, attached: &[String], detached: &[String]) {
        for target in attached {
            info!("Pipeline {} attached to {} {}", config, index.as_str(), target);
            let fields = self.target_fields(index, target);
            if !fields.is_empty() {
                debug!("Extra fields for {} {}: {:?}", index.as_str(), target, fields);
            }
        }
        for target in detached {
            info!("Pipeline {} detached from {} {}", config, index.as_str(), target);
        }
    }
}

/// Snapshot of an owned configuration.
#[derive(Debug, Clone)]
pub struct OwnedConfig {
    pub key: String,
    pub namespace: Option<String>,
    pub selector: Selector,
    pub pipeline: Option<Pipeline>,
}

impl OwnedConfig {
    /// Whether the pipeline references the Sink or Interceptor `name`.
    pub fn references(&self, kind: &str, name: &str) -> bool {
        let Some(pipeline) = self.pipeline.as_ref() else {
            return false;
        };
        let referenced = match kind {
            "sink" => pipeline.sink_ref.as_deref(),
            "interceptor" => pipeline.interceptor_ref.as_deref(),
            _ => None,
        };
        referenced == Some(name)
    }
}

fn collect_owned<K: SelectorConfig + Clone>(store: &Store<K>, ownership: &Ownership, into: &mut Vec<OwnedConfig>) {
    for config in store.state() {
        let Some(selector) = config.selector() else {
            continue;
        };
        if !ownership.belongs(&selector.cluster, config.meta().annotations.as_ref()) {
            continue;
        }
        let Some(key) = meta_namespace_key(config.meta()) else {
            continue;
        };
        into.push(OwnedConfig {
            key,
            namespace: config.meta().namespace.clone(),
            selector: selector.clone(),
            pipeline: config.pipeline().cloned(),
        });
    }
}
