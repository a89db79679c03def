//! LogConfig and ClusterLogConfig reconciliation.

use super::ReconcileContext;
use crate::dispatch::Reconcile;
use crate::element::{Element, Operation};
use crate::error::ReconcileError;
use crate::filter::SelectorConfig;
use crate::informer::Watched;
use crate::reconcile_helpers::{is_pod_ready, labels_match, meta_namespace_key};
use crate::topology::{Topology, get_by_key};
use crds::{ClusterLogConfig, LogConfig, Selector, SelectorType};
use kube_runtime::reflector::Store;
use std::collections::BTreeSet;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, info};

/// Configuration kinds and where their cache lives.
pub trait ConfigSource: SelectorConfig + Watched {
    fn store(ctx: &ReconcileContext) -> Option<&Store<Self>>;
}

impl ConfigSource for LogConfig {
    fn store(ctx: &ReconcileContext) -> Option<&Store<Self>> {
        match &ctx.topology {
            Topology::Cluster(cluster) => Some(&cluster.log_configs),
            Topology::Fleet(_) => None,
        }
    }
}

impl ConfigSource for ClusterLogConfig {
    fn store(ctx: &ReconcileContext) -> Option<&Store<Self>> {
        Some(&ctx.shared.cluster_log_configs)
    }
}

/// Resolves a configuration's selector into the match indices.
pub struct ConfigReconciler<K> {
    ctx: Arc<ReconcileContext>,
    _kind: PhantomData<fn() -> K>,
}

impl<K: ConfigSource> ConfigReconciler<K> {
    pub fn new(ctx: Arc<ReconcileContext>) -> Self {
        Self {
            ctx,
            _kind: PhantomData,
        }
    }

    fn delete_all(&self, key: &str, selector_type: SelectorType) {
        let Some(index) = self.ctx.index_for(selector_type) else {
            debug!("No {} index in {} mode", selector_type, self.ctx.topology.mode());
            return;
        };
        info!("Deleting all {} matches of {} {}", selector_type, K::KIND, key);
        let detached: Vec<String> = index.remove_config(key).into_iter().collect();
        self.ctx.report(key, index.kind(), &[], &detached);
    }

    fn detach_everywhere(&self, key: &str) {
        for index in self.ctx.indices() {
            let detached: Vec<String> = index.remove_config(key).into_iter().collect();
            self.ctx.report(key, index.kind(), &[], &detached);
        }
    }

    fn sync(&self, key: &str) -> Result<(), ReconcileError> {
        let Some(store) = K::store(&self.ctx) else {
            debug!("{} is not watched in {} mode", K::KIND, self.ctx.topology.mode());
            return Ok(());
        };

        let Some(config) = get_by_key(store, key) else {
            info!("{} {} deleted", K::KIND, key);
            self.detach_everywhere(key);
            return Ok(());
        };

        let owned = config
            .selector()
            .filter(|s| self.ctx.ownership.belongs(&s.cluster, config.meta().annotations.as_ref()));
        let Some(selector) = owned else {
            debug!("{} {} no longer belongs to cluster {}", K::KIND, key, self.ctx.ownership.cluster());
            self.detach_everywhere(key);
            return Ok(());
        };

        self.ctx.check_references(key, config.pipeline())?;

        let Some(index) = self.ctx.index_for(selector.selector_type) else {
            debug!(
                "Selector type {} of {} {} is not handled in {} mode",
                selector.selector_type,
                K::KIND,
                key,
                self.ctx.topology.mode()
            );
            return Ok(());
        };

        // Matches left behind by a previous selector type
        for other in self.ctx.indices() {
            if other.kind() != index.kind() {
                let detached: Vec<String> = other.remove_config(key).into_iter().collect();
                self.ctx.report(key, other.kind(), &[], &detached);
            }
        }

        let targets = self.resolve(config.meta().namespace.as_deref(), selector);
        let (attached, detached) = index.set_matches(key, targets);
        self.ctx.report(key, index.kind(), &attached, &detached);
        Ok(())
    }

    /// Targets matched by `selector` on this node.
    fn resolve(&self, namespace: Option<&str>, selector: &Selector) -> BTreeSet<String> {
        match (selector.selector_type, &self.ctx.topology) {
            // Workload selectors are resolved through the labels of their pods
            (SelectorType::Pod | SelectorType::Workload, Topology::Cluster(cluster)) => cluster
                .pods
                .state()
                .iter()
                .filter(|pod| is_pod_ready(pod))
                .filter(|pod| namespace.is_none_or(|ns| pod.metadata.namespace.as_deref() == Some(ns)))
                .filter(|pod| labels_match(&selector.label_selector, pod.metadata.labels.as_ref()))
                .filter_map(|pod| meta_namespace_key(&pod.metadata))
                .collect(),
            (SelectorType::Node, _) => {
                let mut targets = BTreeSet::new();
                if labels_match(&selector.node_selector, self.ctx.self_labels().as_ref()) {
                    targets.insert(self.ctx.identity.name().to_string());
                }
                targets
            }
            (SelectorType::Cluster, Topology::Cluster(_)) => BTreeSet::from([self.ctx.identity.name().to_string()]),
            _ => BTreeSet::new(),
        }
    }
}

#[async_trait::async_trait]
impl<K: ConfigSource> Reconcile for ConfigReconciler<K> {
    async fn reconcile(&self, element: &Element) -> Result<(), ReconcileError> {
        match element.operation {
            Operation::DeleteAll => {
                self.delete_all(&element.key, element.selector_type);
                Ok(())
            }
            Operation::Sync => self.sync(&element.key),
        }
    }
}
