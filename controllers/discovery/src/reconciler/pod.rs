//! Pod reconciliation: recomputes which configurations select a pod.

use super::ReconcileContext;
use crate::dispatch::Reconcile;
use crate::element::Element;
use crate::error::ReconcileError;
use crate::reconcile_helpers::{is_pod_ready, labels_match};
use crate::topology::{Topology, get_by_key};
use crds::SelectorType;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

pub struct PodReconciler {
    ctx: Arc<ReconcileContext>,
}

impl PodReconciler {
    pub fn new(ctx: Arc<ReconcileContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait::async_trait]
impl Reconcile for PodReconciler {
    async fn reconcile(&self, element: &Element) -> Result<(), ReconcileError> {
        let Topology::Cluster(cluster) = &self.ctx.topology else {
            debug!("Pods are not watched in fleet mode");
            return Ok(());
        };
        let key = element.key.as_str();

        // Deleted, or no longer running: drop every match
        let pod = get_by_key(&cluster.pods, key).filter(|pod| is_pod_ready(pod));
        let Some(pod) = pod else {
            self.ctx.sync_target(&cluster.pod_index, key, &BTreeSet::new());
            return Ok(());
        };

        let namespace = pod.metadata.namespace.as_deref();
        let wanted: BTreeSet<String> = self
            .ctx
            .owned_configs()
            .into_iter()
            .filter(|config| matches!(config.selector.selector_type, SelectorType::Pod | SelectorType::Workload))
            .filter(|config| config.namespace.is_none() || config.namespace.as_deref() == namespace)
            .filter(|config| labels_match(&config.selector.label_selector, pod.metadata.labels.as_ref()))
            .map(|config| config.key)
            .collect();

        self.ctx.sync_target(&cluster.pod_index, key, &wanted);
        Ok(())
    }
}
