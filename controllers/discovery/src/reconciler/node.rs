//! Node and Vm reconciliation.
//!
//! Only this agent's own Node or Vm matters: a label change can make
//! node-type configurations start or stop selecting it.

use super::ReconcileContext;
use crate::dispatch::Reconcile;
use crate::element::Element;
use crate::error::ReconcileError;
use crate::reconcile_helpers::labels_match;
use crds::SelectorType;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

pub struct SelfReconciler {
    ctx: Arc<ReconcileContext>,
}

impl SelfReconciler {
    pub fn new(ctx: Arc<ReconcileContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait::async_trait]
impl Reconcile for SelfReconciler {
    async fn reconcile(&self, element: &Element) -> Result<(), ReconcileError> {
        let name = self.ctx.identity.name();
        if element.key != name {
            debug!("Ignoring {} {}, this agent runs on {}", element.kind, element.key, name);
            return Ok(());
        }

        let labels = self.ctx.self_labels();
        let wanted: BTreeSet<String> = self
            .ctx
            .owned_configs()
            .into_iter()
            .filter(|config| config.selector.selector_type == SelectorType::Node)
            .filter(|config| labels_match(&config.selector.node_selector, labels.as_ref()))
            .map(|config| config.key)
            .collect();

        self.ctx.sync_target(self.ctx.topology.node_index(), name, &wanted);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::ElementKind;
    use crate::reconciler::fixtures::*;
    use crate::test_utils::*;

    #[tokio::test]
    async fn test_node_label_change_updates_matches() {
        let mut harness = Harness::cluster(&[("zone", "a")]);
        apply(
            &mut harness.cluster_log_configs,
            create_test_cluster_log_config("zone-a", "1", 1, Some(node_selector(TEST_CLUSTER, &[("zone", "a")]))),
        );
        apply(
            &mut harness.log_configs,
            create_test_log_config("default", "zone-b", "1", 1, Some(node_selector(TEST_CLUSTER, &[("zone", "b")]))),
        );
        let reconciler = SelfReconciler::new(harness.context.clone());
        let element = Element::new(ElementKind::Node, TEST_NODE, SelectorType::Node);

        apply(&mut harness.nodes, create_test_node(TEST_NODE, "1", &[("zone", "a")]));
        reconciler.reconcile(&element).await.expect("reconcile should succeed");
        let index = harness.context.topology.node_index();
        assert_eq!(index.configs_for(TEST_NODE), vec!["zone-a"]);

        // Relabeled: the watched copy wins over the startup snapshot
        apply(&mut harness.nodes, create_test_node(TEST_NODE, "2", &[("zone", "b")]));
        reconciler.reconcile(&element).await.expect("reconcile should succeed");
        let index = harness.context.topology.node_index();
        assert_eq!(index.configs_for(TEST_NODE), vec!["default/zone-b"]);
    }

    #[tokio::test]
    async fn test_other_nodes_are_ignored() {
        let mut harness = Harness::cluster(&[]);
        apply(
            &mut harness.cluster_log_configs,
            create_test_cluster_log_config("all", "1", 1, Some(node_selector(TEST_CLUSTER, &[]))),
        );

        let reconciler = SelfReconciler::new(harness.context.clone());
        reconciler
            .reconcile(&Element::new(ElementKind::Node, "node-2", SelectorType::Node))
            .await
            .expect("reconcile should succeed");

        assert!(harness.context.topology.node_index().is_empty());
    }

    #[tokio::test]
    async fn test_vm_labels_select_node_configs() {
        let mut harness = Harness::fleet(&[("rack", "r1")]);
        apply(
            &mut harness.cluster_log_configs,
            create_test_cluster_log_config("rack-1", "1", 1, Some(node_selector(TEST_CLUSTER, &[("rack", "r1")]))),
        );

        let reconciler = SelfReconciler::new(harness.context.clone());
        reconciler
            .reconcile(&Element::new(ElementKind::Vm, TEST_NODE, SelectorType::All))
            .await
            .expect("reconcile should succeed");

        assert_eq!(harness.context.topology.node_index().configs_for(TEST_NODE), vec!["rack-1"]);
    }
}
