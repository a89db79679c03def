//! Ownership and relevance filters.
//!
//! Each watched kind has a filter that turns a change notification into the
//! work items to enqueue. Filters are synchronous and never block; they only
//! look at the snapshots they are handed.

use crate::element::{Element, ElementKind};
use crate::informer::DeletedObject;
use crate::reconcile_helpers::{Ownership, generation_changed, is_pod_ready, meta_namespace_key, version_changed};
use crds::{ClusterLogConfig, LogConfig, Pipeline, Selector, SelectorType, Vm};
use k8s_openapi::api::core::v1::Pod;
use kube::Resource;
use tracing::{debug, error};

/// Per-kind relevance predicate.
///
/// Every hook returns the elements to enqueue, in order. The default for
/// each hook is to ignore the notification.
pub trait ResourceFilter<K>: Send + Sync {
    fn on_add(&self, _obj: &K) -> Vec<Element> {
        Vec::new()
    }

    fn on_update(&self, _old: &K, _new: &K) -> Vec<Element> {
        Vec::new()
    }

    fn on_delete(&self, _obj: &DeletedObject<K>) -> Vec<Element> {
        Vec::new()
    }
}

/// Configuration objects carrying a selector and a pipeline.
pub trait SelectorConfig: Resource<DynamicType = ()> {
    const KIND: ElementKind;

    fn selector(&self) -> Option<&Selector>;

    fn pipeline(&self) -> Option<&Pipeline>;
}

impl SelectorConfig for LogConfig {
    const KIND: ElementKind = ElementKind::LogConfig;

    fn selector(&self) -> Option<&Selector> {
        self.spec.selector.as_ref()
    }

    fn pipeline(&self) -> Option<&Pipeline> {
        self.spec.pipeline.as_ref()
    }
}

impl SelectorConfig for ClusterLogConfig {
    const KIND: ElementKind = ElementKind::ClusterLogConfig;

    fn selector(&self) -> Option<&Selector> {
        self.spec.selector.as_ref()
    }

    fn pipeline(&self) -> Option<&Pipeline> {
        self.spec.pipeline.as_ref()
    }
}

fn keyed<K: Resource>(kind: ElementKind, obj: &K, selector_type: SelectorType) -> Vec<Element> {
    match meta_namespace_key(obj.meta()) {
        Some(key) => vec![Element::new(kind, key, selector_type)],
        None => {
            error!("Cannot build key for {} object without a name", kind);
            Vec::new()
        }
    }
}

/// Pods: only ready pods are worth collecting from.
#[derive(Debug, Default)]
pub struct PodFilter;

impl ResourceFilter<Pod> for PodFilter {
    fn on_add(&self, pod: &Pod) -> Vec<Element> {
        if !is_pod_ready(pod) {
            return Vec::new();
        }
        keyed(ElementKind::Pod, pod, SelectorType::Pod)
    }

    fn on_update(&self, old: &Pod, new: &Pod) -> Vec<Element> {
        if !version_changed(&old.metadata, &new.metadata) {
            return Vec::new();
        }
        if !is_pod_ready(new) {
            return Vec::new();
        }
        keyed(ElementKind::Pod, new, SelectorType::Pod)
    }

    fn on_delete(&self, pod: &DeletedObject<Pod>) -> Vec<Element> {
        match pod.key() {
            Some(key) => vec![Element::new(ElementKind::Pod, key, SelectorType::Pod)],
            None => {
                error!("Cannot build key for deleted pod");
                Vec::new()
            }
        }
    }
}

/// Nodes, sinks and interceptors: every add, and updates that carry a new
/// resource version. Deletes are ignored.
#[derive(Debug, Clone, Copy)]
pub struct VersionedFilter {
    kind: ElementKind,
    selector_type: SelectorType,
}

impl VersionedFilter {
    pub fn node() -> Self {
        Self {
            kind: ElementKind::Node,
            selector_type: SelectorType::Node,
        }
    }

    pub fn sink() -> Self {
        Self {
            kind: ElementKind::Sink,
            selector_type: SelectorType::All,
        }
    }

    pub fn interceptor() -> Self {
        Self {
            kind: ElementKind::Interceptor,
            selector_type: SelectorType::All,
        }
    }
}

impl<K: Resource> ResourceFilter<K> for VersionedFilter {
    fn on_add(&self, obj: &K) -> Vec<Element> {
        keyed(self.kind, obj, self.selector_type)
    }

    fn on_update(&self, old: &K, new: &K) -> Vec<Element> {
        if !version_changed(old.meta(), new.meta()) {
            return Vec::new();
        }
        keyed(self.kind, new, self.selector_type)
    }
}

/// Vms: updates matter only when the labels changed.
#[derive(Debug, Default)]
pub struct VmFilter;

impl ResourceFilter<Vm> for VmFilter {
    fn on_add(&self, vm: &Vm) -> Vec<Element> {
        keyed(ElementKind::Vm, vm, SelectorType::All)
    }

    fn on_update(&self, old: &Vm, new: &Vm) -> Vec<Element> {
        if !version_changed(&old.metadata, &new.metadata) {
            return Vec::new();
        }
        if old.metadata.labels == new.metadata.labels {
            debug!("Vm {:?} labels unchanged", new.metadata.name);
            return Vec::new();
        }
        keyed(ElementKind::Vm, new, SelectorType::All)
    }
}

/// LogConfig and ClusterLogConfig: owned objects with a selector.
#[derive(Debug, Clone)]
pub struct ConfigFilter {
    ownership: Ownership,
}

impl ConfigFilter {
    pub fn new(ownership: Ownership) -> Self {
        Self { ownership }
    }

    /// Selector of `config` if the object is relevant to this controller.
    fn owned_selector<'a, K: SelectorConfig>(&self, config: &'a K) -> Option<&'a Selector> {
        let selector = config.selector()?;
        self.ownership
            .belongs(&selector.cluster, config.meta().annotations.as_ref())
            .then_some(selector)
    }
}

impl<K: SelectorConfig> ResourceFilter<K> for ConfigFilter {
    fn on_add(&self, config: &K) -> Vec<Element> {
        match self.owned_selector(config) {
            Some(selector) => keyed(K::KIND, config, selector.selector_type),
            None => Vec::new(),
        }
    }

    fn on_update(&self, old: &K, new: &K) -> Vec<Element> {
        if !version_changed(old.meta(), new.meta()) {
            return Vec::new();
        }
        // Status-only updates
        if !generation_changed(old.meta(), new.meta()) {
            return Vec::new();
        }
        let Some(selector) = self.owned_selector(new) else {
            return Vec::new();
        };

        let mut elements = Vec::with_capacity(2);
        if let Some(old_key) = meta_namespace_key(old.meta()) {
            elements.extend(selector_change_invalidation(K::KIND, &old_key, old.selector(), selector));
        }
        elements.extend(keyed(K::KIND, new, selector.selector_type));
        elements
    }

    fn on_delete(&self, deleted: &DeletedObject<K>) -> Vec<Element> {
        let Some(selector) = self.owned_selector(deleted.last_known()) else {
            return Vec::new();
        };
        match deleted.key() {
            Some(key) => vec![Element::new(K::KIND, key, selector.selector_type)],
            None => {
                error!("Cannot build key for deleted {}", K::KIND);
                Vec::new()
            }
        }
    }
}

/// Synthesizes the teardown item for a selector that changed under an
/// existing configuration.
///
/// Only label selectors of Pod/Workload configurations and node selectors of
/// Node configurations are compared. Transitions between types and the
/// Cluster/All types produce nothing.
pub fn selector_change_invalidation(
    kind: ElementKind,
    old_key: &str,
    old: Option<&Selector>,
    new: &Selector,
) -> Option<Element> {
    let old = old?;
    match new.selector_type {
        SelectorType::Pod | SelectorType::Workload if old.label_selector != new.label_selector => {
            debug!("Label selector of {} {} changed", kind, old_key);
            Some(Element::delete_all(kind, old_key, SelectorType::Pod))
        }
        SelectorType::Node if old.node_selector != new.node_selector => {
            debug!("Node selector of {} {} changed", kind, old_key);
            Some(Element::delete_all(kind, old_key, SelectorType::Node))
        }
        _ => None,
    }
}
