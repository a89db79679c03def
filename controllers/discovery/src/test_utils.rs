//! Test utilities for unit testing filters, the dispatcher and reconcilers
//!
//! This module provides helpers for creating test objects and setting up test scenarios.

use crate::config::Config;
use crds::*;
use k8s_openapi::api::core::v1::{
    ContainerState, ContainerStateRunning, ContainerStateWaiting, ContainerStatus, Node, Pod, PodSpec, PodStatus,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;

/// Node name used by every fixture
pub const TEST_NODE: &str = "node-1";

/// Cluster name used by every fixture
pub const TEST_CLUSTER: &str = "prod";

/// Helper to build a label or annotation map
pub fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

/// Helper to create object metadata
pub fn create_test_meta(name: &str, namespace: Option<&str>, resource_version: &str, generation: i64) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: namespace.map(str::to_string),
        resource_version: Some(resource_version.to_string()),
        generation: Some(generation),
        ..Default::default()
    }
}

/// Helper to create a pod scheduled on `TEST_NODE`
pub fn create_test_pod(namespace: &str, name: &str, resource_version: &str, ready: bool) -> Pod {
    let state = if ready {
        ContainerState {
            running: Some(ContainerStateRunning::default()),
            ..Default::default()
        }
    } else {
        ContainerState {
            waiting: Some(ContainerStateWaiting {
                reason: Some("ContainerCreating".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    };

    Pod {
        metadata: ObjectMeta {
            labels: Some(labels(&[("app", name)])),
            ..create_test_meta(name, Some(namespace), resource_version, 1)
        },
        spec: Some(PodSpec {
            node_name: Some(TEST_NODE.to_string()),
            ..Default::default()
        }),
        status: Some(PodStatus {
            phase: Some(if ready { "Running" } else { "Pending" }.to_string()),
            pod_ip: Some("10.0.0.7".to_string()),
            container_statuses: Some(vec![ContainerStatus {
                name: "main".to_string(),
                ready,
                state: Some(state),
                ..Default::default()
            }]),
            ..Default::default()
        }),
    }
}

/// Helper to create a node
pub fn create_test_node(name: &str, resource_version: &str, node_labels: &[(&str, &str)]) -> Node {
    Node {
        metadata: ObjectMeta {
            labels: Some(labels(node_labels)),
            ..create_test_meta(name, None, resource_version, 1)
        },
        ..Default::default()
    }
}

/// Helper to create a Vm
pub fn create_test_vm(name: &str, resource_version: &str, vm_labels: &[(&str, &str)]) -> Vm {
    let mut vm = Vm::new(name, VmSpec::default());
    vm.metadata.resource_version = Some(resource_version.to_string());
    vm.metadata.labels = Some(labels(vm_labels));
    vm
}

/// Helper to create a pod-type selector
pub fn pod_selector(cluster: &str, label_pairs: &[(&str, &str)]) -> Selector {
    Selector {
        selector_type: SelectorType::Pod,
        cluster: cluster.to_string(),
        label_selector: labels(label_pairs),
        ..Default::default()
    }
}

/// Helper to create a node-type selector
pub fn node_selector(cluster: &str, label_pairs: &[(&str, &str)]) -> Selector {
    Selector {
        selector_type: SelectorType::Node,
        cluster: cluster.to_string(),
        node_selector: labels(label_pairs),
        ..Default::default()
    }
}

/// Helper to create a pipeline referencing a sink
pub fn pipeline_with_sink(sink: &str) -> Pipeline {
    Pipeline {
        sources: "- type: file\n  name: app\n".to_string(),
        sink_ref: Some(sink.to_string()),
        interceptor_ref: None,
    }
}

/// Helper to create a LogConfig
pub fn create_test_log_config(
    namespace: &str,
    name: &str,
    resource_version: &str,
    generation: i64,
    selector: Option<Selector>,
) -> LogConfig {
    let mut config = LogConfig::new(
        name,
        LogConfigSpec {
            selector,
            pipeline: None,
        },
    );
    config.metadata = create_test_meta(name, Some(namespace), resource_version, generation);
    config
}

/// Helper to create a ClusterLogConfig
pub fn create_test_cluster_log_config(
    name: &str,
    resource_version: &str,
    generation: i64,
    selector: Option<Selector>,
) -> ClusterLogConfig {
    let mut config = ClusterLogConfig::new(
        name,
        ClusterLogConfigSpec {
            selector,
            pipeline: None,
        },
    );
    config.metadata = create_test_meta(name, None, resource_version, generation);
    config
}

/// Helper to create a Sink
pub fn create_test_sink(name: &str, resource_version: &str) -> Sink {
    let mut sink = Sink::new(
        name,
        SinkSpec {
            sink: "type: dev\n".to_string(),
        },
    );
    sink.metadata.resource_version = Some(resource_version.to_string());
    sink
}

/// Helper to create an Interceptor
pub fn create_test_interceptor(name: &str, resource_version: &str) -> Interceptor {
    let mut interceptor = Interceptor::new(
        name,
        InterceptorSpec {
            interceptors: "- type: rateLimit\n".to_string(),
        },
    );
    interceptor.metadata.resource_version = Some(resource_version.to_string());
    interceptor
}

/// Helper to create a cluster-mode configuration
pub fn create_test_config(vm_mode: bool) -> Config {
    Config {
        cluster: TEST_CLUSTER.to_string(),
        node_name: TEST_NODE.to_string(),
        vm_mode,
        ..Default::default()
    }
}
