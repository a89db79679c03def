//! Sink and Interceptor CRDs
//!
//! Cluster-scoped building blocks referenced by pipelines.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[kube(group = "loggie.io", version = "v1beta1", kind = "Sink")]
#[serde(rename_all = "camelCase")]
pub struct SinkSpec {
    /// Sink definition (YAML text)
    pub sink: String,
}

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[kube(group = "loggie.io", version = "v1beta1", kind = "Interceptor", shortname = "icp")]
#[serde(rename_all = "camelCase")]
pub struct InterceptorSpec {
    /// Interceptor definitions (YAML text)
    pub interceptors: String,
}
