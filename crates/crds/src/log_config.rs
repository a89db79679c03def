//! LogConfig and ClusterLogConfig CRDs
//!
//! Namespaced and cluster-scoped pipeline configurations.

use crate::selector::{Pipeline, Selector};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
#[kube(
    group = "loggie.io",
    version = "v1beta1",
    kind = "LogConfig",
    namespaced,
    shortname = "lgc"
)]
#[serde(rename_all = "camelCase")]
pub struct LogConfigSpec {
    /// Which targets this configuration applies to.
    /// A LogConfig without a selector is inert.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<Selector>,

    /// Pipeline definition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<Pipeline>,
}

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
#[kube(
    group = "loggie.io",
    version = "v1beta1",
    kind = "ClusterLogConfig",
    shortname = "clgc"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterLogConfigSpec {
    /// Which targets this configuration applies to, across all namespaces
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<Selector>,

    /// Pipeline definition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<Pipeline>,
}
