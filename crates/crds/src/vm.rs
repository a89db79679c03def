//! Vm CRD
//!
//! Identity object of a virtual machine running the agent in fleet mode.
//! Its labels play the role node labels play in a Kubernetes cluster.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[kube(
    group = "loggie.io",
    version = "v1beta1",
    kind = "Vm",
    status = "VmStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct VmSpec {
    /// Free-form description of the machine
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct VmStatus {
    /// Addresses reported by the agent
    #[serde(default)]
    pub addresses: Vec<VmAddress>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct VmAddress {
    /// Address type, e.g. "InternalIP" or "Hostname"
    #[serde(rename = "type")]
    pub address_type: String,

    /// The address
    pub address: String,
}
