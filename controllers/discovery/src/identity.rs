//! Self-identity lookup.
//!
//! The agent fetches its own Node (cluster mode) or Vm (fleet mode) once at
//! startup. A failed lookup is fatal.

use crate::error::ControllerError;
use crate::topology::SelfIdentity;
use crds::Vm;
use k8s_openapi::api::core::v1::Node;
use kube::{Api, Client};
use std::sync::Arc;
use tracing::info;

/// One-shot lookup of this agent's Node or Vm.
#[async_trait::async_trait]
pub trait IdentityFetcher: Send + Sync {
    async fn fetch_node(&self, name: &str) -> Result<Node, ControllerError>;

    async fn fetch_vm(&self, name: &str) -> Result<Vm, ControllerError>;
}

/// Looks the identity up through the Kubernetes API.
#[derive(Clone)]
pub struct KubeIdentity {
    client: Client,
}

impl KubeIdentity {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl IdentityFetcher for KubeIdentity {
    async fn fetch_node(&self, name: &str) -> Result<Node, ControllerError> {
        let api: Api<Node> = Api::all(self.client.clone());
        api.get(name).await.map_err(|source| ControllerError::Identity {
            kind: "node",
            name: name.to_string(),
            source,
        })
    }

    async fn fetch_vm(&self, name: &str) -> Result<Vm, ControllerError> {
        let api: Api<Vm> = Api::all(self.client.clone());
        api.get(name).await.map_err(|source| ControllerError::Identity {
            kind: "vm",
            name: name.to_string(),
            source,
        })
    }
}

/// Fetches the Vm in fleet mode, the Node otherwise.
pub async fn resolve_identity(
    fetcher: &dyn IdentityFetcher,
    node_name: &str,
    vm_mode: bool,
) -> Result<SelfIdentity, ControllerError> {
    let identity = if vm_mode {
        SelfIdentity::Vm(Arc::new(fetcher.fetch_vm(node_name).await?))
    } else {
        SelfIdentity::Node(Arc::new(fetcher.fetch_node(node_name).await?))
    };
    info!("Running on {} {}", identity.kind(), identity.name());
    Ok(identity)
}
