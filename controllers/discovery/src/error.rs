//! Controller-specific error types.
//!
//! `ControllerError` covers startup and shutdown failures, which are fatal.
//! `ReconcileError` is returned by reconcilers for a single work item and
//! leads to a rate-limited retry. `DispatchError` is the outcome the worker
//! loop classifies into retry, drop or programming error.

use crate::element::{Element, ElementKind};
use crds::SelectorType;
use kube::Error as KubeError;
use thiserror::Error;

/// Errors that can occur while constructing or running the controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Fetching this node's own Node or Vm object failed
    #[error("get {kind} {name} failed: {source}")]
    Identity {
        kind: &'static str,
        name: String,
        #[source]
        source: KubeError,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Configuration file could not be parsed
    #[error("Configuration parse error: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    /// Informer caches never reached the synced state
    #[error("failed to wait for caches to sync: {0}")]
    CacheSync(String),

    /// Metrics registry error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Probe server failed to bind or serve
    #[error("Probe server error: {0}")]
    Probe(#[source] std::io::Error),
}

/// Errors reported by a reconciler for one work item.
///
/// Every variant is treated as transient by the worker loop.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// A pipeline references a Sink or Interceptor that is not in the cache yet
    #[error("{kind} {name} referenced by {config} not found")]
    MissingReference {
        kind: &'static str,
        name: String,
        config: String,
    },

    /// Reconciliation failed
    #[error("Reconciliation failed: {0}")]
    Failed(String),
}

/// Ways an element can break the producer contract.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MalformedElement {
    #[error("empty key")]
    EmptyKey,

    #[error("delete-all is not defined for {0}")]
    DeleteAllKind(ElementKind),

    #[error("delete-all is not defined for selector type {0}")]
    DeleteAllSelector(SelectorType),
}

/// Outcome of routing one element through the dispatch table.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The element violates the producer contract and must never be retried
    #[error("malformed element {element}: {reason}")]
    Malformed {
        element: Element,
        #[source]
        reason: MalformedElement,
    },

    /// No reconciler is registered for the element kind
    #[error("element type: {0} not supported")]
    Unroutable(ElementKind),

    /// The reconciler failed; the element should be retried
    #[error("error syncing '{element}': {source}")]
    Reconcile {
        element: Element,
        #[source]
        source: ReconcileError,
    },
}

impl DispatchError {
    /// Whether the worker should requeue the element with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DispatchError::Reconcile { .. })
    }
}
