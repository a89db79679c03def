//! Kind-to-reconciler routing.

use crate::element::{Element, ElementKind};
use crate::error::{DispatchError, ReconcileError};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Reconciler for one element kind.
///
/// Implementations must be idempotent and must not touch the work queue;
/// returning an error is the only way to ask for a retry.
#[async_trait::async_trait]
pub trait Reconcile: Send + Sync {
    async fn reconcile(&self, element: &Element) -> Result<(), ReconcileError>;
}

/// Static routing table built once at bootstrap.
#[derive(Default, Clone)]
pub struct DispatchTable {
    routes: HashMap<ElementKind, Arc<dyn Reconcile>>,
}

impl DispatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the reconciler for `kind`, replacing any previous one.
    pub fn route(mut self, kind: ElementKind, reconciler: Arc<dyn Reconcile>) -> Self {
        self.routes.insert(kind, reconciler);
        self
    }

    pub fn handles(&self, kind: ElementKind) -> bool {
        self.routes.contains_key(&kind)
    }

    /// Kinds with a registered reconciler, in `ElementKind::ALL` order.
    pub fn kinds(&self) -> Vec<ElementKind> {
        ElementKind::ALL.into_iter().filter(|k| self.handles(*k)).collect()
    }

    /// Validates `element` and runs its reconciler.
    pub async fn dispatch(&self, element: &Element) -> Result<(), DispatchError> {
        debug!("Dispatching {}", element);

        element.validate().map_err(|reason| DispatchError::Malformed {
            element: element.clone(),
            reason,
        })?;

        let reconciler = self
            .routes
            .get(&element.kind)
            .ok_or(DispatchError::Unroutable(element.kind))?;

        reconciler.reconcile(element).await.map_err(|source| {
            warn!("reconcile {} {} err: {}", element.kind, element.key, source);
            DispatchError::Reconcile {
                element: element.clone(),
                source,
            }
        })
    }
}
