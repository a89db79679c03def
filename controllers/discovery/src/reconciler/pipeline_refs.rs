//! Sink and Interceptor reconciliation.
//!
//! A changed Sink or Interceptor affects every attached pipeline that
//! references it. Deletions are not handled.

use super::ReconcileContext;
use crate::dispatch::Reconcile;
use crate::element::{Element, ElementKind};
use crate::error::ReconcileError;
use crate::topology::get_by_key;
use std::sync::Arc;
use tracing::{debug, info};

pub struct ReferenceReconciler {
    ctx: Arc<ReconcileContext>,
}

impl ReferenceReconciler {
    pub fn new(ctx: Arc<ReconcileContext>) -> Self {
        Self { ctx }
    }

    /// Owned configurations referencing `name` that are attached somewhere.
    pub fn attached_users(&self, kind: &str, name: &str) -> Vec<String> {
        self.ctx
            .owned_configs()
            .into_iter()
            .filter(|config| config.references(kind, name))
            .filter(|config| self.ctx.indices().iter().any(|index| !index.matches(&config.key).is_empty()))
            .map(|config| config.key)
            .collect()
    }
}

#[async_trait::async_trait]
impl Reconcile for ReferenceReconciler {
    async fn reconcile(&self, element: &Element) -> Result<(), ReconcileError> {
        let (kind, cached) = match element.kind {
            ElementKind::Sink => ("sink", get_by_key(&self.ctx.shared.sinks, &element.key).is_some()),
            ElementKind::Interceptor => (
                "interceptor",
                get_by_key(&self.ctx.shared.interceptors, &element.key).is_some(),
            ),
            other => {
                return Err(ReconcileError::Failed(format!("{} is not a pipeline reference", other)));
            }
        };
        if !cached {
            debug!("{} {} is not in the cache", kind, element.key);
            return Ok(());
        }

        for config in self.attached_users(kind, &element.key) {
            info!("Pipeline {} uses {} {}, refreshing", config, kind, element.key);
        }
        Ok(())
    }
}
