//! Prometheus metrics for the work queue and the dispatcher.

use crate::element::ElementKind;
use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry};

/// Metric handles shared by the queue and the worker loop.
///
/// Cloning is cheap; every clone updates the same series.
#[derive(Debug, Clone)]
pub struct Metrics {
    registry: Registry,
    queue_depth: IntGauge,
    queue_adds: IntCounter,
    queue_retries: IntCounter,
    reconciles: IntCounterVec,
}

impl Metrics {
    /// Creates the metrics and registers them in a fresh registry.
    pub fn new(queue_name: &str) -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let queue_depth = IntGauge::with_opts(
            Opts::new("workqueue_depth", "Current depth of the work queue").const_label("name", queue_name),
        )?;
        let queue_adds = IntCounter::with_opts(
            Opts::new("workqueue_adds_total", "Items handed to the work queue").const_label("name", queue_name),
        )?;
        let queue_retries = IntCounter::with_opts(
            Opts::new("workqueue_retries_total", "Rate-limited requeues").const_label("name", queue_name),
        )?;
        let reconciles = IntCounterVec::new(
            Opts::new("discovery_reconcile_total", "Dispatched elements by kind and outcome"),
            &["kind", "outcome"],
        )?;

        registry.register(Box::new(queue_depth.clone()))?;
        registry.register(Box::new(queue_adds.clone()))?;
        registry.register(Box::new(queue_retries.clone()))?;
        registry.register(Box::new(reconciles.clone()))?;

        Ok(Self {
            registry,
            queue_depth,
            queue_adds,
            queue_retries,
            reconciles,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn set_depth(&self, depth: usize) {
        self.queue_depth.set(i64::try_from(depth).unwrap_or(i64::MAX));
    }

    pub fn inc_adds(&self) {
        self.queue_adds.inc();
    }

    pub fn inc_retries(&self) {
        self.queue_retries.inc();
    }

    /// Records one dispatch outcome: "success", "retry" or "dropped".
    pub fn observe_reconcile(&self, kind: ElementKind, outcome: &str) {
        self.reconciles.with_label_values(&[kind.as_str(), outcome]).inc();
    }
}
