//! The single consumer loop.
//!
//! Takes one element at a time off the queue, dispatches it and decides
//! between forget, retry and drop.

use crate::dispatch::DispatchTable;
use crate::element::Element;
use crate::metrics::Metrics;
use crate::queue::WorkQueue;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Marks the element done when dropped, including while unwinding from a
/// panicking reconciler.
struct InFlight<'a> {
    queue: &'a WorkQueue<Element>,
    element: Element,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.queue.done(&self.element);
    }
}

#[derive(Clone)]
pub struct Worker {
    queue: WorkQueue<Element>,
    dispatch: Arc<DispatchTable>,
    metrics: Metrics,
}

impl Worker {
    pub fn new(queue: WorkQueue<Element>, dispatch: Arc<DispatchTable>, metrics: Metrics) -> Self {
        Self {
            queue,
            dispatch,
            metrics,
        }
    }

    /// Processes one element. Returns false once the queue shuts down.
    pub async fn process_next(&self) -> bool {
        let Some(element) = self.queue.get().await else {
            return false;
        };
        let in_flight = InFlight {
            queue: &self.queue,
            element,
        };
        let element = &in_flight.element;

        match self.dispatch.dispatch(element).await {
            Ok(()) => {
                // No retry until the next change
                self.queue.forget(element);
                self.metrics.observe_reconcile(element.kind, "success");
                debug!("Successfully synced '{}'", element);
            }
            Err(e) if e.is_retryable() => {
                self.queue.add_rate_limited(element.clone());
                self.metrics.observe_reconcile(element.kind, "retry");
                debug!("{}, requeuing (retry {})", e, self.queue.num_requeues(element));
            }
            Err(e) => {
                // Retrying cannot fix a malformed or unroutable element
                self.queue.forget(element);
                self.metrics.observe_reconcile(element.kind, "dropped");
                error!("{}", e);
            }
        }

        true
    }

    /// Runs until the queue shuts down.
    pub async fn run(&self) {
        info!("Starting discovery worker on queue {}", self.queue.name());
        while self.process_next().await {}
        info!("Discovery worker stopped");
    }
}
