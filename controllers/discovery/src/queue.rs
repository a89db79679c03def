//! Deduplicating, rate-limited work queue.
//!
//! The queue is a set keyed by item value:
//! - an item added while already queued is dropped
//! - an item added while being processed is parked as dirty and queued
//!   again when `done` is called, so exactly one follow-up pass runs
//! - a given value is never handed to two consumers at the same time
//!
//! Failed items come back through `add_rate_limited`, which asks the retry
//! policy for a delay before re-adding.

use crate::backoff::RetryPolicy;
use crate::metrics::Metrics;
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::debug;

/// Shared handle to a work queue.
pub struct WorkQueue<T> {
    inner: Arc<Inner<T>>,
}

struct Inner<T> {
    name: String,
    state: Mutex<State<T>>,
    notify: Notify,
    retry_policy: Box<dyn RetryPolicy<T>>,
    metrics: Metrics,
}

struct State<T> {
    queue: VecDeque<T>,
    dirty: HashSet<T>,
    processing: HashSet<T>,
    shutting_down: bool,
}

impl<T> Clone for WorkQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for WorkQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkQueue").field("name", &self.inner.name).finish_non_exhaustive()
    }
}

impl<T> WorkQueue<T>
where
    T: Eq + Hash + Clone + Send + Sync + 'static,
{
    /// Creates an empty queue.
    pub fn new(name: impl Into<String>, retry_policy: impl RetryPolicy<T> + 'static, metrics: Metrics) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                state: Mutex::new(State {
                    queue: VecDeque::new(),
                    dirty: HashSet::new(),
                    processing: HashSet::new(),
                    shutting_down: false,
                }),
                notify: Notify::new(),
                retry_policy: Box::new(retry_policy),
                metrics,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Marks `item` as needing processing. Never blocks.
    pub fn add(&self, item: T) {
        let mut state = self.lock();
        if state.shutting_down || state.dirty.contains(&item) {
            return;
        }

        self.inner.metrics.inc_adds();
        state.dirty.insert(item.clone());
        if state.processing.contains(&item) {
            // Queued again by `done`
            return;
        }

        state.queue.push_back(item);
        self.inner.metrics.set_depth(state.queue.len());
        drop(state);
        self.inner.notify.notify_one();
    }

    /// Adds `item` once `delay` has elapsed. Must be called within a Tokio runtime.
    pub fn add_after(&self, item: T, delay: Duration) {
        if delay.is_zero() {
            self.add(item);
            return;
        }
        if self.is_shutting_down() {
            return;
        }

        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(item);
        });
    }

    /// Re-adds `item` after the delay chosen by the retry policy.
    pub fn add_rate_limited(&self, item: T) {
        let delay = self.inner.retry_policy.next_backoff(&item);
        self.inner.metrics.inc_retries();
        debug!("Queue {} requeues item in {:?}", self.inner.name, delay);
        self.add_after(item, delay);
    }

    /// Clears the retry history of `item`.
    pub fn forget(&self, item: &T) {
        self.inner.retry_policy.forget(item);
    }

    /// Number of rate-limited requeues of `item` since it was last forgotten.
    pub fn num_requeues(&self, item: &T) -> u32 {
        self.inner.retry_policy.retries(item)
    }

    /// Waits for the next item.
    ///
    /// Returns `None` once the queue is shutting down. The returned item is
    /// in processing until `done` is called for it.
    pub async fn get(&self) -> Option<T> {
        loop {
            let notified = self.inner.notify.notified();
            {
                let mut state = self.lock();
                if state.shutting_down {
                    return None;
                }
                if let Some(item) = state.queue.pop_front() {
                    state.dirty.remove(&item);
                    state.processing.insert(item.clone());
                    self.inner.metrics.set_depth(state.queue.len());
                    return Some(item);
                }
            }
            notified.await;
        }
    }

    /// Marks `item` as processed. If it was added again meanwhile, it is
    /// queued for one more pass.
    pub fn done(&self, item: &T) {
        let mut state = self.lock();
        state.processing.remove(item);
        if state.dirty.contains(item) {
            state.queue.push_back(item.clone());
            self.inner.metrics.set_depth(state.queue.len());
            drop(state);
            self.inner.notify.notify_one();
        }
    }

    /// Number of items waiting to be handed out.
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stops accepting items and releases every pending `get`.
    pub fn shut_down(&self) {
        self.lock().shutting_down = true;
        self.inner.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.lock().shutting_down
    }
}
