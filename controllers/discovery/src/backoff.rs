//! # Retry Backoff
//!
//! Retry policies used by the work queue when a reconciler fails.
//!
//! The default policy combines two limiters and waits for the longer of them:
//! - a per-item exponential backoff (5ms, 10ms, 20ms, ... capped at 1000s)
//!   that is forgotten once the item succeeds
//! - an overall token bucket (10 qps, burst 100) bounding the retry rate
//!   across all items

use crate::config::RetryConfig;
use governor::clock::{Clock, DefaultClock};
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use std::collections::HashMap;
use std::hash::Hash;
use std::num::NonZeroU32;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Decides how long a failed item waits before it is queued again.
pub trait RetryPolicy<T>: Send + Sync {
    /// Records a failure of `item` and returns the delay before the retry.
    fn next_backoff(&self, item: &T) -> Duration;

    /// Drops the failure history of `item`; the next failure starts from
    /// the base delay again.
    fn forget(&self, item: &T);

    /// Number of failures recorded for `item` since it was last forgotten.
    fn retries(&self, item: &T) -> u32;
}

/// Per-item exponential backoff
///
/// Each consecutive failure of the same item doubles its delay, starting at
/// `base` and capped at `max`.
#[derive(Debug)]
pub struct ItemExponentialBackoff<T> {
    base: Duration,
    max: Duration,
    failures: Mutex<HashMap<T, u32>>,
}

impl<T: Eq + Hash + Clone> ItemExponentialBackoff<T> {
    /// Create a new backoff with the given base and maximum delay
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Calculate the delay for a given number of previous failures (stateless)
    ///
    /// Returns `base * 2^failures`, capped at `max`. Overflow saturates to `max`.
    #[must_use]
    pub fn calculate_for_failures(failures: u32, base: Duration, max: Duration) -> Duration {
        2u32.checked_pow(failures)
            .and_then(|factor| base.checked_mul(factor))
            .map_or(max, |delay| delay.min(max))
    }
}

impl<T: Eq + Hash + Clone + Send> RetryPolicy<T> for ItemExponentialBackoff<T> {
    fn next_backoff(&self, item: &T) -> Duration {
        let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
        let count = failures.entry(item.clone()).or_insert(0);
        let delay = Self::calculate_for_failures(*count, self.base, self.max);
        *count = count.saturating_add(1);
        delay
    }

    fn forget(&self, item: &T) {
        self.failures.lock().unwrap_or_else(PoisonError::into_inner).remove(item);
    }

    fn retries(&self, item: &T) -> u32 {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(item)
            .copied()
            .unwrap_or(0)
    }
}

/// Longest wait between two refilled tokens.
const MAX_REFILL_PERIOD: Duration = Duration::from_secs(1000);

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>;

/// Overall token bucket shared by every item
///
/// Tokens refill at `qps` up to `burst`. When the bucket is empty the retry
/// waits until the next token is available.
pub struct TokenBucket {
    limiter: DirectLimiter,
    clock: DefaultClock,
}

impl std::fmt::Debug for TokenBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenBucket").finish_non_exhaustive()
    }
}

impl TokenBucket {
    /// Create a full bucket
    ///
    /// Rates too small to express are clamped to one token per
    /// `MAX_REFILL_PERIOD`.
    #[must_use]
    pub fn new(qps: f64, burst: u32) -> Self {
        let period = Duration::try_from_secs_f64(1.0 / qps)
            .unwrap_or(MAX_REFILL_PERIOD)
            .min(MAX_REFILL_PERIOD);
        let burst = NonZeroU32::new(burst.max(1)).unwrap_or(NonZeroU32::MIN);
        let quota = Quota::with_period(period)
            .unwrap_or_else(|| Quota::per_second(NonZeroU32::MAX))
            .allow_burst(burst);
        Self {
            limiter: RateLimiter::direct(quota),
            clock: DefaultClock::default(),
        }
    }

    /// Take one token if available, otherwise return how long until one is
    pub fn reserve(&self) -> Duration {
        match self.limiter.check() {
            Ok(()) => Duration::ZERO,
            Err(not_until) => not_until.wait_time_from(self.clock.now()),
        }
    }
}

/// Default controller retry policy: the longer of the per-item exponential
/// backoff and the overall token bucket.
#[derive(Debug)]
pub struct ControllerRateLimiter<T> {
    items: ItemExponentialBackoff<T>,
    bucket: TokenBucket,
}

impl<T: Eq + Hash + Clone> ControllerRateLimiter<T> {
    #[must_use]
    pub fn new(items: ItemExponentialBackoff<T>, bucket: TokenBucket) -> Self {
        Self { items, bucket }
    }

    /// Build the policy from the retry section of the configuration
    #[must_use]
    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            ItemExponentialBackoff::new(config.base_delay(), config.max_delay()),
            TokenBucket::new(config.qps, config.burst),
        )
    }
}

impl<T: Eq + Hash + Clone + Send> RetryPolicy<T> for ControllerRateLimiter<T> {
    fn next_backoff(&self, item: &T) -> Duration {
        self.items.next_backoff(item).max(self.bucket.reserve())
    }

    fn forget(&self, item: &T) {
        self.items.forget(item);
    }

    fn retries(&self, item: &T) -> u32 {
        self.items.retries(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_exponential_backoff_sequence() {
        let backoff = ItemExponentialBackoff::new(ms(5), Duration::from_secs(1000));

        // 5ms, 10ms, 20ms, 40ms, 80ms
        assert_eq!(backoff.next_backoff(&"a"), ms(5));
        assert_eq!(backoff.next_backoff(&"a"), ms(10));
        assert_eq!(backoff.next_backoff(&"a"), ms(20));
        assert_eq!(backoff.next_backoff(&"a"), ms(40));
        assert_eq!(backoff.next_backoff(&"a"), ms(80));
        assert_eq!(backoff.retries(&"a"), 5);
    }

    #[test]
    fn test_exponential_backoff_max_cap() {
        let backoff = ItemExponentialBackoff::new(ms(100), ms(500));

        assert_eq!(backoff.next_backoff(&"a"), ms(100));
        assert_eq!(backoff.next_backoff(&"a"), ms(200));
        assert_eq!(backoff.next_backoff(&"a"), ms(400));
        // Next would be 800ms, but should be capped at 500ms
        assert_eq!(backoff.next_backoff(&"a"), ms(500));
        // Should stay at max
        assert_eq!(backoff.next_backoff(&"a"), ms(500));
    }

    #[test]
    fn test_exponential_backoff_is_monotonic() {
        let backoff = ItemExponentialBackoff::new(ms(1), ms(300));
        let mut previous = Duration::ZERO;
        for _ in 0..64 {
            let next = backoff.next_backoff(&"a");
            assert!(next >= previous, "Backoff must never shrink between consecutive failures");
            previous = next;
        }
        assert_eq!(previous, ms(300));
    }

    #[test]
    fn test_exponential_backoff_forget_resets() {
        let backoff = ItemExponentialBackoff::new(ms(5), Duration::from_secs(1000));

        assert_eq!(backoff.next_backoff(&"a"), ms(5));
        assert_eq!(backoff.next_backoff(&"a"), ms(10));
        assert_eq!(backoff.next_backoff(&"a"), ms(20));

        backoff.forget(&"a");

        // Should restart from the base delay after success
        assert_eq!(backoff.retries(&"a"), 0);
        assert_eq!(backoff.next_backoff(&"a"), ms(5));
    }

    #[test]
    fn test_exponential_backoff_items_are_independent() {
        let backoff = ItemExponentialBackoff::new(ms(5), Duration::from_secs(1000));

        assert_eq!(backoff.next_backoff(&"a"), ms(5));
        assert_eq!(backoff.next_backoff(&"a"), ms(10));
        assert_eq!(backoff.next_backoff(&"b"), ms(5));
        assert_eq!(backoff.retries(&"b"), 1);
    }

    #[test]
    fn test_calculate_for_failures_saturates() {
        let max = Duration::from_secs(1000);
        assert_eq!(ItemExponentialBackoff::<u8>::calculate_for_failures(0, ms(5), max), ms(5));
        assert_eq!(ItemExponentialBackoff::<u8>::calculate_for_failures(3, ms(5), max), ms(40));
        assert_eq!(ItemExponentialBackoff::<u8>::calculate_for_failures(40, ms(5), max), max);
        assert_eq!(ItemExponentialBackoff::<u8>::calculate_for_failures(u32::MAX, ms(5), max), max);
    }

    #[test]
    fn test_token_bucket_burst_then_wait() {
        let bucket = TokenBucket::new(10.0, 2);

        assert_eq!(bucket.reserve(), Duration::ZERO);
        assert_eq!(bucket.reserve(), Duration::ZERO);

        // Bucket empty: the next token is at most 1/qps away
        let wait = bucket.reserve();
        assert!(wait > Duration::ZERO && wait <= ms(100), "unexpected wait {:?}", wait);
    }

    #[test]
    fn test_token_bucket_tiny_rate_is_clamped() {
        let bucket = TokenBucket::new(1e-20, 1);

        assert_eq!(bucket.reserve(), Duration::ZERO);
        let wait = bucket.reserve();
        assert!(wait > Duration::ZERO && wait <= MAX_REFILL_PERIOD, "unexpected wait {:?}", wait);
    }

    #[test]
    fn test_controller_rate_limiter_takes_longer_delay() {
        let limiter = ControllerRateLimiter::new(
            ItemExponentialBackoff::new(ms(5), Duration::from_secs(1000)),
            TokenBucket::new(1000.0, 100),
        );

        // Bucket has plenty of tokens, so the item backoff decides
        assert_eq!(limiter.next_backoff(&"a"), ms(5));
        assert_eq!(limiter.next_backoff(&"a"), ms(10));
        assert_eq!(limiter.retries(&"a"), 2);

        limiter.forget(&"a");
        assert_eq!(limiter.retries(&"a"), 0);
    }
}
