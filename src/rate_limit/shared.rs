//! Shared-counter admission for multi-instance deployments.
//!
//! Each client key maps to a fixed-window counter `ratelimit:<key>` in a
//! [`CounterStore`]. Per request:
//! 1. Atomically increment the counter (the store creates it at 1).
//! 2. Over `max`: deny, waiting out the counter's remaining TTL.
//! 3. Within `max`: re-arm the expiry to one full window and allow.
//!
//! Expiry is re-armed only for allowed requests, so a blocked client's own retries never
//! push its window further out.
//!
//! Invariants:
//! - Any store failure or timeout denies the request (fail closed) with a zero wait and the
//!   error attached to the decision.
//! - The limiter holds no locks; atomicity belongs to the store.

use crate::error::StoreError;
use crate::key::ClientKey;
use crate::rate_limit::store::{CounterStore, Ttl};
use crate::rate_limit::{millis, Decision, RateLimiter};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Prefix applied to every client key in the shared store.
pub const KEY_PREFIX: &str = "ratelimit:";

/// Default per-operation store timeout.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_millis(250);

/// Fixed-window limiter backed by a shared [`CounterStore`].
#[derive(Debug, Clone)]
pub struct SharedRateLimiter {
    store: Arc<dyn CounterStore>,
    max: u64,
    window: Duration,
    timeout: Duration,
}

impl SharedRateLimiter {
    /// Allow `max` requests per `window` per key, with the default store timeout.
    pub fn new<S: CounterStore + 'static>(store: S, max: u64, window: Duration) -> Self {
        Self::from_arc(Arc::new(store), max, window)
    }

    /// Build on an already shared store handle.
    pub fn from_arc(store: Arc<dyn CounterStore>, max: u64, window: Duration) -> Self {
        Self { store, max, window, timeout: DEFAULT_STORE_TIMEOUT }
    }

    /// Override the per-operation store timeout. A timed-out call is a store failure.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn max(&self) -> u64 {
        self.max
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Store key for a client.
    pub fn store_key(key: &ClientKey) -> String {
        format!("{KEY_PREFIX}{key}")
    }

    async fn call<T, F>(&self, op: &'static str, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>> + Send,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout { op, timeout: self.timeout }),
        }
    }

    /// Run the fixed-window algorithm, surfacing store failures as `Err`.
    pub async fn try_check(&self, key: &ClientKey) -> Result<Decision, StoreError> {
        let store_key = Self::store_key(key);
        let count = self.call("incr", self.store.incr(&store_key)).await?;

        if count > self.max {
            let wait = match self.call("ttl", self.store.ttl(&store_key)).await? {
                Ttl::Expires(remaining) => remaining,
                // No expiry armed (an earlier expire was lost): arm it now or the key
                // would stay blocked forever.
                Ttl::Persistent => {
                    self.call("expire", self.store.expire(&store_key, self.window)).await?;
                    self.window
                }
                // Window ended between the increment and the TTL read.
                Ttl::Missing => Duration::ZERO,
            };
            info!(target: "tollgate::shared", key = %key, count, wait_ms = millis(wait), "request denied");
            return Ok(Decision::exhausted(wait));
        }

        self.call("expire", self.store.expire(&store_key, self.window)).await?;
        let remaining = self.max - count;
        debug!(target: "tollgate::shared", key = %key, remaining, "request allowed");
        Ok(Decision::Allowed { remaining })
    }

    /// Admission decision; store failures deny with zero wait.
    pub async fn check(&self, key: &ClientKey) -> Decision {
        match self.try_check(key).await {
            Ok(decision) => decision,
            Err(err) => {
                warn!(target: "tollgate::shared", key = %key, op = err.op(), error = %err, "counter store unavailable; denying");
                Decision::backend_unavailable(err)
            }
        }
    }
}

#[async_trait]
impl RateLimiter for SharedRateLimiter {
    async fn evaluate(&self, key: &ClientKey) -> Decision {
        self.check(key).await
    }

    async fn reset(&self, key: &ClientKey) -> Result<(), StoreError> {
        let store_key = Self::store_key(key);
        self.call("delete", self.store.delete(&store_key)).await.map_err(|err| {
            warn!(target: "tollgate::shared", key = %key, error = %err, "failed to reset rate limit");
            err
        })?;
        info!(target: "tollgate::shared", key = %key, "rate limit reset");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::rate_limit::store::InMemoryCounterStore;
    use crate::rate_limit::DenyReason;
    use std::sync::atomic::{AtomicBool, Ordering};

    const MINUTE: Duration = Duration::from_secs(60);

    fn key(s: &str) -> ClientKey {
        ClientKey::new(s).unwrap()
    }

    /// Store whose individual operations can be switched to fail.
    #[derive(Debug, Default)]
    struct FlakyStore {
        inner: InMemoryCounterStore,
        fail_incr: AtomicBool,
        fail_ttl: AtomicBool,
        fail_expire: AtomicBool,
        hang: AtomicBool,
    }

    impl FlakyStore {
        async fn gate(&self, op: &'static str, fail: &AtomicBool) -> Result<(), StoreError> {
            if self.hang.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            if fail.load(Ordering::SeqCst) {
                return Err(StoreError::unavailable(op, "connection refused"));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl CounterStore for FlakyStore {
        async fn incr(&self, key: &str) -> Result<u64, StoreError> {
            self.gate("incr", &self.fail_incr).await?;
            self.inner.incr(key).await
        }
        async fn ttl(&self, key: &str) -> Result<Ttl, StoreError> {
            self.gate("ttl", &self.fail_ttl).await?;
            self.inner.ttl(key).await
        }
        async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
            self.gate("expire", &self.fail_expire).await?;
            self.inner.expire(key, ttl).await
        }
        async fn delete(&self, key: &str) -> Result<(), StoreError> {
            self.inner.delete(key).await
        }
    }

    #[tokio::test]
    async fn counts_within_window_then_denies_with_ttl() {
        let clock = ManualClock::new();
        let store = InMemoryCounterStore::with_clock(clock.clone());
        let limiter = SharedRateLimiter::new(store, 3, MINUTE);
        let ip = key("10.0.0.1");

        assert_eq!(limiter.check(&ip).await, Decision::Allowed { remaining: 2 });
        assert_eq!(limiter.check(&ip).await, Decision::Allowed { remaining: 1 });
        assert_eq!(limiter.check(&ip).await, Decision::Allowed { remaining: 0 });

        clock.advance(Duration::from_secs(15));
        let denied = limiter.check(&ip).await;
        assert_eq!(denied, Decision::exhausted(Duration::from_secs(45)));
    }

    #[tokio::test]
    async fn denied_retries_do_not_extend_the_window() {
        let clock = ManualClock::new();
        let store = InMemoryCounterStore::with_clock(clock.clone());
        let limiter = SharedRateLimiter::new(store, 1, MINUTE);
        let ip = key("10.0.0.2");

        assert!(limiter.check(&ip).await.is_allowed());
        for _ in 0..5 {
            clock.advance(Duration::from_secs(10));
            assert!(!limiter.check(&ip).await.is_allowed());
        }
        // Window armed by the single allowed request ends at t=60s regardless of retries.
        clock.advance(Duration::from_secs(10));
        assert!(limiter.check(&ip).await.is_allowed());
    }

    #[tokio::test]
    async fn fails_closed_when_increment_fails() {
        let store = Arc::new(FlakyStore::default());
        store.fail_incr.store(true, Ordering::SeqCst);
        let limiter = SharedRateLimiter::from_arc(store, 5, MINUTE);

        for _ in 0..10 {
            let decision = limiter.check(&key("a")).await;
            assert!(!decision.is_allowed());
            assert_eq!(decision.wait(), Duration::ZERO);
            assert_eq!(decision.backend_error().map(StoreError::op), Some("incr"));
        }
    }

    #[tokio::test]
    async fn ttl_failure_denies_with_zero_wait() {
        let store = Arc::new(FlakyStore::default());
        let limiter = SharedRateLimiter::from_arc(store.clone(), 1, MINUTE);
        assert!(limiter.check(&key("a")).await.is_allowed());

        store.fail_ttl.store(true, Ordering::SeqCst);
        let decision = limiter.check(&key("a")).await;
        assert!(matches!(
            decision,
            Decision::Denied { wait, reason: DenyReason::BackendUnavailable(_) } if wait.is_zero()
        ));
    }

    #[tokio::test]
    async fn expire_failure_fails_closed() {
        let store = Arc::new(FlakyStore::default());
        store.fail_expire.store(true, Ordering::SeqCst);
        let limiter = SharedRateLimiter::from_arc(store, 5, MINUTE);
        let decision = limiter.check(&key("a")).await;
        assert_eq!(decision.backend_error().map(StoreError::op), Some("expire"));
    }

    #[tokio::test]
    async fn counter_without_expiry_gets_one_armed() {
        let store = Arc::new(FlakyStore::default());
        let limiter = SharedRateLimiter::from_arc(store.clone(), 1, MINUTE);
        // First request's expire is lost, leaving a persistent counter.
        store.fail_expire.store(true, Ordering::SeqCst);
        assert!(!limiter.check(&key("a")).await.is_allowed());
        store.fail_expire.store(false, Ordering::SeqCst);

        let denied = limiter.check(&key("a")).await;
        assert_eq!(denied, Decision::exhausted(MINUTE));
        assert!(matches!(
            store.ttl("ratelimit:a").await.unwrap(),
            Ttl::Expires(_)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn store_timeout_fails_closed() {
        let store = Arc::new(FlakyStore::default());
        store.hang.store(true, Ordering::SeqCst);
        let limiter = SharedRateLimiter::from_arc(store, 5, MINUTE)
            .with_timeout(Duration::from_millis(50));

        let decision = limiter.check(&key("a")).await;
        assert!(!decision.is_allowed());
        assert!(decision.backend_error().is_some_and(StoreError::is_timeout));
    }

    #[tokio::test]
    async fn reset_deletes_the_counter() {
        let store = InMemoryCounterStore::new();
        let limiter = SharedRateLimiter::new(store.clone(), 1, MINUTE);
        let ip = key("10.0.0.3");
        assert!(limiter.evaluate(&ip).await.is_allowed());
        assert!(!limiter.evaluate(&ip).await.is_allowed());

        limiter.reset(&ip).await.unwrap();
        assert_eq!(store.ttl("ratelimit:10.0.0.3").await.unwrap(), Ttl::Missing);
        assert!(limiter.evaluate(&ip).await.is_allowed());
    }
}
