use crate::clock::{Clock, MonotonicClock};
use crate::error::StoreError;
use async_trait::async_trait;
use std::time::Duration;

/// Remaining lifetime of a counter, as reported by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    /// The counter expires after this long.
    Expires(Duration),
    /// The counter exists but has no expiry armed.
    Persistent,
    /// No counter under this key.
    Missing,
}

/// Abstract storage interface for fixed-window counters.
///
/// Atomicity lives in the store: `incr` must create-or-increment in one step, the way a
/// networked cache's `INCR` does. Calls may block or fail independently; callers treat
/// any error as the backend being unavailable.
#[async_trait]
pub trait CounterStore: Send + Sync + std::fmt::Debug {
    /// Atomically increment `key`, creating it at 1 if absent. Returns the new count.
    async fn incr(&self, key: &str) -> Result<u64, StoreError>;

    /// Remaining lifetime of `key`.
    async fn ttl(&self, key: &str) -> Result<Ttl, StoreError>;

    /// (Re)arm expiry of `key` to `ttl` from now. A missing key is left missing.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Remove `key`; missing keys are not an error.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, Copy)]
struct Counter {
    count: u64,
    expires_at_millis: Option<u64>,
}

/// In-process counter store with store-like expiry semantics.
///
/// Clones share state, so several limiters built on clones of one store coordinate
/// exactly as separate servers sharing a networked cache would.
#[derive(Clone, Debug)]
pub struct InMemoryCounterStore {
    // Map key -> (count, expiry deadline)
    data: Arc<Mutex<HashMap<String, Counter>>>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryCounterStore {
    fn default() -> Self {
        Self::with_clock(MonotonicClock::default())
    }
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the clock driving expiry (useful for deterministic tests).
    pub fn with_clock<C: Clock + 'static>(clock: C) -> Self {
        Self { data: Arc::new(Mutex::new(HashMap::new())), clock: Arc::new(clock) }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Counter>> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Live counter for `key`, dropping it first if its deadline has passed.
    fn live<'a>(
        map: &'a mut HashMap<String, Counter>,
        key: &str,
        now: u64,
    ) -> Option<&'a mut Counter> {
        let expired = matches!(map.get(key), Some(Counter { expires_at_millis: Some(at), .. }) if *at <= now);
        if expired {
            map.remove(key);
        }
        map.get_mut(key)
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn incr(&self, key: &str) -> Result<u64, StoreError> {
        let now = self.clock.now_millis();
        let mut guard = self.lock();
        if let Some(counter) = Self::live(&mut guard, key, now) {
            counter.count = counter.count.saturating_add(1);
            return Ok(counter.count);
        }
        guard.insert(key.to_string(), Counter { count: 1, expires_at_millis: None });
        Ok(1)
    }

    async fn ttl(&self, key: &str) -> Result<Ttl, StoreError> {
        let now = self.clock.now_millis();
        let mut guard = self.lock();
        Ok(match Self::live(&mut guard, key, now) {
            Some(Counter { expires_at_millis: Some(at), .. }) => {
                Ttl::Expires(Duration::from_millis(*at - now))
            }
            Some(_) => Ttl::Persistent,
            None => Ttl::Missing,
        })
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        let now = self.clock.now_millis();
        let ttl_millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        let mut guard = self.lock();
        if let Some(counter) = Self::live(&mut guard, key, now) {
            counter.expires_at_millis = Some(now.saturating_add(ttl_millis));
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.lock().remove(key);
        Ok(())
    }
}
