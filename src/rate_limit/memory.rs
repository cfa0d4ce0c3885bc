//! Process-local admission: one token bucket per client key.

use crate::clock::{Clock, MonotonicClock};
use crate::error::StoreError;
use crate::key::ClientKey;
use crate::rate_limit::bucket::BucketPolicy;
use crate::rate_limit::registry::BucketRegistry;
use crate::rate_limit::{millis, Decision, RateLimiter};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

/// Token-bucket limiter for single-instance deployments.
///
/// O(1) expected per check, no I/O. State is lost on restart and is not shared with
/// other processes.
#[derive(Debug)]
pub struct InMemoryRateLimiter {
    registry: BucketRegistry,
}

impl InMemoryRateLimiter {
    /// Limiter on the monotonic process clock.
    pub fn new(policy: BucketPolicy) -> Self {
        Self::with_clock(policy, MonotonicClock::default())
    }

    /// Override the clock (useful for deterministic tests).
    pub fn with_clock<C: Clock + 'static>(policy: BucketPolicy, clock: C) -> Self {
        Self { registry: BucketRegistry::new(policy, Arc::new(clock)) }
    }

    /// Underlying key -> bucket map, for inspection.
    pub fn registry(&self) -> &BucketRegistry {
        &self.registry
    }

    /// Synchronous form of [`RateLimiter::evaluate`].
    pub fn check(&self, key: &ClientKey) -> Decision {
        let bucket = self.registry.get(key);
        let decision = bucket.try_consume(self.registry.clock().now_millis());
        match &decision {
            Decision::Allowed { remaining } => {
                debug!(target: "tollgate::memory", key = %key, remaining, "request allowed");
            }
            Decision::Denied { wait, .. } => {
                info!(target: "tollgate::memory", key = %key, wait_ms = millis(*wait), "request denied");
            }
        }
        decision
    }
}

#[async_trait]
impl RateLimiter for InMemoryRateLimiter {
    async fn evaluate(&self, key: &ClientKey) -> Decision {
        self.check(key)
    }

    async fn reset(&self, key: &ClientKey) -> Result<(), StoreError> {
        self.registry.reset(key);
        Ok(())
    }
}
