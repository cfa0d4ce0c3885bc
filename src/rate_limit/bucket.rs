//! Token bucket primitive.
//!
//! Semantics:
//! - A bucket starts full (`tokens == capacity`), allowing an initial burst.
//! - One token is restored per whole `refill_interval` elapsed since the last refill.
//! - When any token is restored, `last_refill` jumps to `now`; the fractional remainder of
//!   the elapsed time is dropped rather than banked.
//! - A request consumes one token; with none left it is denied with the time until the
//!   next whole interval completes.
//!
//! Invariants:
//! - `0 <= tokens <= capacity` after every operation.
//! - `last_refill` never decreases, even if the clock reports an earlier time.

use crate::error::ConfigError;
use crate::rate_limit::Decision;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Validated bucket shape shared by every bucket a limiter creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketPolicy {
    capacity: u64,
    refill_interval: Duration,
    interval_millis: u64,
}

impl BucketPolicy {
    /// Errors if `refill_interval` is below one millisecond. A zero `capacity` is accepted
    /// here and yields buckets that deny every request; engine configuration rejects it.
    pub fn new(capacity: u64, refill_interval: Duration) -> Result<Self, ConfigError> {
        let interval_millis = u64::try_from(refill_interval.as_millis()).unwrap_or(u64::MAX);
        if interval_millis == 0 {
            return Err(ConfigError::InvalidRefillInterval(refill_interval));
        }
        Ok(Self { capacity, refill_interval, interval_millis })
    }

    /// Max tokens (burst allowance).
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Duration between token grants.
    pub fn refill_interval(&self) -> Duration {
        self.refill_interval
    }
}

#[derive(Debug)]
struct BucketState {
    tokens: u64,
    last_refill_millis: u64,
}

/// One client's token reservoir.
///
/// All mutation happens under a lock scoped to this bucket alone, so clients never
/// contend with each other.
#[derive(Debug)]
pub struct Bucket {
    policy: BucketPolicy,
    state: Mutex<BucketState>,
}

impl Bucket {
    /// Create a full bucket. `now_millis` seeds the refill timestamp.
    pub fn new(policy: BucketPolicy, now_millis: u64) -> Self {
        Self {
            policy,
            state: Mutex::new(BucketState {
                tokens: policy.capacity,
                last_refill_millis: now_millis,
            }),
        }
    }

    pub fn policy(&self) -> BucketPolicy {
        self.policy
    }

    /// Current balance as of the last operation, without applying pending refills.
    pub fn tokens(&self) -> u64 {
        self.lock().tokens
    }

    /// Refill, then try to take one token.
    pub fn try_consume(&self, now_millis: u64) -> Decision {
        let mut state = self.lock();

        let elapsed = now_millis.saturating_sub(state.last_refill_millis);
        let interval = self.policy.interval_millis;
        let to_add = elapsed / interval;
        if to_add > 0 {
            state.tokens = state.tokens.saturating_add(to_add).min(self.policy.capacity);
            state.last_refill_millis = now_millis;
        }

        if state.tokens > 0 {
            state.tokens -= 1;
            return Decision::Allowed { remaining: state.tokens };
        }

        // Measured from the (possibly just advanced) refill point, so the wait lands on the
        // next whole interval and is always in (0, refill_interval].
        let since_refill = now_millis.saturating_sub(state.last_refill_millis);
        let wait = interval - since_refill % interval;
        Decision::exhausted(Duration::from_millis(wait))
    }

    /// Refill to capacity and restart the refill cadence at `now_millis`.
    pub fn reset(&self, now_millis: u64) {
        let mut state = self.lock();
        state.tokens = self.policy.capacity;
        state.last_refill_millis = state.last_refill_millis.max(now_millis);
    }

    // Every write leaves the state valid, so a poisoned lock is safe to reuse.
    fn lock(&self) -> MutexGuard<'_, BucketState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
