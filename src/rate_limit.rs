//! Rate limiting primitives.
//!
//! This module provides the building blocks for per-client admission control:
//! - [`RateLimiter`]: The core trait answering "allow or deny, and for how long".
//! - [`Decision`]: The result of a rate limit check (Allowed/Denied).
//! - [`AdmissionLayer`]: Tower middleware that enforces the limit.
//!
//! # Architecture
//!
//! Two interchangeable deployment strategies implement [`RateLimiter`]:
//! - **In-memory** ([`memory::InMemoryRateLimiter`]): one token [`bucket::Bucket`] per client
//!   key, held in a [`registry::BucketRegistry`]. No I/O, strictly per-process.
//! - **Shared** ([`shared::SharedRateLimiter`]): a fixed-window counter per key in a
//!   [`store::CounterStore`] (e.g. Redis) so several server instances share one budget.
//!   Fails closed when the store is unreachable.
//!
//! Exactly one strategy is active for an engine; see [`crate::engine::AdmissionEngine`].

use crate::error::StoreError;
use crate::key::ClientKey;
use std::sync::Arc;
use std::time::Duration;

pub mod bucket;
pub mod memory;
pub mod middleware;
#[cfg(feature = "redis")]
pub mod redis;
pub mod registry;
pub mod shared;
pub mod store;

pub use middleware::{AdmissionLayer, AdmissionService, Rejected};

/// Why a request was denied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    /// The client spent its budget; retry after the reported wait.
    Exhausted,
    /// The shared store could not be consulted. The request is denied (fail closed) and
    /// the wait is unknown, reported as zero.
    BackendUnavailable(Arc<StoreError>),
}

/// The decision returned by a rate limiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// The request is allowed to proceed.
    Allowed {
        /// Permits left after this request.
        /// Useful for `X-RateLimit-Remaining` headers.
        remaining: u64,
    },
    /// The request is denied.
    Denied {
        /// How long the caller should wait before retrying. Never negative; zero when unknown.
        /// Useful for `Retry-After` headers.
        wait: Duration,
        /// Reason for denial.
        reason: DenyReason,
    },
}

impl Decision {
    pub(crate) fn exhausted(wait: Duration) -> Self {
        Decision::Denied { wait, reason: DenyReason::Exhausted }
    }

    pub(crate) fn backend_unavailable(err: StoreError) -> Self {
        Decision::Denied { wait: Duration::ZERO, reason: DenyReason::BackendUnavailable(Arc::new(err)) }
    }

    /// Helper to check if allowed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed { .. })
    }

    /// Wait hint; zero for allowed requests.
    pub fn wait(&self) -> Duration {
        match self {
            Decision::Allowed { .. } => Duration::ZERO,
            Decision::Denied { wait, .. } => *wait,
        }
    }

    /// Wait hint in whole seconds, rounded up so a client honouring it never retries early.
    pub fn retry_after_secs(&self) -> u64 {
        ceil_secs(self.wait())
    }

    /// Store failure behind a fail-closed denial, if any.
    pub fn backend_error(&self) -> Option<&StoreError> {
        match self {
            Decision::Denied { reason: DenyReason::BackendUnavailable(err), .. } => Some(err.as_ref()),
            _ => None,
        }
    }
}

pub(crate) fn ceil_secs(wait: Duration) -> u64 {
    wait.as_secs() + u64::from(wait.subsec_nanos() > 0)
}

/// Whole milliseconds, saturating at `u64::MAX`.
pub(crate) fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Core interface for admission decisions.
///
/// Implementations never return an error for a single request: store failures become
/// fail-closed denials carrying the error in [`DenyReason::BackendUnavailable`].
#[async_trait::async_trait]
pub trait RateLimiter: Send + Sync + std::fmt::Debug {
    /// Decide whether one request from `key` may proceed.
    async fn evaluate(&self, key: &ClientKey) -> Decision;

    /// Administrative reset: give `key` a full budget again.
    async fn reset(&self, key: &ClientKey) -> Result<(), StoreError>;
}
