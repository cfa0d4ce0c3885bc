//! Convenient re-exports for common Tollgate types.
pub use crate::{
    config::{Backend, LimiterConfig},
    engine::AdmissionEngine,
    guard::{AuthError, Principal, RequestGuard, TokenVerifier},
    key::ClientKey,
    rate_limit::{
        bucket::BucketPolicy,
        memory::InMemoryRateLimiter,
        middleware::{AdmissionLayer, KeyExtractor, Rejected},
        shared::SharedRateLimiter,
        store::{CounterStore, InMemoryCounterStore},
        Decision, DenyReason, RateLimiter,
    },
    rejection::Rejection,
    ConfigError, StoreError,
};
