//! The admission engine: one entry point, one backend.
//!
//! An [`AdmissionEngine`] is built once at startup and shared by reference (usually an
//! `Arc`) with the transport layer. It holds exactly one [`RateLimiter`]; memory and shared
//! backends are alternatives chosen by configuration, never stacked.

use crate::config::{Backend, LimiterConfig};
use crate::error::{ConfigError, StoreError};
use crate::key::ClientKey;
use crate::rate_limit::bucket::BucketPolicy;
use crate::rate_limit::memory::InMemoryRateLimiter;
use crate::rate_limit::middleware::AdmissionLayer;
use crate::rate_limit::{millis, Decision, RateLimiter};
use std::sync::Arc;
use tracing::info;

/// Per-client admission control, selected at construction time.
#[derive(Debug, Clone)]
pub struct AdmissionEngine {
    limiter: Arc<dyn RateLimiter>,
    backend: &'static str,
}

impl AdmissionEngine {
    /// Build the backend named by `config`.
    ///
    /// Fails only on configuration that can be checked without I/O. A shared store that is
    /// unreachable at startup is not an error here; its requests are denied until it recovers.
    pub fn from_config(config: &LimiterConfig) -> Result<Self, ConfigError> {
        let limiter: Arc<dyn RateLimiter> = match config.backend() {
            Backend::Memory => {
                let policy = BucketPolicy::new(config.capacity(), config.refill_interval())?;
                Arc::new(InMemoryRateLimiter::new(policy))
            }
            Backend::Shared { store_address } => shared_limiter(config, store_address)?,
        };
        info!(
            backend = config.backend().name(),
            capacity = config.capacity(),
            refill_interval_ms = millis(config.refill_interval()),
            "admission engine ready"
        );
        Ok(Self { limiter, backend: config.backend().name() })
    }

    /// Wrap an already constructed limiter (custom stores, test clocks).
    pub fn with_limiter<L: RateLimiter + 'static>(limiter: L) -> Self {
        Self::from_arc(Arc::new(limiter))
    }

    /// Wrap a shared limiter handle.
    pub fn from_arc(limiter: Arc<dyn RateLimiter>) -> Self {
        Self { limiter, backend: "custom" }
    }

    /// Decide whether one request from `key` may proceed.
    pub async fn evaluate(&self, key: &ClientKey) -> Decision {
        self.limiter.evaluate(key).await
    }

    /// Give `key` a full budget again.
    pub async fn reset(&self, key: &ClientKey) -> Result<(), StoreError> {
        self.limiter.reset(key).await
    }

    /// Backend name: `memory`, `shared`, or `custom`.
    pub fn backend(&self) -> &'static str {
        self.backend
    }

    pub fn limiter(&self) -> &Arc<dyn RateLimiter> {
        &self.limiter
    }

    /// Tower layer enforcing this engine in front of a service.
    pub fn layer<K>(&self, extractor: K) -> AdmissionLayer<K> {
        AdmissionLayer::new(self.limiter.clone(), extractor)
    }
}

#[cfg(feature = "redis")]
fn shared_limiter(
    config: &LimiterConfig,
    store_address: &str,
) -> Result<Arc<dyn RateLimiter>, ConfigError> {
    use crate::rate_limit::redis::RedisCounterStore;
    use crate::rate_limit::shared::SharedRateLimiter;

    let store = RedisCounterStore::open(store_address)?;
    let limiter = SharedRateLimiter::new(store, config.capacity(), config.refill_interval())
        .with_timeout(config.store_timeout());
    Ok(Arc::new(limiter))
}

#[cfg(not(feature = "redis"))]
fn shared_limiter(
    _config: &LimiterConfig,
    store_address: &str,
) -> Result<Arc<dyn RateLimiter>, ConfigError> {
    Err(ConfigError::InvalidStoreAddress {
        address: store_address.to_string(),
        reason: "built without the `redis` feature".into(),
    })
}
