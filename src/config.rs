//! Engine configuration.
//!
//! Every construction path (builder, serde, environment) funnels through the same
//! validation, so an invalid limiter can never be built:
//! - `capacity > 0`
//! - `refill_interval >= 1ms`
//! - `store_address` present iff `backend = "shared"`
//! - `store_timeout > 0`
//!
//! Accepted JSON form (all fields optional):
//!
//! ```json
//! { "capacity": 5, "refill_interval_ms": 60000, "backend": "shared",
//!   "store_address": "redis://127.0.0.1:6379", "store_timeout_ms": 250 }
//! ```

use crate::error::ConfigError;
use crate::rate_limit::shared::DEFAULT_STORE_TIMEOUT;
use serde::Deserialize;
use std::time::Duration;

/// Burst allowance used when none is configured.
pub const DEFAULT_CAPACITY: u64 = 5;
/// Refill cadence used when none is configured.
pub const DEFAULT_REFILL_INTERVAL: Duration = Duration::from_secs(60);

/// Where rate-limit state lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    /// Process-local token buckets.
    Memory,
    /// Fixed-window counters in a shared store reachable at `store_address`.
    Shared {
        /// Store address, e.g. `redis://cache:6379` or `cache:6379`.
        store_address: String,
    },
}

impl Backend {
    /// Configuration name of this backend.
    pub fn name(&self) -> &'static str {
        match self {
            Backend::Memory => "memory",
            Backend::Shared { .. } => "shared",
        }
    }
}

/// Validated limiter configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawLimiterConfig")]
pub struct LimiterConfig {
    capacity: u64,
    refill_interval: Duration,
    backend: Backend,
    store_timeout: Duration,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            refill_interval: DEFAULT_REFILL_INTERVAL,
            backend: Backend::Memory,
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }
}

impl LimiterConfig {
    /// Create a memory-backend config with validation.
    pub fn new(capacity: u64, refill_interval: Duration) -> Result<Self, ConfigError> {
        Self::builder().capacity(capacity).refill_interval(refill_interval).build()
    }

    /// Start from the defaults (5 tokens, one per minute, memory backend).
    pub fn builder() -> LimiterConfigBuilder {
        LimiterConfigBuilder::default()
    }

    /// Parse and validate a JSON document.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(raw).map_err(|e| ConfigError::InvalidValue {
            field: "config",
            value: e.to_string(),
        })
    }

    /// Read `TOLLGATE_*` environment variables; unset variables keep their defaults.
    ///
    /// Recognized: `TOLLGATE_CAPACITY`, `TOLLGATE_REFILL_INTERVAL_MS`, `TOLLGATE_BACKEND`,
    /// `TOLLGATE_STORE_ADDRESS`, `TOLLGATE_STORE_TIMEOUT_MS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) over an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn number(field: &'static str, raw: Option<String>) -> Result<Option<u64>, ConfigError> {
            raw.map(|value| {
                value.trim().parse::<u64>().map_err(|_| ConfigError::InvalidValue { field, value })
            })
            .transpose()
        }

        let raw = RawLimiterConfig {
            capacity: number("TOLLGATE_CAPACITY", lookup("TOLLGATE_CAPACITY"))?,
            refill_interval_ms: number(
                "TOLLGATE_REFILL_INTERVAL_MS",
                lookup("TOLLGATE_REFILL_INTERVAL_MS"),
            )?,
            backend: lookup("TOLLGATE_BACKEND"),
            store_address: lookup("TOLLGATE_STORE_ADDRESS").filter(|s| !s.trim().is_empty()),
            store_timeout_ms: number("TOLLGATE_STORE_TIMEOUT_MS", lookup("TOLLGATE_STORE_TIMEOUT_MS"))?,
        };
        Self::try_from(raw)
    }

    /// Max burst tokens per client (the per-window budget for the shared backend).
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Duration between token grants (the window length for the shared backend).
    pub fn refill_interval(&self) -> Duration {
        self.refill_interval
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    /// Per-operation limit on shared-store calls.
    pub fn store_timeout(&self) -> Duration {
        self.store_timeout
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::InvalidCapacity(self.capacity));
        }
        if self.refill_interval < Duration::from_millis(1) {
            return Err(ConfigError::InvalidRefillInterval(self.refill_interval));
        }
        if self.store_timeout.is_zero() {
            return Err(ConfigError::InvalidStoreTimeout(self.store_timeout));
        }
        if let Backend::Shared { store_address } = &self.backend {
            if store_address.trim().is_empty() {
                return Err(ConfigError::MissingStoreAddress);
            }
        }
        Ok(())
    }
}

/// Builder for [`LimiterConfig`].
#[derive(Debug, Clone, Default)]
pub struct LimiterConfigBuilder {
    config: LimiterConfig,
}

impl LimiterConfigBuilder {
    /// Max burst tokens per client. Must be > 0.
    pub fn capacity(mut self, capacity: u64) -> Self {
        self.config.capacity = capacity;
        self
    }

    /// Duration between token grants. Must be >= 1ms.
    pub fn refill_interval(mut self, interval: Duration) -> Self {
        self.config.refill_interval = interval;
        self
    }

    /// Keep state in process memory (default).
    pub fn memory(mut self) -> Self {
        self.config.backend = Backend::Memory;
        self
    }

    /// Keep state in the shared store at `address`.
    pub fn shared(mut self, address: impl Into<String>) -> Self {
        self.config.backend = Backend::Shared { store_address: address.into() };
        self
    }

    /// Per-operation limit on shared-store calls. Must be > 0.
    pub fn store_timeout(mut self, timeout: Duration) -> Self {
        self.config.store_timeout = timeout;
        self
    }

    /// Build the config, validating inputs.
    pub fn build(self) -> Result<LimiterConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawLimiterConfig {
    #[serde(default)]
    capacity: Option<u64>,
    #[serde(default)]
    refill_interval_ms: Option<u64>,
    #[serde(default)]
    backend: Option<String>,
    #[serde(default)]
    store_address: Option<String>,
    #[serde(default)]
    store_timeout_ms: Option<u64>,
}

impl TryFrom<RawLimiterConfig> for LimiterConfig {
    type Error = ConfigError;

    fn try_from(raw: RawLimiterConfig) -> Result<Self, Self::Error> {
        let backend = match (raw.backend.as_deref().map(str::trim), raw.store_address) {
            (None | Some("memory"), None) => Backend::Memory,
            (None | Some("memory"), Some(_)) => return Err(ConfigError::UnexpectedStoreAddress),
            (Some("shared"), Some(store_address)) => Backend::Shared { store_address },
            (Some("shared"), None) => return Err(ConfigError::MissingStoreAddress),
            (Some(other), _) => return Err(ConfigError::UnknownBackend(other.to_string())),
        };

        let mut builder = LimiterConfig::builder();
        builder.config.backend = backend;
        if let Some(capacity) = raw.capacity {
            builder = builder.capacity(capacity);
        }
        if let Some(ms) = raw.refill_interval_ms {
            builder = builder.refill_interval(Duration::from_millis(ms));
        }
        if let Some(ms) = raw.store_timeout_ms {
            builder = builder.store_timeout(Duration::from_millis(ms));
        }
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_are_five_per_minute() {
        let config = LimiterConfig::builder().build().unwrap();
        assert_eq!(config.capacity(), 5);
        assert_eq!(config.refill_interval(), Duration::from_secs(60));
        assert_eq!(config.backend(), &Backend::Memory);
    }

    #[test]
    fn builder_rejects_non_positive_values() {
        assert_eq!(LimiterConfig::new(0, Duration::from_secs(1)), Err(ConfigError::InvalidCapacity(0)));
        assert_eq!(
            LimiterConfig::new(1, Duration::ZERO),
            Err(ConfigError::InvalidRefillInterval(Duration::ZERO))
        );
        assert_eq!(
            LimiterConfig::builder().store_timeout(Duration::ZERO).build(),
            Err(ConfigError::InvalidStoreTimeout(Duration::ZERO))
        );
        assert_eq!(LimiterConfig::builder().shared("  ").build(), Err(ConfigError::MissingStoreAddress));
    }

    #[test]
    fn deserializes_shared_backend() {
        let config = LimiterConfig::from_json_str(
            r#"{"capacity": 10, "refill_interval_ms": 1000, "backend": "shared",
                "store_address": "redis://cache:6379"}"#,
        )
        .unwrap();
        assert_eq!(config.capacity(), 10);
        assert_eq!(config.refill_interval(), Duration::from_secs(1));
        assert_eq!(config.backend().name(), "shared");
        assert_eq!(config.store_timeout(), DEFAULT_STORE_TIMEOUT);
    }

    #[test]
    fn documented_json_form_parses() {
        let config = LimiterConfig::from_json_str(
            r#"{ "capacity": 5, "refill_interval_ms": 60000, "backend": "shared",
                 "store_address": "redis://127.0.0.1:6379", "store_timeout_ms": 250 }"#,
        )
        .unwrap();
        assert_eq!(config.store_timeout(), Duration::from_millis(250));
        assert_eq!(LimiterConfig::from_json_str("{}").unwrap(), LimiterConfig::default());
    }

    #[test]
    fn store_address_required_iff_shared() {
        let err: Result<LimiterConfig, _> = serde_json::from_str(r#"{"backend": "shared"}"#);
        assert!(err.unwrap_err().to_string().contains("store_address is required"));

        let err: Result<LimiterConfig, _> =
            serde_json::from_str(r#"{"backend": "memory", "store_address": "x:1"}"#);
        assert!(err.is_err());
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let raw = RawLimiterConfig { backend: Some("sliding".into()), ..Default::default() };
        assert_eq!(LimiterConfig::try_from(raw), Err(ConfigError::UnknownBackend("sliding".into())));
    }

    #[test]
    fn reads_environment_style_lookup() {
        let vars: HashMap<&str, &str> = [
            ("TOLLGATE_CAPACITY", "3"),
            ("TOLLGATE_REFILL_INTERVAL_MS", "500"),
            ("TOLLGATE_BACKEND", "shared"),
            ("TOLLGATE_STORE_ADDRESS", "127.0.0.1:6379"),
        ]
        .into_iter()
        .collect();
        let config = LimiterConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.capacity(), 3);
        assert_eq!(config.refill_interval(), Duration::from_millis(500));
        assert_eq!(config.backend(), &Backend::Shared { store_address: "127.0.0.1:6379".into() });
    }

    #[test]
    fn env_parse_errors_name_the_variable() {
        let err = LimiterConfig::from_lookup(|k| (k == "TOLLGATE_CAPACITY").then(|| "five".to_string()))
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidValue { field: "TOLLGATE_CAPACITY", value: "five".into() }
        );
    }
}
