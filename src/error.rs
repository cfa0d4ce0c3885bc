//! Error types for admission control.
//!
//! Denial is never an error: a client over budget gets a [`Decision::Denied`] value.
//! The types here cover misconfiguration (fatal at construction), store failures
//! (folded into fail-closed denials), and malformed client keys.
//!
//! [`Decision::Denied`]: crate::rate_limit::Decision::Denied

use std::time::Duration;

/// Invalid limiter configuration. Returned only at construction time.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Capacity must be > 0.
    #[error("capacity must be > 0 (got {0})")]
    InvalidCapacity(u64),
    /// Refill interval must be at least one millisecond.
    #[error("refill_interval must be >= 1ms (got {0:?})")]
    InvalidRefillInterval(Duration),
    /// Store timeout must be non-zero.
    #[error("store_timeout must be > 0 (got {0:?})")]
    InvalidStoreTimeout(Duration),
    /// The shared backend was selected without a store address.
    #[error("store_address is required when backend = \"shared\"")]
    MissingStoreAddress,
    /// A store address was given for the memory backend.
    #[error("store_address is only valid when backend = \"shared\"")]
    UnexpectedStoreAddress,
    /// The store address could not be parsed by the store client.
    #[error("invalid store_address '{address}': {reason}")]
    InvalidStoreAddress {
        /// Address as configured.
        address: String,
        /// Parser message.
        reason: String,
    },
    /// Backend name not recognised.
    #[error("unknown backend '{0}' (expected \"memory\" or \"shared\")")]
    UnknownBackend(String),
    /// A configuration value could not be parsed.
    #[error("invalid value for {field}: '{value}'")]
    InvalidValue {
        /// Field or environment variable name.
        field: &'static str,
        /// Raw value as provided.
        value: String,
    },
}

/// Failure talking to the shared counter store.
///
/// Any variant means the backend is unavailable for this call; the shared limiter
/// denies with a zero wait and hands the error to the caller for logging.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store rejected the command or could not be reached.
    #[error("store {op} failed: {message}")]
    Unavailable {
        /// Store operation (`incr`, `ttl`, `expire`, `delete`).
        op: &'static str,
        /// Error text reported by the store client.
        message: String,
    },
    /// The store did not answer within the configured timeout.
    #[error("store {op} timed out after {timeout:?}")]
    Timeout {
        /// Store operation that timed out.
        op: &'static str,
        /// Configured limit.
        timeout: Duration,
    },
}

impl StoreError {
    /// Construct an `Unavailable` error from any displayable client error.
    pub fn unavailable(op: &'static str, err: impl std::fmt::Display) -> Self {
        StoreError::Unavailable { op, message: err.to_string() }
    }

    /// Store operation that failed.
    pub fn op(&self) -> &'static str {
        match self {
            StoreError::Unavailable { op, .. } | StoreError::Timeout { op, .. } => op,
        }
    }

    /// Check if this error is a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, StoreError::Timeout { .. })
    }
}

/// Client key could not be constructed.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyError {
    /// Keys must be non-empty after trimming.
    #[error("client key must not be empty")]
    Empty,
}
