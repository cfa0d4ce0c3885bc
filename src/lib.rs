#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # Tollgate
//!
//! Per-client admission control for async Rust services.
//!
//! ## Features
//!
//! - **Token buckets** per client key, held in process memory
//! - **Fixed-window counters** in a shared store (Redis) for multi-instance deployments
//! - **Fail-closed** handling of store errors and timeouts
//! - **Tower middleware** and a request guard that runs admission before bearer-token checks
//!
//! ## Quick Start
//!
//! ```rust
//! use tollgate::{AdmissionEngine, ClientKey, LimiterConfig};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = LimiterConfig::builder()
//!         .capacity(5)
//!         .refill_interval(Duration::from_secs(60))
//!         .build()
//!         .expect("valid config");
//!     let engine = AdmissionEngine::from_config(&config).expect("engine");
//!
//!     let key = ClientKey::from_peer_addr("203.0.113.7:51234").expect("key");
//!     let decision = engine.evaluate(&key).await;
//!     assert!(decision.is_allowed());
//! }
//! ```

pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod guard;
pub mod key;
pub mod prelude;
pub mod rate_limit;
pub mod rejection;

// Re-exports
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::{Backend, LimiterConfig, LimiterConfigBuilder};
pub use engine::AdmissionEngine;
pub use error::{ConfigError, KeyError, StoreError};
pub use guard::{AuthError, Principal, RequestGuard, TokenVerifier};
pub use key::ClientKey;
pub use rate_limit::{Decision, DenyReason, RateLimiter};
pub use rejection::Rejection;
