//! Wire-level rejection contract consumed by the transport layer.
//!
//! The transport turns a [`Rejection`] into a response: [`Rejection::status`] for the
//! status line, [`Rejection::retry_after_secs`] for a `Retry-After` header, and
//! [`Rejection::to_json`] for the body, e.g.
//!
//! ```json
//! {"error":"Too many requests","code":"RATE_LIMITED","retry_after":42,
//!  "retry_after_human":"Please wait 42 seconds before retrying."}
//! ```

use crate::rate_limit::{ceil_secs, Decision};
use serde_json::{json, Value};
use std::time::Duration;

/// Machine-readable code for rate-limit denials.
pub const RATE_LIMITED: &str = "RATE_LIMITED";
/// Machine-readable code for failed identity verification.
pub const UNAUTHORIZED: &str = "UNAUTHORIZED";
/// Machine-readable code for requests the guard cannot classify.
pub const BAD_REQUEST: &str = "BAD_REQUEST";

/// Why the request pipeline refused a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// Over budget, or the shared store was unavailable.
    RateLimited {
        /// Whole seconds to wait, rounded up. Zero means "unknown; apply your own backoff".
        retry_after_secs: u64,
    },
    /// Bearer token missing, malformed, or rejected by the identity service.
    Unauthorized {
        /// Human-readable detail.
        message: String,
    },
    /// No usable client key.
    BadRequest {
        /// Human-readable detail.
        message: String,
    },
}

impl Rejection {
    /// Rejection for a denial with the given wait. The deny reason does not change what
    /// the client sees.
    pub fn rate_limited(wait: Duration) -> Self {
        Rejection::RateLimited { retry_after_secs: ceil_secs(wait) }
    }

    /// `None` for allowed decisions.
    pub fn from_decision(decision: &Decision) -> Option<Self> {
        match decision {
            Decision::Allowed { .. } => None,
            Decision::Denied { wait, .. } => Some(Self::rate_limited(*wait)),
        }
    }

    /// Machine-readable reason code.
    pub fn code(&self) -> &'static str {
        match self {
            Rejection::RateLimited { .. } => RATE_LIMITED,
            Rejection::Unauthorized { .. } => UNAUTHORIZED,
            Rejection::BadRequest { .. } => BAD_REQUEST,
        }
    }

    /// HTTP status the transport should answer with.
    pub fn status(&self) -> u16 {
        match self {
            Rejection::RateLimited { .. } => 429,
            Rejection::Unauthorized { .. } => 401,
            Rejection::BadRequest { .. } => 400,
        }
    }

    /// Value for a `Retry-After` header.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Rejection::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        }
    }

    /// JSON response body.
    pub fn to_json(&self) -> Value {
        match self {
            Rejection::RateLimited { retry_after_secs } => json!({
                "error": "Too many requests",
                "code": RATE_LIMITED,
                "retry_after": retry_after_secs,
                "retry_after_human": format!("Please wait {} seconds before retrying.", retry_after_secs),
            }),
            Rejection::Unauthorized { message } | Rejection::BadRequest { message } => json!({
                "error": message,
                "code": self.code(),
            }),
        }
    }
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rejection::RateLimited { retry_after_secs } => {
                write!(f, "{}: retry after {}s", RATE_LIMITED, retry_after_secs)
            }
            Rejection::Unauthorized { message } | Rejection::BadRequest { message } => {
                write!(f, "{}: {}", self.code(), message)
            }
        }
    }
}
