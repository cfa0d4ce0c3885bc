//! Request pipeline for protected routes: admission first, then bearer-token identity.
//!
//! The identity service stays outside this crate; it plugs in through [`TokenVerifier`].
//! A request that passes both stages yields a typed [`Principal`] for the handler to take
//! as an explicit argument. Every other outcome is a [`Rejection`] the transport can render.

use crate::engine::AdmissionEngine;
use crate::key::ClientKey;
use crate::rejection::Rejection;
use async_trait::async_trait;
use std::collections::HashMap;
use tracing::{debug, info};

/// Authenticated caller, produced by a [`TokenVerifier`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    /// Stable subject identifier (e.g. user id or username).
    pub subject: String,
    /// Extra claims the verifier chose to expose.
    pub attributes: HashMap<String, String>,
}

impl Principal {
    pub fn new(subject: impl Into<String>) -> Self {
        Self { subject: subject.into(), attributes: HashMap::new() }
    }

    /// Attach a claim.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

/// Failure reported by a [`TokenVerifier`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Token malformed, expired, or signed with the wrong key.
    #[error("invalid token: {0}")]
    InvalidToken(String),
    /// Verifier could not reach its own dependencies.
    #[error("internal auth error: {0}")]
    Internal(String),
}

/// Validates session tokens issued by the identity service.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    /// Resolve `token` to the principal it was issued for.
    async fn verify(&self, token: &str) -> Result<Principal, AuthError>;
}

const MISSING_TOKEN: &str = "Missing auth token";
const INVALID_TOKEN: &str = "Invalid auth token";
const MISSING_CLIENT: &str = "missing client address";

/// Runs admission and identity checks in the order the transport requires.
#[derive(Debug, Clone)]
pub struct RequestGuard<V> {
    engine: AdmissionEngine,
    verifier: V,
}

impl<V: TokenVerifier> RequestGuard<V> {
    pub fn new(engine: AdmissionEngine, verifier: V) -> Self {
        Self { engine, verifier }
    }

    pub fn engine(&self) -> &AdmissionEngine {
        &self.engine
    }

    /// Admission only, for routes without identity requirements.
    ///
    /// `peer` is the connection's remote address; the port is discarded so every
    /// connection from one host shares a budget.
    pub async fn admit_public(&self, peer: &str) -> Result<ClientKey, Rejection> {
        let key = ClientKey::from_peer_addr(peer).map_err(|_| {
            debug!(target: "tollgate::guard", peer, "request has no usable client address");
            Rejection::BadRequest { message: MISSING_CLIENT.into() }
        })?;
        let decision = self.engine.evaluate(&key).await;
        match Rejection::from_decision(&decision) {
            None => Ok(key),
            Some(rejection) => {
                debug!(target: "tollgate::guard", key = %key, retry_after = decision.retry_after_secs(), "rate limited");
                Err(rejection)
            }
        }
    }

    /// Admission, then verification of an `Authorization: Bearer <token>` header.
    ///
    /// A rate-limited request is rejected before its token is looked at, so an
    /// over-budget client cannot use the verifier as an oracle.
    pub async fn admit(
        &self,
        peer: &str,
        authorization: Option<&str>,
    ) -> Result<Principal, Rejection> {
        let key = self.admit_public(peer).await?;

        let header = authorization.map(str::trim).filter(|h| !h.is_empty()).ok_or_else(|| {
            debug!(target: "tollgate::guard", key = %key, "bearer token missing");
            Rejection::Unauthorized { message: MISSING_TOKEN.into() }
        })?;
        let token = bearer_token(header).ok_or_else(|| {
            debug!(target: "tollgate::guard", key = %key, "malformed authorization header");
            Rejection::Unauthorized { message: INVALID_TOKEN.into() }
        })?;

        match self.verifier.verify(token).await {
            Ok(principal) => {
                debug!(target: "tollgate::guard", key = %key, subject = %principal.subject, "request admitted");
                Ok(principal)
            }
            Err(err) => {
                info!(target: "tollgate::guard", key = %key, error = %err, "token rejected");
                Err(Rejection::Unauthorized { message: INVALID_TOKEN.into() })
            }
        }
    }
}

/// Token part of a `Bearer` authorization value; the scheme is case-insensitive.
fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}
