use crate::key::ClientKey;
use crate::rate_limit::{Decision, DenyReason, RateLimiter};
use crate::rejection::Rejection;
use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tower_layer::Layer;
use tower_service::Service;

/// Pulls the client key out of a request. Returning `None` rejects the request.
pub trait KeyExtractor<Req>: Send + Sync {
    fn extract(&self, req: &Req) -> Option<ClientKey>;
}

impl<Req, F> KeyExtractor<Req> for F
where
    F: Fn(&Req) -> Option<ClientKey> + Send + Sync,
{
    fn extract(&self, req: &Req) -> Option<ClientKey> {
        self(req)
    }
}

/// Error returned by [`AdmissionService`].
#[derive(Debug)]
pub enum Rejected<E> {
    /// The limiter denied the request.
    RateLimited {
        /// Wait hint; zero when the shared store was unavailable.
        wait: Duration,
        /// Why the request was denied.
        reason: DenyReason,
    },
    /// No client key could be derived from the request.
    MissingClientKey,
    /// The inner service failed.
    Inner(E),
}

impl<E: fmt::Display> fmt::Display for Rejected<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RateLimited { wait, reason: DenyReason::Exhausted } => {
                write!(f, "rate limited; retry after {:?}", wait)
            }
            Self::RateLimited { reason: DenyReason::BackendUnavailable(err), .. } => {
                write!(f, "rate limited; backend unavailable: {}", err)
            }
            Self::MissingClientKey => write!(f, "request carries no client key"),
            Self::Inner(e) => write!(f, "{}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for Rejected<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Inner(e) => Some(e),
            Self::RateLimited { reason: DenyReason::BackendUnavailable(err), .. } => {
                Some(err.as_ref())
            }
            _ => None,
        }
    }
}

impl<E> Rejected<E> {
    /// Check if this error is a rate-limit denial.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// Get the inner error if this is an Inner variant
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }

    /// Wire-level rejection for admission failures; `None` for inner service errors.
    pub fn to_rejection(&self) -> Option<Rejection> {
        match self {
            Self::RateLimited { wait, .. } => Some(Rejection::rate_limited(*wait)),
            Self::MissingClientKey => {
                Some(Rejection::BadRequest { message: "missing client address".into() })
            }
            Self::Inner(_) => None,
        }
    }
}

/// A layer that enforces per-client admission using a [`RateLimiter`].
pub struct AdmissionLayer<K> {
    limiter: Arc<dyn RateLimiter>,
    extractor: Arc<K>,
}

impl<K> Clone for AdmissionLayer<K> {
    fn clone(&self) -> Self {
        Self { limiter: self.limiter.clone(), extractor: self.extractor.clone() }
    }
}

impl<K> fmt::Debug for AdmissionLayer<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdmissionLayer")
            .field("limiter", &self.limiter)
            .field("extractor", &"<extractor>")
            .finish()
    }
}

impl<K> AdmissionLayer<K> {
    /// Create a new admission layer.
    pub fn new(limiter: Arc<dyn RateLimiter>, extractor: K) -> Self {
        Self { limiter, extractor: Arc::new(extractor) }
    }
}

impl<S, K> Layer<S> for AdmissionLayer<K> {
    type Service = AdmissionService<S, K>;

    fn layer(&self, service: S) -> Self::Service {
        AdmissionService {
            inner: service,
            limiter: self.limiter.clone(),
            extractor: self.extractor.clone(),
        }
    }
}

/// Middleware service that admits or rejects each request before the inner service.
pub struct AdmissionService<S, K> {
    inner: S,
    limiter: Arc<dyn RateLimiter>,
    extractor: Arc<K>,
}

impl<S: Clone, K> Clone for AdmissionService<S, K> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            limiter: self.limiter.clone(),
            extractor: self.extractor.clone(),
        }
    }
}

impl<S: fmt::Debug, K> fmt::Debug for AdmissionService<S, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdmissionService")
            .field("inner", &self.inner)
            .field("limiter", &self.limiter)
            .finish()
    }
}

impl<S, K, Req> Service<Req> for AdmissionService<S, K>
where
    S: Service<Req> + Clone + Send + 'static,
    S::Future: Send + 'static,
    K: KeyExtractor<Req> + 'static,
    Req: Send + 'static,
{
    type Response = S::Response;
    type Error = Rejected<S::Error>;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Rejected::Inner)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let limiter = self.limiter.clone();
        let key = self.extractor.extract(&req);
        // Take the service that was driven to readiness; leave a fresh clone behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let Some(key) = key else {
                return Err(Rejected::MissingClientKey);
            };
            match limiter.evaluate(&key).await {
                Decision::Allowed { .. } => inner.call(req).await.map_err(Rejected::Inner),
                Decision::Denied { wait, reason } => Err(Rejected::RateLimited { wait, reason }),
            }
        })
    }
}
