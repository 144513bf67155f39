use crate::error::LimitError;
use crate::rate_limit::bucket::BucketId;
use crate::rate_limit::{CheckReason, RateLimiter};
use futures::future::BoxFuture;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tower_layer::Layer;
use tower_service::Service;

/// Error returned by [`AdmissionService`].
#[derive(thiserror::Error, Debug)]
pub enum AdmissionError<E> {
    /// The bucket (or the failure policy) refused the request. The inner service was not called.
    #[error("request denied ({reason:?})")]
    Denied {
        /// Suggested wait, for `Retry-After` headers.
        retry_after: Option<Duration>,
        reason: CheckReason,
    },
    /// The limiter itself failed (invalid cost, audit trail down).
    #[error("admission check failed: {0}")]
    Limiter(#[source] LimitError),
    /// The inner service failed.
    #[error("inner service error: {0}")]
    Inner(E),
}

impl<E> AdmissionError<E> {
    pub fn is_denied(&self) -> bool {
        matches!(self, AdmissionError::Denied { .. })
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            AdmissionError::Denied { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// A layer that checks a bucket before every request.
///
/// The key extractor maps each request to the bucket it is charged against,
/// typically by tenant, API key or client address.
pub struct AdmissionLayer<L, K> {
    limiter: Arc<L>,
    key: Arc<K>,
    cost: u32,
}

impl<L, K> Clone for AdmissionLayer<L, K> {
    fn clone(&self) -> Self {
        Self { limiter: self.limiter.clone(), key: self.key.clone(), cost: self.cost }
    }
}

impl<L, K> AdmissionLayer<L, K> {
    /// Charge one token per request against the bucket `key` picks.
    pub fn new(limiter: Arc<L>, key: K) -> Self {
        Self { limiter, key: Arc::new(key), cost: 1 }
    }

    /// Charge `cost` tokens per request instead.
    pub fn with_cost(mut self, cost: u32) -> Self {
        self.cost = cost;
        self
    }
}

impl<S, L, K> Layer<S> for AdmissionLayer<L, K> {
    type Service = AdmissionService<S, L, K>;

    fn layer(&self, service: S) -> Self::Service {
        AdmissionService {
            inner: service,
            limiter: self.limiter.clone(),
            key: self.key.clone(),
            cost: self.cost,
        }
    }
}

/// Middleware service produced by [`AdmissionLayer`].
pub struct AdmissionService<S, L, K> {
    inner: S,
    limiter: Arc<L>,
    key: Arc<K>,
    cost: u32,
}

impl<S: Clone, L, K> Clone for AdmissionService<S, L, K> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            limiter: self.limiter.clone(),
            key: self.key.clone(),
            cost: self.cost,
        }
    }
}

impl<S, L, K, Req> Service<Req> for AdmissionService<S, L, K>
where
    S: Service<Req> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    L: RateLimiter + 'static,
    K: Fn(&Req) -> BucketId + Send + Sync + 'static,
    Req: Send + 'static,
{
    type Response = S::Response;
    type Error = AdmissionError<S::Error>;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(AdmissionError::Inner)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let limiter = self.limiter.clone();
        let id = (self.key)(&req);
        let cost = self.cost;
        // Take the service that was driven to readiness, leave a fresh clone behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let outcome = limiter.check(&id, cost).await.map_err(AdmissionError::Limiter)?;
            if !outcome.allowed {
                return Err(AdmissionError::Denied {
                    retry_after: outcome.retry_after,
                    reason: outcome.reason,
                });
            }
            inner.call(req).await.map_err(AdmissionError::Inner)
        })
    }
}
