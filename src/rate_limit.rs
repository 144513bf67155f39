//! Short-window request throttling.
//!
//! This module provides the building blocks for admission control:
//! - [`RateLimiter`]: The core trait for deciding allow/deny on a bucket.
//! - [`TokenBucketLimiter`]: The store-backed implementation.
//! - [`AdmissionLayer`]: Tower middleware that enforces the limit.
//! - [`CheckOutcome`]: The result of a check.
//!
//! # Architecture
//!
//! - **Middleware**: `AdmissionLayer` wraps your service. It doesn't know *how* limiting works,
//!   only that it should ask a `RateLimiter`.
//! - **Logic**: `TokenBucketLimiter` owns refill, cooldown blocks and the exceed event;
//!   the per-strategy math lives in `strategies`.
//! - **Storage**: [`BucketStore`](crate::store::BucketStore) holds versioned bucket records,
//!   so the limiter works unchanged against in-memory or distributed backends.

use crate::error::LimitError;
use std::time::Duration;

pub mod bucket;
pub mod limiter;
pub mod middleware;
pub mod strategies;

pub use bucket::{BucketId, BucketSpec, RateLimitBucket, Strategy};
pub use limiter::TokenBucketLimiter;
pub use middleware::{AdmissionError, AdmissionLayer, AdmissionService};

/// Why a check was decided the way it was.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckReason {
    /// Enough tokens were available and were consumed.
    Admitted,
    /// Not enough tokens.
    Exhausted,
    /// The cost is larger than the bucket's limit; retrying cannot succeed.
    CostExceedsLimit,
    /// The bucket is inside a cooldown block.
    Blocked,
    /// No bucket is configured under this id; the failure policy decided.
    BucketMissing,
    /// The store could not be consulted; the failure policy decided.
    StoreUnavailable,
}

impl CheckReason {
    /// True when the answer came from the failure policy rather than the bucket.
    pub fn is_degraded(self) -> bool {
        matches!(self, CheckReason::BucketMissing | CheckReason::StoreUnavailable)
    }
}

/// The decision returned by a rate limiter.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckOutcome {
    /// Whether the request may proceed.
    pub allowed: bool,
    /// Whole tokens left after this check.
    /// Useful for `X-RateLimit-Remaining` headers.
    pub tokens_remaining: u64,
    /// How long the caller should wait before retrying, when denied by the bucket.
    /// Useful for `Retry-After` headers.
    pub retry_after: Option<Duration>,
    pub reason: CheckReason,
}

impl CheckOutcome {
    pub(crate) fn admitted(tokens_remaining: u64) -> Self {
        Self { allowed: true, tokens_remaining, retry_after: None, reason: CheckReason::Admitted }
    }

    pub(crate) fn denied(tokens_remaining: u64, retry_after: Option<Duration>, reason: CheckReason) -> Self {
        Self { allowed: false, tokens_remaining, retry_after, reason }
    }

    pub(crate) fn degraded(allowed: bool, reason: CheckReason) -> Self {
        Self { allowed, tokens_remaining: 0, retry_after: None, reason }
    }

    /// Helper to check if allowed.
    pub fn is_allowed(&self) -> bool {
        self.allowed
    }
}

/// Core interface for admission decisions.
///
/// This trait decouples the middleware from the implementation and the storage.
#[async_trait::async_trait]
pub trait RateLimiter: Send + Sync {
    /// Spend `cost` tokens from the bucket `id`, or explain why not.
    async fn check(&self, id: &BucketId, cost: u32) -> Result<CheckOutcome, LimitError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn degraded_reasons() {
        assert!(CheckReason::BucketMissing.is_degraded());
        assert!(CheckReason::StoreUnavailable.is_degraded());
        assert!(!CheckReason::Exhausted.is_degraded());
        assert!(!CheckReason::Blocked.is_degraded());
        assert!(!CheckReason::CostExceedsLimit.is_degraded());
    }

    #[test]
    fn outcome_constructors() {
        let ok = CheckOutcome::admitted(4);
        assert!(ok.is_allowed());
        assert_eq!(ok.retry_after, None);

        let denied = CheckOutcome::denied(0, Some(Duration::from_secs(2)), CheckReason::Exhausted);
        assert!(!denied.is_allowed());
        assert_eq!(denied.retry_after, Some(Duration::from_secs(2)));

        let open = CheckOutcome::degraded(true, CheckReason::StoreUnavailable);
        assert!(open.is_allowed());
        assert_eq!(open.tokens_remaining, 0);
    }
}
