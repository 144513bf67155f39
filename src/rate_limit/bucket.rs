//! Rate-limit bucket records.

use crate::error::LimitError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a bucket: the bucket name plus the caller it throttles.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BucketId {
    /// Bucket name, e.g. `"api"`.
    pub name: String,
    /// Tenant, user, IP or API key being throttled.
    pub identifier: String,
}

impl BucketId {
    pub fn new(name: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self { name: name.into(), identifier: identifier.into() }
    }
}

impl fmt::Display for BucketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.identifier)
    }
}

/// Refill discipline of a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Continuous refill of `requests_limit` tokens per window.
    TokenBucket,
    /// Full reset at every window boundary.
    FixedWindow,
    /// Fixed window corrected by the weighted usage of the previous window.
    SlidingWindow,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::TokenBucket => write!(f, "token_bucket"),
            Strategy::FixedWindow => write!(f, "fixed_window"),
            Strategy::SlidingWindow => write!(f, "sliding_window"),
        }
    }
}

/// Parameters for `configure_bucket`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketSpec {
    pub name: String,
    pub identifier: String,
    /// Free-form label such as `"requests_per_minute"`.
    pub limit_type: String,
    pub requests_limit: u64,
    pub window_seconds: u64,
    pub strategy: Strategy,
}

impl BucketSpec {
    pub fn new(
        name: impl Into<String>,
        identifier: impl Into<String>,
        limit_type: impl Into<String>,
        requests_limit: u64,
        window_seconds: u64,
        strategy: Strategy,
    ) -> Self {
        Self {
            name: name.into(),
            identifier: identifier.into(),
            limit_type: limit_type.into(),
            requests_limit,
            window_seconds,
            strategy,
        }
    }

    pub fn id(&self) -> BucketId {
        BucketId::new(self.name.clone(), self.identifier.clone())
    }

    pub(crate) fn validate(&self) -> Result<(), LimitError> {
        if self.name.trim().is_empty() {
            return Err(LimitError::validation("name", "must not be empty"));
        }
        if self.identifier.trim().is_empty() {
            return Err(LimitError::validation("identifier", "must not be empty"));
        }
        if self.limit_type.trim().is_empty() {
            return Err(LimitError::validation("limit_type", "must not be empty"));
        }
        if self.requests_limit == 0 {
            return Err(LimitError::validation("requests_limit", "must be > 0"));
        }
        if self.window_seconds == 0 {
            return Err(LimitError::validation("window_seconds", "must be > 0"));
        }
        Ok(())
    }
}

/// Versioned bucket record as held by the store.
///
/// Invariants: `0 <= current_tokens <= requests_limit`, `blocked_until.is_some() == is_blocked`,
/// and `version` grows by one on every write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitBucket {
    pub id: BucketId,
    pub limit_type: String,
    pub requests_limit: u64,
    pub window_seconds: u64,
    pub strategy: Strategy,
    pub current_tokens: f64,
    /// Token bucket: last refill instant. Window strategies: start of the current window.
    pub last_refill_time: DateTime<Utc>,
    pub requests_made: u64,
    pub is_blocked: bool,
    pub blocked_until: Option<DateTime<Utc>>,
    /// Tokens spent in the window before the current one (sliding window only).
    #[serde(default)]
    pub previous_window_used: f64,
    pub version: u64,
}

impl RateLimitBucket {
    /// A full bucket as created by the first `configure_bucket`.
    pub fn new(spec: &BucketSpec, now: DateTime<Utc>) -> Self {
        Self {
            id: spec.id(),
            limit_type: spec.limit_type.clone(),
            requests_limit: spec.requests_limit,
            window_seconds: spec.window_seconds,
            strategy: spec.strategy,
            current_tokens: spec.requests_limit as f64,
            last_refill_time: now,
            requests_made: 0,
            is_blocked: false,
            blocked_until: None,
            previous_window_used: 0.0,
            version: 1,
        }
    }

    /// Apply a new configuration, keeping usage state within the new bounds.
    pub(crate) fn reconfigure(&mut self, spec: &BucketSpec) {
        self.limit_type = spec.limit_type.clone();
        self.requests_limit = spec.requests_limit;
        self.window_seconds = spec.window_seconds;
        self.strategy = spec.strategy;
        let capacity = self.capacity();
        self.current_tokens = self.current_tokens.clamp(0.0, capacity);
        self.previous_window_used = self.previous_window_used.clamp(0.0, capacity);
    }

    pub fn capacity(&self) -> f64 {
        self.requests_limit as f64
    }

    /// Whole tokens currently held.
    pub fn tokens_remaining(&self) -> u64 {
        self.current_tokens.max(0.0).floor() as u64
    }

    pub(crate) fn block_until(&mut self, until: DateTime<Utc>) {
        self.is_blocked = true;
        self.blocked_until = Some(until);
    }

    pub(crate) fn unblock(&mut self) {
        self.is_blocked = false;
        self.blocked_until = None;
    }

    /// The cooldown end, if the bucket is blocked at `now`.
    pub fn blocked_at(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match (self.is_blocked, self.blocked_until) {
            (true, Some(until)) if now < until => Some(until),
            _ => None,
        }
    }

    /// Check the record invariants.
    pub fn invariants_hold(&self) -> bool {
        let tokens_in_range =
            self.current_tokens >= 0.0 && self.current_tokens <= self.capacity();
        let block_consistent = self.is_blocked == self.blocked_until.is_some();
        tokens_in_range && block_consistent
    }
}
