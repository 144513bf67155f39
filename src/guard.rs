//! The `QuotaGuard` facade.
//!
//! Bundles a [`TokenBucketLimiter`] and a [`QuotaTracker`] over one store, one
//! event recorder, one clock and one live [`GuardConfig`].
//!
//! ```rust
//! use quotaguard::{BucketSpec, QuotaGuard, Strategy};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let guard = QuotaGuard::builder().build()?;
//! let id = guard
//!     .configure_bucket(BucketSpec::new("api", "tenant-1", "requests_per_minute", 100, 60, Strategy::TokenBucket))
//!     .await?;
//! assert!(guard.check(&id, 1).await?.allowed);
//! # Ok(())
//! # }
//! ```

use crate::adaptive::DynamicConfig;
use crate::audit::{EventFilter, EventRecorder, MemoryEventRecorder, RateLimitEvent, TracingRecorder};
use crate::clock::{Clock, SystemClock};
use crate::config::{ConfigError, GuardConfig};
use crate::error::LimitError;
use crate::quota::{ConsumeOutcome, QuotaId, QuotaLimit, QuotaSpec, QuotaTracker, RenewOutcome};
use crate::rate_limit::{BucketId, BucketSpec, CheckOutcome, RateLimitBucket, RateLimiter, TokenBucketLimiter};
use crate::store::{BucketStore, InMemoryStore};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// Entry point for rate limiting and quota accounting.
pub struct QuotaGuard<S> {
    limiter: TokenBucketLimiter<S>,
    quotas: QuotaTracker<S>,
    recorder: Arc<dyn EventRecorder>,
    config: DynamicConfig<GuardConfig>,
}

impl<S> Clone for QuotaGuard<S> {
    fn clone(&self) -> Self {
        Self {
            limiter: self.limiter.clone(),
            quotas: self.quotas.clone(),
            recorder: self.recorder.clone(),
            config: self.config.clone(),
        }
    }
}

impl<S> std::fmt::Debug for QuotaGuard<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuotaGuard").field("limiter", &self.limiter).finish_non_exhaustive()
    }
}

impl QuotaGuard<InMemoryStore> {
    /// Builder over an in-memory store, the system clock and a tracing
    /// in-memory recorder. Swap any of them before `build`.
    pub fn builder() -> QuotaGuardBuilder<InMemoryStore> {
        QuotaGuardBuilder::new()
    }
}

impl<S> QuotaGuard<S>
where
    S: BucketStore,
{
    pub async fn configure_bucket(&self, spec: BucketSpec) -> Result<BucketId, LimitError> {
        self.limiter.configure_bucket(spec).await
    }

    pub async fn check(&self, id: &BucketId, cost: u32) -> Result<CheckOutcome, LimitError> {
        self.limiter.check(id, cost).await
    }

    pub async fn get_bucket(&self, id: &BucketId) -> Result<RateLimitBucket, LimitError> {
        self.limiter.get_bucket(id).await
    }

    pub async fn configure_quota(&self, spec: QuotaSpec) -> Result<QuotaId, LimitError> {
        self.quotas.configure_quota(spec).await
    }

    pub async fn consume(&self, id: &QuotaId, delta: i64) -> Result<ConsumeOutcome, LimitError> {
        self.quotas.consume(id, delta).await
    }

    /// Called by the external renewal scheduler.
    pub async fn renew(&self, id: &QuotaId) -> Result<RenewOutcome, LimitError> {
        self.quotas.renew(id).await
    }

    pub async fn get_quota(&self, id: &QuotaId) -> Result<QuotaLimit, LimitError> {
        self.quotas.get_quota(id).await
    }

    /// Recorded events matching `filter`, in append order.
    pub async fn list_events(&self, filter: &EventFilter) -> Result<Vec<RateLimitEvent>, LimitError> {
        Ok(self.recorder.list(filter).await?)
    }

    /// Snapshot of the live configuration.
    pub fn config(&self) -> Arc<GuardConfig> {
        self.config.get()
    }

    /// Change the live configuration. The result is validated like at
    /// `build`; a rejected change leaves the current settings in place.
    /// Updates apply to the next call.
    pub fn update_config<F>(&self, mut f: F) -> Result<(), ConfigError>
    where
        F: FnMut(&GuardConfig) -> GuardConfig,
    {
        self.config.try_update(|current| {
            let next = f(current);
            next.validate()?;
            Ok(next)
        })?;
        info!(target: "quotaguard::config", "configuration updated");
        Ok(())
    }

    pub fn limiter(&self) -> &TokenBucketLimiter<S> {
        &self.limiter
    }

    pub fn quotas(&self) -> &QuotaTracker<S> {
        &self.quotas
    }
}

#[async_trait]
impl<S> RateLimiter for QuotaGuard<S>
where
    S: BucketStore,
{
    async fn check(&self, id: &BucketId, cost: u32) -> Result<CheckOutcome, LimitError> {
        self.limiter.check(id, cost).await
    }
}

/// Builder for [`QuotaGuard`].
pub struct QuotaGuardBuilder<S> {
    store: Arc<S>,
    recorder: Option<Arc<dyn EventRecorder>>,
    clock: Arc<dyn Clock>,
    config: GuardConfig,
}

impl QuotaGuardBuilder<InMemoryStore> {
    fn new() -> Self {
        Self {
            store: Arc::new(InMemoryStore::new()),
            recorder: None,
            clock: Arc::new(SystemClock),
            config: GuardConfig::default(),
        }
    }
}

impl<S> QuotaGuardBuilder<S>
where
    S: BucketStore,
{
    /// Use `store` for bucket and quota records.
    pub fn store<T>(self, store: Arc<T>) -> QuotaGuardBuilder<T>
    where
        T: BucketStore,
    {
        QuotaGuardBuilder { store, recorder: self.recorder, clock: self.clock, config: self.config }
    }

    pub fn recorder<R>(mut self, recorder: R) -> Self
    where
        R: EventRecorder + 'static,
    {
        self.recorder = Some(Arc::new(recorder));
        self
    }

    pub fn clock<C>(mut self, clock: C) -> Self
    where
        C: Clock + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    pub fn config(mut self, config: GuardConfig) -> Self {
        self.config = config;
        self
    }

    /// Validate the configuration and assemble the guard.
    pub fn build(self) -> Result<QuotaGuard<S>, ConfigError> {
        self.config.validate()?;
        let recorder: Arc<dyn EventRecorder> = match self.recorder {
            Some(recorder) => recorder,
            None => Arc::new(TracingRecorder::new(MemoryEventRecorder::new())),
        };
        let config = DynamicConfig::new(self.config);
        let limiter =
            TokenBucketLimiter::new(self.store.clone(), recorder.clone(), self.clock.clone(), config.clone());
        let quotas = QuotaTracker::new(self.store, recorder.clone(), self.clock, config.clone());
        Ok(QuotaGuard { limiter, quotas, recorder, config })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::EventType;
    use crate::clock::ManualClock;
    use crate::config::FailurePolicy;
    use crate::quota::{QuotaStatus, RenewalPeriod, SubjectType};
    use crate::rate_limit::{CheckReason, Strategy};
    use chrono::{TimeZone, Utc};

    fn guard() -> QuotaGuard<InMemoryStore> {
        QuotaGuard::builder()
            .clock(ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()))
            .recorder(MemoryEventRecorder::new())
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn facade_routes_to_limiter_and_tracker() {
        let guard = guard();
        let bucket = guard
            .configure_bucket(BucketSpec::new("api", "t1", "rpm", 1, 60, Strategy::TokenBucket))
            .await
            .unwrap();
        assert!(guard.check(&bucket, 1).await.unwrap().allowed);
        assert!(!guard.check(&bucket, 1).await.unwrap().allowed);

        let quota = guard
            .configure_quota(QuotaSpec::new("calls", "t1", SubjectType::Tenant, "api_calls", 10, "calls", RenewalPeriod::Daily))
            .await
            .unwrap();
        let outcome = guard.consume(&quota, 10).await.unwrap();
        assert_eq!(outcome.status, QuotaStatus::Exceeded);

        let all = guard.list_events(&EventFilter::new()).await.unwrap();
        let kinds: Vec<_> = all.iter().map(|e| e.event_type).collect();
        assert_eq!(kinds, vec![EventType::RateLimitExceeded, EventType::QuotaExceeded]);
    }

    #[tokio::test]
    async fn config_updates_apply_live() {
        let guard = guard();
        let ghost = BucketId::new("api", "ghost");
        assert!(!guard.check(&ghost, 1).await.unwrap().allowed);

        guard.update_config(|c| GuardConfig { failure_policy: FailurePolicy::Open, ..c.clone() }).unwrap();
        let outcome = guard.check(&ghost, 1).await.unwrap();
        assert!(outcome.allowed);
        assert_eq!(outcome.reason, CheckReason::BucketMissing);
    }

    #[tokio::test]
    async fn invalid_live_update_is_rejected() {
        let guard = guard();
        let err = guard
            .update_config(|c| GuardConfig { default_warning_threshold_percent: 0.0, ..c.clone() })
            .unwrap_err();
        assert!(err.to_string().contains("default_warning_threshold_percent"));
        assert_eq!(guard.config().default_warning_threshold_percent, 80.0);

        // quotas provisioned afterwards still start active
        let quota = guard
            .configure_quota(QuotaSpec::new("calls", "t1", SubjectType::Tenant, "api_calls", 10, "calls", RenewalPeriod::Daily))
            .await
            .unwrap();
        assert_eq!(guard.get_quota(&quota).await.unwrap().status, QuotaStatus::Active);
    }

    #[test]
    fn invalid_config_is_rejected_at_build() {
        let config = GuardConfig { default_warning_threshold_percent: 0.0, ..GuardConfig::default() };
        assert!(QuotaGuard::builder().config(config).build().is_err());
    }

    #[tokio::test]
    async fn custom_store_is_shared() {
        let store = Arc::new(InMemoryStore::new());
        let guard = QuotaGuard::builder().store(store.clone()).build().unwrap();
        guard
            .configure_bucket(BucketSpec::new("api", "t1", "rpm", 5, 60, Strategy::FixedWindow))
            .await
            .unwrap();
        assert_eq!(store.bucket_count(), 1);
    }
}
