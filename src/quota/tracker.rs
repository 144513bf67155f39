use crate::adaptive::DynamicConfig;
use crate::audit::{EventRecorder, RateLimitEvent};
use crate::clock::Clock;
use crate::config::GuardConfig;
use crate::error::{LimitError, RecordKind};
use crate::quota::limit::{QuotaId, QuotaLimit, QuotaSpec, QuotaStatus};
use crate::quota::{ConsumeOutcome, RenewOutcome};
use crate::store::{retry_on_conflict, Attempt, BucketStore};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info};

/// Store-backed quota accounting.
///
/// Every mutation is read, compute, conditional write on `version`; a lost
/// race re-reads and recomputes, so concurrent `consume` calls never lose
/// updates and a stale `consume` can't overwrite a `renew`.
pub struct QuotaTracker<S> {
    store: Arc<S>,
    recorder: Arc<dyn EventRecorder>,
    clock: Arc<dyn Clock>,
    config: DynamicConfig<GuardConfig>,
}

impl<S> Clone for QuotaTracker<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            recorder: self.recorder.clone(),
            clock: self.clock.clone(),
            config: self.config.clone(),
        }
    }
}

impl<S> std::fmt::Debug for QuotaTracker<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuotaTracker").field("clock", &self.clock).finish_non_exhaustive()
    }
}

impl<S> QuotaTracker<S>
where
    S: BucketStore,
{
    pub fn new(
        store: Arc<S>,
        recorder: Arc<dyn EventRecorder>,
        clock: Arc<dyn Clock>,
        config: DynamicConfig<GuardConfig>,
    ) -> Self {
        Self { store, recorder, clock, config }
    }

    #[cfg(test)]
    pub(crate) fn config(&self) -> &DynamicConfig<GuardConfig> {
        &self.config
    }

    /// Provision a quota, or reconfigure the one already held for the same scope.
    ///
    /// Reconfiguring keeps usage and re-derives status; it records no events.
    pub async fn configure_quota(&self, spec: QuotaSpec) -> Result<QuotaId, LimitError> {
        spec.validate()?;
        let config = self.config.get();
        let id = spec.id();
        let now = self.clock.now();

        let created = retry_on_conflict(id.as_str(), config.max_attempts(), || {
            let spec = &spec;
            let id = &id;
            let config = &config;
            async move {
                match self.store.get_quota(id).await.map_err(LimitError::store)? {
                    None => {
                        let quota =
                            QuotaLimit::provision(spec, config.default_warning_threshold_percent, now)?;
                        let created =
                            self.store.create_quota(quota).await.map_err(LimitError::store)?;
                        Ok(if created { Attempt::Done(true) } else { Attempt::Conflict })
                    }
                    Some(current) => {
                        let mut next = current.clone();
                        next.reconfigure(spec);
                        if next == current {
                            return Ok(Attempt::Done(false));
                        }
                        next.version = current.version + 1;
                        let written = self
                            .store
                            .update_quota(next, current.version)
                            .await
                            .map_err(LimitError::store)?;
                        Ok(if written { Attempt::Done(false) } else { Attempt::Conflict })
                    }
                }
            }
        })
        .await?;

        info!(
            target: "quotaguard::quota",
            quota = %id,
            limit = spec.limit,
            period = %spec.renewal_period,
            created,
            "quota configured"
        );
        Ok(id)
    }

    /// Apply a usage delta. Negative deltas refund; usage never drops below zero.
    ///
    /// Escalating into `warning` or `exceeded` records one event for the final
    /// tier. Falling back to a lower tier records nothing.
    pub async fn consume(&self, id: &QuotaId, delta: i64) -> Result<ConsumeOutcome, LimitError> {
        let config = self.config.get();

        let (before, after) = retry_on_conflict(id.as_str(), config.max_attempts(), || async move {
            let current = self.load(id).await?;
            let mut next = current.clone();
            next.set_usage(current.usage_after(delta));
            if next == current {
                return Ok(Attempt::Done((current.status, next)));
            }
            next.version = current.version + 1;
            let written = self
                .store
                .update_quota(next.clone(), current.version)
                .await
                .map_err(LimitError::store)?;
            Ok(if written { Attempt::Done((current.status, next)) } else { Attempt::Conflict })
        })
        .await?;

        debug!(
            target: "quotaguard::quota",
            quota = %id,
            delta,
            usage = after.usage,
            status = %after.status,
            "usage applied"
        );

        if before.escalates_to(after.status) {
            self.record_escalation(&after, self.clock.now()).await?;
        }
        Ok(ConsumeOutcome::from_quota(&after))
    }

    /// Reset usage if the renewal date has passed. A second call at the same
    /// instant is a no-op.
    pub async fn renew(&self, id: &QuotaId) -> Result<RenewOutcome, LimitError> {
        let config = self.config.get();
        let now = self.clock.now();

        let outcome = retry_on_conflict(id.as_str(), config.max_attempts(), || async move {
            let current = self.load(id).await?;
            if !current.is_due(now) {
                return Ok(Attempt::Done(RenewOutcome::from_quota(&current, false)));
            }
            let mut next = current.clone();
            next.roll_over(now)?;
            next.version = current.version + 1;
            let written = self
                .store
                .update_quota(next.clone(), current.version)
                .await
                .map_err(LimitError::store)?;
            Ok(if written {
                Attempt::Done(RenewOutcome::from_quota(&next, true))
            } else {
                Attempt::Conflict
            })
        })
        .await?;

        if outcome.renewed {
            info!(
                target: "quotaguard::quota",
                quota = %id,
                next_renewal = %outcome.renewal_date,
                "quota renewed"
            );
        }
        Ok(outcome)
    }

    /// Current quota record.
    pub async fn get_quota(&self, id: &QuotaId) -> Result<QuotaLimit, LimitError> {
        self.load(id).await
    }

    async fn load(&self, id: &QuotaId) -> Result<QuotaLimit, LimitError> {
        self.store
            .get_quota(id)
            .await
            .map_err(LimitError::store)?
            .ok_or_else(|| LimitError::NotFound { kind: RecordKind::Quota, id: id.to_string() })
    }

    async fn record_escalation(&self, quota: &QuotaLimit, now: DateTime<Utc>) -> Result<(), LimitError> {
        let event = match quota.status {
            QuotaStatus::Warning => {
                RateLimitEvent::warning_threshold(quota.id.as_str(), quota.warning_level(), quota.usage, now)
            }
            QuotaStatus::Exceeded => {
                RateLimitEvent::quota_exceeded(quota.id.as_str(), quota.limit, quota.usage, quota.hard_limit, now)
            }
            QuotaStatus::Active => return Ok(()),
        };
        info!(
            target: "quotaguard::quota",
            quota = %quota.id,
            status = %quota.status,
            usage = quota.usage,
            limit = quota.limit,
            "quota escalated"
        );
        self.recorder.record(event).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{ActionTaken, EventFilter, EventType, MemoryEventRecorder, Severity};
    use crate::clock::ManualClock;
    use crate::quota::limit::{RenewalPeriod, SubjectType};
    use crate::store::InMemoryStore;
    use chrono::{Duration, TimeZone};

    struct Fixture {
        tracker: QuotaTracker<InMemoryStore>,
        store: Arc<InMemoryStore>,
        recorder: MemoryEventRecorder,
        clock: ManualClock,
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn fixture() -> Fixture {
        fixture_with(MemoryEventRecorder::new())
    }

    fn fixture_with(recorder: MemoryEventRecorder) -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let clock = ManualClock::new(start());
        let tracker = QuotaTracker::new(
            store.clone(),
            Arc::new(recorder.clone()),
            Arc::new(clock.clone()),
            DynamicConfig::new(GuardConfig::default()),
        );
        Fixture { tracker, store, recorder, clock }
    }

    fn spec() -> QuotaSpec {
        QuotaSpec::new("api calls", "tenant-1", SubjectType::Tenant, "api_calls", 100, "calls", RenewalPeriod::Monthly)
    }

    #[tokio::test]
    async fn threshold_sequence_emits_one_event_per_tier() {
        let f = fixture();
        let id = f.tracker.configure_quota(spec()).await.unwrap();

        let mut statuses = Vec::new();
        for delta in [30, 30, 30, 10] {
            statuses.push(f.tracker.consume(&id, delta).await.unwrap().status);
        }
        assert_eq!(
            statuses,
            vec![QuotaStatus::Active, QuotaStatus::Active, QuotaStatus::Warning, QuotaStatus::Exceeded]
        );

        let events = f.recorder.events().await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, EventType::WarningThreshold);
        assert_eq!(events[0].limit_value, 80.0);
        assert_eq!(events[0].exceeded_by, 10.0);
        assert_eq!(events[1].event_type, EventType::QuotaExceeded);
        assert_eq!(events[1].severity, Severity::Critical);
        assert_eq!(events[1].action_taken, ActionTaken::Notified);
        assert_eq!(events[1].reference, "tenant:tenant-1:api_calls");
    }

    #[tokio::test]
    async fn skipping_a_tier_records_only_the_final_one() {
        let f = fixture();
        let id = f.tracker.configure_quota(spec().hard_limit(true)).await.unwrap();

        let outcome = f.tracker.consume(&id, 150).await.unwrap();
        assert_eq!(outcome.status, QuotaStatus::Exceeded);
        assert_eq!(outcome.usage_percentage, 150.0);
        assert!(outcome.blocked);

        let events = f.recorder.events().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::QuotaExceeded);
        assert_eq!(events[0].action_taken, ActionTaken::Blocked);
        assert_eq!(events[0].exceeded_by, 50.0);
    }

    #[tokio::test]
    async fn refunds_de_escalate_silently_and_clamp_at_zero() {
        let f = fixture();
        let id = f.tracker.configure_quota(spec()).await.unwrap();

        f.tracker.consume(&id, 85).await.unwrap();
        let refunded = f.tracker.consume(&id, -200).await.unwrap();
        assert_eq!(refunded.usage, 0);
        assert_eq!(refunded.status, QuotaStatus::Active);
        assert_eq!(f.recorder.len().await, 1);

        // crossing again is a new escalation
        f.tracker.consume(&id, 90).await.unwrap();
        let warnings = f
            .recorder
            .list(&EventFilter::new().event_type(EventType::WarningThreshold))
            .await
            .unwrap();
        assert_eq!(warnings.len(), 2);
    }

    #[tokio::test]
    async fn consume_on_unknown_quota_is_not_found() {
        let f = fixture();
        let id = QuotaId::for_scope(SubjectType::User, "nobody", "api_calls");
        let err = f.tracker.consume(&id, 1).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(f.recorder.is_empty().await);
    }

    #[tokio::test]
    async fn store_outage_propagates() {
        let f = fixture();
        let id = f.tracker.configure_quota(spec()).await.unwrap();
        f.store.set_available(false);
        let err = f.tracker.consume(&id, 1).await.unwrap_err();
        assert!(err.is_store_unavailable());
    }

    #[tokio::test]
    async fn recorder_failure_surfaces_after_write() {
        let f = fixture_with(MemoryEventRecorder::bounded(0));
        let id = f.tracker.configure_quota(spec()).await.unwrap();

        let err = f.tracker.consume(&id, 100).await.unwrap_err();
        assert!(matches!(err, LimitError::EventRecording(_)));
        assert_eq!(f.tracker.get_quota(&id).await.unwrap().usage, 100);
    }

    #[tokio::test]
    async fn renew_is_idempotent_at_one_instant() {
        let f = fixture();
        let id = f.tracker.configure_quota(spec()).await.unwrap();
        f.tracker.consume(&id, 95).await.unwrap();

        let not_due = f.tracker.renew(&id).await.unwrap();
        assert!(!not_due.renewed);
        assert_eq!(not_due.usage, 95);

        f.clock.set(Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap());
        let first = f.tracker.renew(&id).await.unwrap();
        let second = f.tracker.renew(&id).await.unwrap();

        assert!(first.renewed);
        assert_eq!(first.usage, 0);
        assert_eq!(first.status, QuotaStatus::Active);
        assert_eq!(first.renewal_date, Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap());
        assert!(!second.renewed);
        assert_eq!(second.renewal_date, first.renewal_date);
        // renewal never records events
        assert_eq!(f.recorder.len().await, 1);
    }

    #[tokio::test]
    async fn reconfigure_keeps_usage_and_rederives_status() {
        let f = fixture();
        let id = f.tracker.configure_quota(spec()).await.unwrap();
        f.tracker.consume(&id, 60).await.unwrap();

        let mut smaller = spec().warning_threshold_percent(50.0);
        smaller.limit = 80;
        let same_id = f.tracker.configure_quota(smaller).await.unwrap();
        assert_eq!(same_id, id);

        let quota = f.tracker.get_quota(&id).await.unwrap();
        assert_eq!(quota.usage, 60);
        assert_eq!(quota.usage_percentage, 75.0);
        assert_eq!(quota.status, QuotaStatus::Warning);
        assert_eq!(quota.version, 3);
        assert!(quota.invariants_hold());
        assert_eq!(f.store.quota_count(), 1);
    }

    #[tokio::test]
    async fn invalid_quota_writes_nothing() {
        let f = fixture();
        let err = f.tracker.configure_quota(spec().warning_threshold_percent(120.0)).await.unwrap_err();
        assert!(err.is_validation());
        assert_eq!(f.store.quota_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_consumes_never_lose_updates() {
        let f = fixture();
        f.tracker.config().update(|c| GuardConfig { max_conflict_retries: 64, ..c.clone() });
        let id = f.tracker.configure_quota(spec()).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..20 {
            let tracker = f.tracker.clone();
            let id = id.clone();
            handles.push(tokio::spawn(async move { tracker.consume(&id, 3).await }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }

        let quota = f.tracker.get_quota(&id).await.unwrap();
        assert_eq!(quota.usage, 60);
        assert_eq!(quota.version, 21);
    }

    #[tokio::test]
    async fn late_scheduler_skips_missed_periods() {
        let f = fixture();
        let id = f.tracker.configure_quota(spec()).await.unwrap();
        f.clock.advance(Duration::days(75));
        let outcome = f.tracker.renew(&id).await.unwrap();
        assert!(outcome.renewed);
        assert_eq!(outcome.renewal_date, Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap());
    }
}
