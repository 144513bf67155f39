use crate::adaptive::DynamicConfig;
use crate::audit::{EventRecorder, RateLimitEvent};
use crate::clock::Clock;
use crate::config::GuardConfig;
use crate::error::{LimitError, RecordKind};
use crate::rate_limit::bucket::{BucketId, BucketSpec, RateLimitBucket};
use crate::rate_limit::{CheckOutcome, CheckReason, RateLimiter};
use crate::store::{retry_on_conflict, Attempt, BucketStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// A store-backed token bucket rate limiter.
///
/// Each check reads the bucket, refills it for the time elapsed since the
/// last write, and spends `cost` tokens through a conditional write on the
/// bucket version. Losing the race re-reads and recomputes, so two callers
/// can never both spend the last token.
pub struct TokenBucketLimiter<S> {
    store: Arc<S>,
    recorder: Arc<dyn EventRecorder>,
    clock: Arc<dyn Clock>,
    config: DynamicConfig<GuardConfig>,
}

impl<S> Clone for TokenBucketLimiter<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            recorder: self.recorder.clone(),
            clock: self.clock.clone(),
            config: self.config.clone(),
        }
    }
}

impl<S> std::fmt::Debug for TokenBucketLimiter<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenBucketLimiter").field("clock", &self.clock).finish_non_exhaustive()
    }
}

// What a single attempt decided.
enum Verdict {
    Admitted(RateLimitBucket),
    Blocked { bucket: RateLimitBucket, retry_after: Duration },
    Exhausted { bucket: RateLimitBucket, available: f64, retry_after: Option<Duration> },
}

impl<S> TokenBucketLimiter<S>
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

    /// Create a full bucket, or reconfigure the existing one keeping its tokens
    /// within the new limit.
    pub async fn configure_bucket(&self, spec: BucketSpec) -> Result<BucketId, LimitError> {
        spec.validate()?;
        let config = self.config.get();
        let id = spec.id();
        let target = id.to_string();
        let now = self.clock.now();

        let created = retry_on_conflict(&target, config.max_attempts(), || {
            let spec = &spec;
            let id = &id;
            async move {
                match self.store.get_bucket(id).await.map_err(LimitError::store)? {
                    None => {
                        let bucket = RateLimitBucket::new(spec, now);
                        let created =
                            self.store.create_bucket(bucket).await.map_err(LimitError::store)?;
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
                            .update_bucket(next, current.version)
                            .await
                            .map_err(LimitError::store)?;
                        Ok(if written { Attempt::Done(false) } else { Attempt::Conflict })
                    }
                }
            }
        })
        .await?;

        info!(
            target: "quotaguard::limiter",
            bucket = %id,
            limit = spec.requests_limit,
            window_secs = spec.window_seconds,
            strategy = %spec.strategy,
            created,
            "bucket configured"
        );
        Ok(id)
    }

    /// Spend `cost` tokens from bucket `id`.
    ///
    /// A missing bucket or an unreachable store is answered by the configured
    /// [`FailurePolicy`](crate::config::FailurePolicy); the outcome's reason
    /// says so. Only validation and event recording failures are returned as
    /// errors.
    pub async fn check(&self, id: &BucketId, cost: u32) -> Result<CheckOutcome, LimitError> {
        if cost == 0 {
            return Err(LimitError::validation("cost", "must be >= 1"));
        }
        let config = self.config.get();
        let now = self.clock.now();

        let verdict = match self.decide(id, cost, &config, now).await {
            Ok(verdict) => verdict,
            Err(err) if err.is_not_found() => {
                return Ok(degrade(id, &config, CheckReason::BucketMissing, &err));
            }
            Err(err) if err.is_store_unavailable() => {
                return Ok(degrade(id, &config, CheckReason::StoreUnavailable, &err));
            }
            Err(err) => return Err(err),
        };

        match verdict {
            Verdict::Admitted(bucket) => {
                debug!(target: "quotaguard::limiter", bucket = %id, cost, remaining = bucket.current_tokens, "admitted");
                Ok(CheckOutcome::admitted(bucket.tokens_remaining()))
            }
            Verdict::Blocked { bucket, retry_after } => {
                debug!(target: "quotaguard::limiter", bucket = %id, cost, "denied during cooldown");
                Ok(CheckOutcome::denied(bucket.tokens_remaining(), Some(retry_after), CheckReason::Blocked))
            }
            Verdict::Exhausted { bucket, available, retry_after } => {
                debug!(
                    target: "quotaguard::limiter",
                    bucket = %id,
                    cost,
                    available,
                    retry_after_ms = retry_after.map(|wait| u64::try_from(wait.as_millis()).unwrap_or(u64::MAX)),
                    "denied"
                );
                if config.record_exceeded_events {
                    let event = RateLimitEvent::rate_limit_exceeded(
                        id.to_string(),
                        bucket.requests_limit,
                        available,
                        f64::from(cost),
                        now,
                    );
                    self.recorder.record(event).await?;
                }
                let reason =
                    if retry_after.is_some() { CheckReason::Exhausted } else { CheckReason::CostExceedsLimit };
                Ok(CheckOutcome::denied(bucket.tokens_remaining(), retry_after, reason))
            }
        }
    }

    /// Current bucket record, without refilling it.
    pub async fn get_bucket(&self, id: &BucketId) -> Result<RateLimitBucket, LimitError> {
        self.load(id).await
    }

    async fn load(&self, id: &BucketId) -> Result<RateLimitBucket, LimitError> {
        self.store
            .get_bucket(id)
            .await
            .map_err(LimitError::store)?
            .ok_or_else(|| LimitError::NotFound { kind: RecordKind::Bucket, id: id.to_string() })
    }

    async fn decide(
        &self,
        id: &BucketId,
        cost: u32,
        config: &GuardConfig,
        now: DateTime<Utc>,
    ) -> Result<Verdict, LimitError> {
        let cost = f64::from(cost);
        let cooldown = config
            .cooldown()
            .map(chrono::Duration::from_std)
            .transpose()
            .map_err(|_| LimitError::validation("cooldown_secs", "out of range"))?;
        let target = id.to_string();

        retry_on_conflict(&target, config.max_attempts(), || async move {
            let current = self.load(id).await?;

            if let Some(until) = current.blocked_at(now) {
                let retry_after = (until - now).to_std().unwrap_or_default();
                return Ok(Attempt::Done(Verdict::Blocked { bucket: current, retry_after }));
            }

            let mut next = current.clone();
            if next.is_blocked {
                next.unblock();
            }
            let strategy = next.strategy;
            let available = strategy.refill(&mut next, now);

            let verdict = if available >= cost {
                next.current_tokens = (next.current_tokens - cost).max(0.0);
                next.requests_made = next.requests_made.saturating_add(1);
                Verdict::Admitted(next.clone())
            } else {
                // A cost above the limit is refused outright and never starts a cooldown.
                let mut retry_after = strategy.retry_after(&next, cost, available, now);
                if let (Some(wait), Some(cooldown)) = (retry_after, cooldown) {
                    let until = now
                        .checked_add_signed(cooldown)
                        .ok_or_else(|| LimitError::validation("cooldown_secs", "out of range"))?;
                    next.block_until(until);
                    retry_after = Some(wait.max(cooldown.to_std().unwrap_or_default()));
                }
                if next == current {
                    return Ok(Attempt::Done(Verdict::Exhausted { bucket: next, available, retry_after }));
                }
                Verdict::Exhausted { bucket: next.clone(), available, retry_after }
            };

            next.version = current.version + 1;
            let written = self
                .store
                .update_bucket(next, current.version)
                .await
                .map_err(LimitError::store)?;
            Ok(if written { Attempt::Done(verdict) } else { Attempt::Conflict })
        })
        .await
    }
}

fn degrade(id: &BucketId, config: &GuardConfig, reason: CheckReason, err: &LimitError) -> CheckOutcome {
    let policy = config.failure_policy;
    warn!(
        target: "quotaguard::limiter",
        bucket = %id,
        policy = ?policy,
        reason = ?reason,
        error = %err,
        "check answered by failure policy"
    );
    CheckOutcome::degraded(policy.admits(), reason)
}

#[async_trait]
impl<S> RateLimiter for TokenBucketLimiter<S>
where
    S: BucketStore,
{
    async fn check(&self, id: &BucketId, cost: u32) -> Result<CheckOutcome, LimitError> {
        TokenBucketLimiter::check(self, id, cost).await
    }
}
