//! Long-horizon usage quotas.
//!
//! A quota accumulates usage against a limit for one subject (tenant, user,
//! API key or IP) and resets on a calendar. Status is derived from usage on
//! every write:
//!
//! - `active` below the warning threshold,
//! - `warning` from the threshold up to 100%,
//! - `exceeded` at 100% and above.
//!
//! [`QuotaTracker`] records one event each time a quota escalates; the event
//! names the tier it ended in even when a single delta skipped a tier.

use chrono::{DateTime, Utc};

pub mod limit;
pub mod tracker;

pub use limit::{QuotaId, QuotaLimit, QuotaSpec, QuotaStatus, RenewalPeriod, SubjectType};
pub use tracker::QuotaTracker;

/// Result of `consume`.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumeOutcome {
    pub usage: u64,
    pub usage_percentage: f64,
    pub status: QuotaStatus,
    /// True when the quota is a hard limit and is exceeded. Callers should refuse further work.
    pub blocked: bool,
}

impl ConsumeOutcome {
    pub(crate) fn from_quota(quota: &QuotaLimit) -> Self {
        Self {
            usage: quota.usage,
            usage_percentage: quota.usage_percentage,
            status: quota.status,
            blocked: quota.hard_limit && quota.status == QuotaStatus::Exceeded,
        }
    }
}

/// Result of `renew`.
#[derive(Debug, Clone, PartialEq)]
pub struct RenewOutcome {
    pub usage: u64,
    pub status: QuotaStatus,
    /// Next boundary after this call.
    pub renewal_date: DateTime<Utc>,
    /// False when the quota was not yet due and nothing changed.
    pub renewed: bool,
}

impl RenewOutcome {
    pub(crate) fn from_quota(quota: &QuotaLimit, renewed: bool) -> Self {
        Self { usage: quota.usage, status: quota.status, renewal_date: quota.renewal_date, renewed }
    }
}
