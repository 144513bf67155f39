//! Quota records, status derivation and renewal calendar.

use crate::error::LimitError;
use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of subject a quota is scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectType {
    Tenant,
    User,
    ApiKey,
    IpAddress,
}

impl fmt::Display for SubjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubjectType::Tenant => write!(f, "tenant"),
            SubjectType::User => write!(f, "user"),
            SubjectType::ApiKey => write!(f, "api_key"),
            SubjectType::IpAddress => write!(f, "ip_address"),
        }
    }
}

/// Quota status. Ordered by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaStatus {
    Active,
    Warning,
    Exceeded,
}

impl QuotaStatus {
    /// Status as a pure function of usage against the limit.
    ///
    /// Compared on the unrounded ratio: a quota one unit short of its limit is
    /// never `Exceeded`, whatever its displayed percentage.
    pub fn for_usage(usage: u64, limit: u64, warning_threshold_percent: f64) -> Self {
        if usage >= limit {
            QuotaStatus::Exceeded
        } else if usage as f64 * 100.0 >= warning_threshold_percent * limit as f64 {
            QuotaStatus::Warning
        } else {
            QuotaStatus::Active
        }
    }

    /// True when moving from `self` to `next` raises the severity.
    pub fn escalates_to(self, next: QuotaStatus) -> bool {
        next > self
    }
}

impl fmt::Display for QuotaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuotaStatus::Active => write!(f, "active"),
            QuotaStatus::Warning => write!(f, "warning"),
            QuotaStatus::Exceeded => write!(f, "exceeded"),
        }
    }
}

/// Calendar interval after which usage resets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenewalPeriod {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl RenewalPeriod {
    /// The `n`th renewal boundary counted from `anchor` (`n = 0` is the anchor itself).
    ///
    /// Month arithmetic is always taken from the anchor, so a quota anchored on
    /// the 31st renews on the last day of short months without drifting.
    pub fn nth(self, anchor: DateTime<Utc>, n: u32) -> Option<DateTime<Utc>> {
        match self {
            RenewalPeriod::Daily => anchor.checked_add_signed(Duration::days(i64::from(n))),
            RenewalPeriod::Weekly => anchor.checked_add_signed(Duration::weeks(i64::from(n))),
            RenewalPeriod::Monthly => anchor.checked_add_months(Months::new(n)),
            RenewalPeriod::Yearly => anchor.checked_add_months(Months::new(n.checked_mul(12)?)),
        }
    }
}

impl fmt::Display for RenewalPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenewalPeriod::Daily => write!(f, "daily"),
            RenewalPeriod::Weekly => write!(f, "weekly"),
            RenewalPeriod::Monthly => write!(f, "monthly"),
            RenewalPeriod::Yearly => write!(f, "yearly"),
        }
    }
}

/// Quota identity, unique per `(subject_type, subject_id, quota_type)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QuotaId(String);

impl QuotaId {
    pub fn for_scope(subject_type: SubjectType, subject_id: &str, quota_type: &str) -> Self {
        Self(format!("{subject_type}:{subject_id}:{quota_type}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QuotaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Parameters for `configure_quota`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaSpec {
    pub name: String,
    pub subject_id: String,
    pub subject_type: SubjectType,
    pub quota_type: String,
    pub limit: u64,
    pub unit: String,
    pub renewal_period: RenewalPeriod,
    #[serde(default)]
    pub warning_threshold_percent: Option<f64>,
    #[serde(default)]
    pub hard_limit: Option<bool>,
}

impl QuotaSpec {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        subject_id: impl Into<String>,
        subject_type: SubjectType,
        quota_type: impl Into<String>,
        limit: u64,
        unit: impl Into<String>,
        renewal_period: RenewalPeriod,
    ) -> Self {
        Self {
            name: name.into(),
            subject_id: subject_id.into(),
            subject_type,
            quota_type: quota_type.into(),
            limit,
            unit: unit.into(),
            renewal_period,
            warning_threshold_percent: None,
            hard_limit: None,
        }
    }

    pub fn warning_threshold_percent(mut self, percent: f64) -> Self {
        self.warning_threshold_percent = Some(percent);
        self
    }

    pub fn hard_limit(mut self, hard: bool) -> Self {
        self.hard_limit = Some(hard);
        self
    }

    pub fn id(&self) -> QuotaId {
        QuotaId::for_scope(self.subject_type, &self.subject_id, &self.quota_type)
    }

    pub(crate) fn validate(&self) -> Result<(), LimitError> {
        for (field, value) in [
            ("name", &self.name),
            ("subject_id", &self.subject_id),
            ("quota_type", &self.quota_type),
            ("unit", &self.unit),
        ] {
            if value.trim().is_empty() {
                return Err(LimitError::validation(field, "must not be empty"));
            }
        }
        if self.limit == 0 {
            return Err(LimitError::validation("limit", "must be > 0"));
        }
        if let Some(threshold) = self.warning_threshold_percent {
            validate_threshold(threshold)?;
        }
        Ok(())
    }
}

pub(crate) fn validate_threshold(threshold: f64) -> Result<(), LimitError> {
    if threshold > 0.0 && threshold <= 100.0 {
        Ok(())
    } else {
        Err(LimitError::validation("warning_threshold_percent", format!("{threshold} is outside (0, 100]")))
    }
}

/// `usage / limit * 100`, rounded to two decimals.
pub fn usage_percentage(usage: u64, limit: u64) -> f64 {
    if limit == 0 {
        return 0.0;
    }
    let raw = usage as f64 / limit as f64 * 100.0;
    (raw * 100.0).round() / 100.0
}

/// Versioned quota record as held by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaLimit {
    pub id: QuotaId,
    pub name: String,
    pub subject_id: String,
    pub subject_type: SubjectType,
    pub quota_type: String,
    pub limit: u64,
    pub unit: String,
    pub usage: u64,
    pub usage_percentage: f64,
    pub status: QuotaStatus,
    pub warning_threshold_percent: f64,
    pub hard_limit: bool,
    pub renewal_period: RenewalPeriod,
    /// Start of the renewal calendar.
    pub renewal_anchor: DateTime<Utc>,
    /// Index of the next boundary: `renewal_date == renewal_period.nth(renewal_anchor, renewals)`.
    pub renewals: u32,
    /// Next boundary at which usage resets.
    pub renewal_date: DateTime<Utc>,
    pub version: u64,
}

impl QuotaLimit {
    /// A fresh quota whose first renewal is one period after `now`.
    pub(crate) fn provision(
        spec: &QuotaSpec,
        default_threshold: f64,
        now: DateTime<Utc>,
    ) -> Result<Self, LimitError> {
        let first = spec
            .renewal_period
            .nth(now, 1)
            .ok_or_else(|| LimitError::validation("renewal_period", "renewal date out of range"))?;
        let mut quota = Self {
            id: spec.id(),
            name: spec.name.clone(),
            subject_id: spec.subject_id.clone(),
            subject_type: spec.subject_type,
            quota_type: spec.quota_type.clone(),
            limit: spec.limit,
            unit: spec.unit.clone(),
            usage: 0,
            usage_percentage: 0.0,
            status: QuotaStatus::Active,
            warning_threshold_percent: spec.warning_threshold_percent.unwrap_or(default_threshold),
            hard_limit: spec.hard_limit.unwrap_or(false),
            renewal_period: spec.renewal_period,
            renewal_anchor: now,
            renewals: 1,
            renewal_date: first,
            version: 1,
        };
        quota.set_usage(0);
        Ok(quota)
    }

    /// Apply new limits without touching usage. A changed period starts its
    /// calendar at the pending renewal date.
    pub(crate) fn reconfigure(&mut self, spec: &QuotaSpec) {
        self.name = spec.name.clone();
        self.limit = spec.limit;
        self.unit = spec.unit.clone();
        if let Some(threshold) = spec.warning_threshold_percent {
            self.warning_threshold_percent = threshold;
        }
        if let Some(hard) = spec.hard_limit {
            self.hard_limit = hard;
        }
        if spec.renewal_period != self.renewal_period {
            self.renewal_period = spec.renewal_period;
            self.renewal_anchor = self.renewal_date;
            self.renewals = 0;
        }
        self.set_usage(self.usage);
    }

    /// Set usage and re-derive percentage and status.
    pub(crate) fn set_usage(&mut self, usage: u64) {
        self.usage = usage;
        self.usage_percentage = usage_percentage(usage, self.limit);
        self.status = QuotaStatus::for_usage(usage, self.limit, self.warning_threshold_percent);
    }

    /// Usage after applying a signed delta, clamped at zero.
    pub(crate) fn usage_after(&self, delta: i64) -> u64 {
        let next = i128::from(self.usage) + i128::from(delta);
        u64::try_from(next.max(0)).unwrap_or(u64::MAX)
    }

    /// Usage level at which the warning tier starts.
    pub fn warning_level(&self) -> f64 {
        self.limit as f64 * self.warning_threshold_percent / 100.0
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        now >= self.renewal_date
    }

    /// Reset usage and move `renewal_date` to the first boundary after `now`.
    ///
    /// Normally that is exactly one period; a scheduler that fell behind skips
    /// the boundaries it missed instead of resetting once per missed period.
    pub(crate) fn roll_over(&mut self, now: DateTime<Utc>) -> Result<(), LimitError> {
        let mut renewals = self.renewals;
        let mut next = self.renewal_date;
        while next <= now {
            renewals = renewals.saturating_add(1);
            next = self
                .renewal_period
                .nth(self.renewal_anchor, renewals)
                .ok_or_else(|| LimitError::validation("renewal_date", "renewal date out of range"))?;
        }
        self.renewals = renewals;
        self.renewal_date = next;
        self.set_usage(0);
        Ok(())
    }

    /// Check the record invariants.
    pub fn invariants_hold(&self) -> bool {
        let pct = usage_percentage(self.usage, self.limit);
        (self.usage_percentage - pct).abs() < 0.005
            && self.status == QuotaStatus::for_usage(self.usage, self.limit, self.warning_threshold_percent)
    }
}
