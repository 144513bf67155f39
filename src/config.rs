//! Guard configuration.
//!
//! Loaded from defaults, serde (any format the embedding service uses), or the
//! `QUOTAGUARD_*` environment variables.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Default number of retries after a lost conditional write.
pub const DEFAULT_MAX_CONFLICT_RETRIES: usize = 3;
/// Default warning threshold for quotas provisioned without one.
pub const DEFAULT_WARNING_THRESHOLD_PERCENT: f64 = 80.0;

/// What `check` answers when it cannot consult a bucket.
///
/// Applies both when the bucket was never configured and when the store is
/// unreachable. There is no implicit default at call sites: the choice lives
/// here and is reported back on every degraded outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Permit the request anyway.
    Open,
    /// Deny the request.
    Closed,
}

impl FailurePolicy {
    /// Whether a degraded check is admitted under this policy.
    pub fn admits(self) -> bool {
        matches!(self, FailurePolicy::Open)
    }
}

impl FromStr for FailurePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "open" | "fail-open" | "fail_open" => Ok(FailurePolicy::Open),
            "closed" | "fail-closed" | "fail_closed" => Ok(FailurePolicy::Closed),
            other => Err(ConfigError::Invalid {
                key: "failure_policy",
                value: other.to_string(),
                reason: "expected `open` or `closed`".into(),
            }),
        }
    }
}

/// Errors produced while loading or validating configuration.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("invalid value `{value}` for {key}: {reason}")]
    Invalid { key: &'static str, value: String, reason: String },
}

/// Settings shared by the limiter and the quota tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    /// Decision for checks against missing buckets or an unreachable store.
    pub failure_policy: FailurePolicy,

    /// Retries after a lost conditional write before giving up.
    pub max_conflict_retries: usize,

    /// Block a bucket for this long after it denies a request.
    pub cooldown_secs: Option<u64>,

    /// Record `rate_limit_exceeded` events on denial.
    pub record_exceeded_events: bool,

    /// Warning threshold applied to quotas configured without one.
    pub default_warning_threshold_percent: f64,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            failure_policy: FailurePolicy::Closed,
            max_conflict_retries: DEFAULT_MAX_CONFLICT_RETRIES,
            cooldown_secs: None,
            record_exceeded_events: true,
            default_warning_threshold_percent: DEFAULT_WARNING_THRESHOLD_PERCENT,
        }
    }
}

impl GuardConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from environment variables on top of the defaults.
    ///
    /// Unset variables keep their default; unparsable ones are rejected rather
    /// than ignored.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(val) = lookup("QUOTAGUARD_FAILURE_POLICY") {
            config.failure_policy = val.parse()?;
        }

        if let Some(val) = lookup("QUOTAGUARD_MAX_CONFLICT_RETRIES") {
            config.max_conflict_retries = parse_number("max_conflict_retries", &val)?;
        }

        if let Some(val) = lookup("QUOTAGUARD_COOLDOWN_SECS") {
            let secs: u64 = parse_number("cooldown_secs", &val)?;
            config.cooldown_secs = (secs > 0).then_some(secs);
        }

        if let Some(val) = lookup("QUOTAGUARD_RECORD_EXCEEDED_EVENTS") {
            config.record_exceeded_events = val.trim().parse().map_err(|_| ConfigError::Invalid {
                key: "record_exceeded_events",
                value: val.clone(),
                reason: "expected `true` or `false`".into(),
            })?;
        }

        if let Some(val) = lookup("QUOTAGUARD_WARNING_THRESHOLD_PERCENT") {
            config.default_warning_threshold_percent =
                parse_number("default_warning_threshold_percent", &val)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot honour.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let threshold = self.default_warning_threshold_percent;
        if !(threshold > 0.0 && threshold <= 100.0) {
            return Err(ConfigError::Invalid {
                key: "default_warning_threshold_percent",
                value: threshold.to_string(),
                reason: "must be within (0, 100]".into(),
            });
        }
        Ok(())
    }

    /// Cooldown applied after a denial, if any.
    pub fn cooldown(&self) -> Option<Duration> {
        self.cooldown_secs.map(Duration::from_secs)
    }

    /// Total conditional-write attempts per operation.
    pub fn max_attempts(&self) -> usize {
        self.max_conflict_retries.saturating_add(1)
    }
}

fn parse_number<T: FromStr>(key: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::Invalid {
        key,
        value: raw.to_string(),
        reason: "not a number".into(),
    })
}
