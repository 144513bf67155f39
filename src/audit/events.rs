use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifier assigned to every recorded event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What kind of limit was approached or crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// A bucket denied a request.
    RateLimitExceeded,
    /// A quota reached 100% of its limit.
    QuotaExceeded,
    /// A quota crossed its warning threshold.
    WarningThreshold,
}

/// What the core did about it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionTaken {
    Blocked,
    Notified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// Immutable audit record. Built once, appended once, never updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitEvent {
    pub event_id: EventId,
    pub event_type: EventType,
    /// Bucket id (`name/identifier`) or quota id the event is about.
    pub reference: String,
    pub limit_value: f64,
    pub current_value: f64,
    pub exceeded_by: f64,
    pub action_taken: ActionTaken,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
}

impl RateLimitEvent {
    /// A bucket could not cover `cost`.
    pub fn rate_limit_exceeded(
        reference: impl Into<String>,
        requests_limit: u64,
        available: f64,
        cost: f64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id: EventId::new(),
            event_type: EventType::RateLimitExceeded,
            reference: reference.into(),
            limit_value: requests_limit as f64,
            current_value: available,
            exceeded_by: (cost - available).max(0.0),
            action_taken: ActionTaken::Blocked,
            severity: Severity::Warning,
            timestamp,
        }
    }

    /// A quota crossed its warning threshold (`threshold_level` in quota units).
    pub fn warning_threshold(
        reference: impl Into<String>,
        threshold_level: f64,
        usage: u64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let usage = usage as f64;
        Self {
            event_id: EventId::new(),
            event_type: EventType::WarningThreshold,
            reference: reference.into(),
            limit_value: threshold_level,
            current_value: usage,
            exceeded_by: (usage - threshold_level).max(0.0),
            action_taken: ActionTaken::Notified,
            severity: Severity::Warning,
            timestamp,
        }
    }

    /// A quota reached its limit. Hard limits block, soft limits only notify.
    pub fn quota_exceeded(
        reference: impl Into<String>,
        limit: u64,
        usage: u64,
        hard_limit: bool,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id: EventId::new(),
            event_type: EventType::QuotaExceeded,
            reference: reference.into(),
            limit_value: limit as f64,
            current_value: usage as f64,
            exceeded_by: usage.saturating_sub(limit) as f64,
            action_taken: if hard_limit { ActionTaken::Blocked } else { ActionTaken::Notified },
            severity: Severity::Critical,
            timestamp,
        }
    }
}

/// Selection used by `list_events`. Empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventFilter {
    pub event_type: Option<EventType>,
    pub reference: Option<String>,
    pub min_severity: Option<Severity>,
    /// Inclusive lower bound.
    pub since: Option<DateTime<Utc>>,
    /// Exclusive upper bound.
    pub until: Option<DateTime<Utc>>,
    /// Keep at most this many, newest last.
    pub limit: Option<usize>,
}

impl EventFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn event_type(mut self, event_type: EventType) -> Self {
        self.event_type = Some(event_type);
        self
    }

    pub fn reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn min_severity(mut self, severity: Severity) -> Self {
        self.min_severity = Some(severity);
        self
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn until(mut self, until: DateTime<Utc>) -> Self {
        self.until = Some(until);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, event: &RateLimitEvent) -> bool {
        self.event_type.map_or(true, |t| t == event.event_type)
            && self.reference.as_deref().map_or(true, |r| r == event.reference)
            && self.min_severity.map_or(true, |s| event.severity >= s)
            && self.since.map_or(true, |s| event.timestamp >= s)
            && self.until.map_or(true, |u| event.timestamp < u)
    }

    /// Filter events given in append order, honouring `limit`.
    pub fn apply<'a, I>(&self, events: I) -> Vec<RateLimitEvent>
    where
        I: IntoIterator<Item = &'a RateLimitEvent>,
    {
        let mut selected: Vec<RateLimitEvent> =
            events.into_iter().filter(|e| self.matches(e)).cloned().collect();
        if let Some(limit) = self.limit {
            let excess = selected.len().saturating_sub(limit);
            selected.drain(..excess);
        }
        selected
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventType::RateLimitExceeded => write!(f, "rate_limit_exceeded"),
            EventType::QuotaExceeded => write!(f, "quota_exceeded"),
            EventType::WarningThreshold => write!(f, "warning_threshold"),
        }
    }
}

impl fmt::Display for RateLimitEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}({}, current={}, limit={}, over_by={})",
            self.event_type, self.reference, self.current_value, self.limit_value, self.exceeded_by
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap() + Duration::seconds(secs)
    }

    #[test]
    fn constructors_fill_severity_and_action() {
        let e = RateLimitEvent::rate_limit_exceeded("api/t1", 10, 0.25, 1.0, at(0));
        assert_eq!(e.severity, Severity::Warning);
        assert_eq!(e.action_taken, ActionTaken::Blocked);
        assert!((e.exceeded_by - 0.75).abs() < 1e-9);

        let soft = RateLimitEvent::quota_exceeded("q", 100, 130, false, at(0));
        assert_eq!(soft.action_taken, ActionTaken::Notified);
        assert_eq!(soft.exceeded_by, 30.0);
        assert_eq!(soft.severity, Severity::Critical);

        let hard = RateLimitEvent::quota_exceeded("q", 100, 100, true, at(0));
        assert_eq!(hard.action_taken, ActionTaken::Blocked);
        assert_eq!(hard.exceeded_by, 0.0);

        let warn = RateLimitEvent::warning_threshold("q", 80.0, 90, at(0));
        assert_eq!(warn.exceeded_by, 10.0);
        assert_eq!(warn.action_taken, ActionTaken::Notified);
    }

    #[test]
    fn filter_combines_criteria_and_keeps_newest() {
        let events = vec![
            RateLimitEvent::rate_limit_exceeded("api/t1", 10, 0.0, 1.0, at(0)),
            RateLimitEvent::warning_threshold("q1", 80.0, 85, at(10)),
            RateLimitEvent::rate_limit_exceeded("api/t1", 10, 0.0, 1.0, at(20)),
            RateLimitEvent::rate_limit_exceeded("api/t2", 10, 0.0, 1.0, at(30)),
            RateLimitEvent::quota_exceeded("q1", 100, 100, false, at(40)),
        ];

        let by_ref = EventFilter::new().reference("api/t1").apply(&events);
        assert_eq!(by_ref.len(), 2);

        let window = EventFilter::new().since(at(10)).until(at(40)).apply(&events);
        assert_eq!(window.len(), 3);

        let critical = EventFilter::new().min_severity(Severity::Critical).apply(&events);
        assert_eq!(critical.len(), 1);
        assert_eq!(critical[0].event_type, EventType::QuotaExceeded);

        let newest = EventFilter::new().event_type(EventType::RateLimitExceeded).limit(2).apply(&events);
        assert_eq!(newest.len(), 2);
        assert_eq!(newest[1].reference, "api/t2");
    }

    #[test]
    fn event_type_serializes_snake_case() {
        let json = serde_json::to_value(EventType::WarningThreshold).unwrap();
        assert_eq!(json, serde_json::json!("warning_threshold"));
    }
}
