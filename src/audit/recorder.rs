//! Append-only event recorders.

use super::events::{EventFilter, EventId, RateLimitEvent};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

/// Errors raised by an [`EventRecorder`].
#[derive(thiserror::Error, Debug)]
pub enum RecorderError {
    /// A bounded recorder has no room left.
    #[error("event recorder is full ({capacity} events)")]
    Full {
        /// Configured capacity.
        capacity: usize,
    },
    /// Backend I/O failed.
    #[error("event recorder I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The event could not be encoded or a stored event could not be decoded.
    #[error("event encoding error: {0}")]
    Encode(String),
    /// Backend refused the request for another reason.
    #[error("event recorder unavailable: {0}")]
    Unavailable(String),
}

/// Destination for the append-only audit trail.
///
/// Implementations never update or delete an event once `record` returns `Ok`.
#[async_trait]
pub trait EventRecorder: Send + Sync {
    /// Append one event.
    async fn record(&self, event: RateLimitEvent) -> Result<EventId, RecorderError>;

    /// Events matching `filter`, in append order.
    async fn list(&self, filter: &EventFilter) -> Result<Vec<RateLimitEvent>, RecorderError>;
}

#[async_trait]
impl<R> EventRecorder for Arc<R>
where
    R: EventRecorder + ?Sized,
{
    async fn record(&self, event: RateLimitEvent) -> Result<EventId, RecorderError> {
        (**self).record(event).await
    }

    async fn list(&self, filter: &EventFilter) -> Result<Vec<RateLimitEvent>, RecorderError> {
        (**self).list(filter).await
    }
}

/// In-memory recorder (tests / single-process defaults).
#[derive(Debug, Default, Clone)]
pub struct MemoryEventRecorder {
    events: Arc<Mutex<Vec<RateLimitEvent>>>,
    capacity: Option<usize>,
}

impl MemoryEventRecorder {
    /// Create an unbounded recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a recorder that rejects events once `capacity` are held.
    pub fn bounded(capacity: usize) -> Self {
        Self { events: Arc::default(), capacity: Some(capacity) }
    }

    /// Everything recorded so far.
    pub async fn events(&self) -> Vec<RateLimitEvent> {
        self.events.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.events.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.events.lock().await.is_empty()
    }
}

#[async_trait]
impl EventRecorder for MemoryEventRecorder {
    async fn record(&self, event: RateLimitEvent) -> Result<EventId, RecorderError> {
        let mut guard = self.events.lock().await;
        if let Some(capacity) = self.capacity {
            if guard.len() >= capacity {
                return Err(RecorderError::Full { capacity });
            }
        }
        let id = event.event_id;
        guard.push(event);
        Ok(id)
    }

    async fn list(&self, filter: &EventFilter) -> Result<Vec<RateLimitEvent>, RecorderError> {
        let guard = self.events.lock().await;
        Ok(filter.apply(guard.iter()))
    }
}

/// Logs every event via tracing, then hands it to the wrapped recorder.
#[derive(Debug, Clone)]
pub struct TracingRecorder<R> {
    inner: R,
}

impl<R> TracingRecorder<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }
}

#[async_trait]
impl<R> EventRecorder for TracingRecorder<R>
where
    R: EventRecorder,
{
    async fn record(&self, event: RateLimitEvent) -> Result<EventId, RecorderError> {
        info!(
            target: "quotaguard::events",
            event_id = %event.event_id,
            event_type = %event.event_type,
            reference = %event.reference,
            current = event.current_value,
            limit = event.limit_value,
            exceeded_by = event.exceeded_by,
            action = ?event.action_taken,
            severity = ?event.severity,
            "limit event"
        );
        self.inner.record(event).await
    }

    async fn list(&self, filter: &EventFilter) -> Result<Vec<RateLimitEvent>, RecorderError> {
        self.inner.list(filter).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::events::EventType;
    use chrono::{TimeZone, Utc};

    fn event(reference: &str) -> RateLimitEvent {
        let at = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        RateLimitEvent::rate_limit_exceeded(reference, 10, 0.0, 1.0, at)
    }

    #[tokio::test]
    async fn memory_recorder_appends_in_order() {
        let recorder = MemoryEventRecorder::new();
        let first = recorder.record(event("a/1")).await.unwrap();
        recorder.record(event("a/2")).await.unwrap();

        let all = recorder.list(&EventFilter::new()).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].event_id, first);
        assert_eq!(all[1].reference, "a/2");
    }

    #[tokio::test]
    async fn bounded_recorder_rejects_when_full() {
        let recorder = MemoryEventRecorder::bounded(1);
        recorder.record(event("a/1")).await.unwrap();
        let err = recorder.record(event("a/2")).await.unwrap_err();
        assert!(matches!(err, RecorderError::Full { capacity: 1 }));
        assert_eq!(recorder.len().await, 1);
    }

    #[tokio::test]
    async fn tracing_recorder_forwards() {
        let memory = MemoryEventRecorder::new();
        let recorder = TracingRecorder::new(memory.clone());
        recorder.record(event("a/1")).await.unwrap();

        let listed = recorder
            .list(&EventFilter::new().event_type(EventType::RateLimitExceeded))
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(memory.len().await, 1);
    }
}
