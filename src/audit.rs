//! Append-only audit trail of limit events.
//!
//! The limiter records a `rate_limit_exceeded` event when a bucket denies a
//! request; the quota tracker records `warning_threshold` and `quota_exceeded`
//! events when a quota escalates. Events go through an [`EventRecorder`]:
//! [`MemoryEventRecorder`] for tests and single-process use, [`TracingRecorder`]
//! to mirror every event into logs, or an external sink such as the JSONL
//! recorder in `quotaguard-jsonl`.

pub mod events;
pub mod recorder;

pub use events::{ActionTaken, EventFilter, EventId, EventType, RateLimitEvent, Severity};
pub use recorder::{EventRecorder, MemoryEventRecorder, RecorderError, TracingRecorder};
