//! Convenient re-exports for common quotaguard types.
pub use crate::{
    audit::{EventFilter, EventRecorder, RateLimitEvent},
    clock::Clock,
    config::{FailurePolicy, GuardConfig},
    error::LimitError,
    guard::QuotaGuard,
    quota::{QuotaId, QuotaSpec, QuotaStatus, RenewalPeriod, SubjectType},
    rate_limit::{AdmissionLayer, BucketId, BucketSpec, CheckReason, RateLimiter, Strategy},
    store::BucketStore,
};
