#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # quotaguard
//!
//! Admission control and usage quotas for multi-tenant services.
//!
//! ## Features
//!
//! - **Rate limiting** per caller with token bucket, fixed window and sliding window buckets
//! - **Quotas** with warning/exceeded tiers and calendar renewal
//! - **Audit trail** of limit events through pluggable recorders
//! - **Optimistic concurrency** on versioned records, safe across processes sharing a store
//! - **Tower middleware** that charges a bucket per request
//! - **Live configuration** of failure policy, cooldown and retry budget
//!
//! ## Quick Start
//!
//! ```rust
//! use quotaguard::{QuotaGuard, QuotaSpec, RenewalPeriod, SubjectType};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let guard = QuotaGuard::builder().build()?;
//!
//!     let quota = guard
//!         .configure_quota(QuotaSpec::new(
//!             "API calls",
//!             "tenant-1",
//!             SubjectType::Tenant,
//!             "api_calls",
//!             10_000,
//!             "calls",
//!             RenewalPeriod::Monthly,
//!         ))
//!         .await?;
//!
//!     let outcome = guard.consume(&quota, 250).await?;
//!     assert_eq!(outcome.usage_percentage, 2.5);
//!     Ok(())
//! }
//! ```

pub mod adaptive;
pub mod audit;
pub mod clock;
pub mod config;
pub mod error;
pub mod guard;
pub mod prelude;
pub mod quota;
pub mod rate_limit;
pub mod store;

// Re-exports
pub use adaptive::DynamicConfig;
pub use audit::{
    ActionTaken, EventFilter, EventId, EventRecorder, EventType, MemoryEventRecorder,
    RateLimitEvent, RecorderError, Severity, TracingRecorder,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, FailurePolicy, GuardConfig};
pub use error::{LimitError, RecordKind};
pub use guard::{QuotaGuard, QuotaGuardBuilder};
pub use quota::{
    ConsumeOutcome, QuotaId, QuotaLimit, QuotaSpec, QuotaStatus, QuotaTracker, RenewOutcome,
    RenewalPeriod, SubjectType,
};
pub use rate_limit::{
    AdmissionError, AdmissionLayer, AdmissionService, BucketId, BucketSpec, CheckOutcome,
    CheckReason, RateLimitBucket, RateLimiter, Strategy, TokenBucketLimiter,
};
pub use store::{BucketStore, InMemoryStore, MemoryStoreError};
