use chrono::{DateTime, TimeZone, Utc};
use quotaguard::{GuardConfig, InMemoryStore, ManualClock, MemoryEventRecorder, QuotaGuard};
use std::sync::Arc;

/// Everything a test needs to drive a guard and inspect its side effects.
pub struct Harness {
    pub guard: QuotaGuard<InMemoryStore>,
    pub store: Arc<InMemoryStore>,
    pub recorder: MemoryEventRecorder,
    pub clock: ManualClock,
}

pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

pub fn harness() -> Harness {
    harness_with(GuardConfig::default())
}

pub fn harness_with(config: GuardConfig) -> Harness {
    let store = Arc::new(InMemoryStore::new());
    let recorder = MemoryEventRecorder::new();
    let clock = ManualClock::new(start());
    let guard = QuotaGuard::builder()
        .store(store.clone())
        .recorder(recorder.clone())
        .clock(clock.clone())
        .config(config)
        .build()
        .expect("valid config");
    Harness { guard, store, recorder, clock }
}
