//! Refill math for each [`Strategy`].
//!
//! Everything is computed on read from the timestamps stored in the bucket;
//! nothing here runs on a timer.

use crate::clock::elapsed_secs;
use crate::rate_limit::bucket::{RateLimitBucket, Strategy};
use chrono::{DateTime, Utc};
use std::time::Duration;

impl Strategy {
    /// Bring the bucket's refill state up to `now` and return the tokens spendable right now.
    ///
    /// Only refill fields are touched; the caller decides whether to spend.
    pub(crate) fn refill(self, bucket: &mut RateLimitBucket, now: DateTime<Utc>) -> f64 {
        match self {
            Strategy::TokenBucket => refill_continuous(bucket, now),
            Strategy::FixedWindow => {
                roll_window(bucket, now, false);
                bucket.current_tokens
            }
            Strategy::SlidingWindow => {
                roll_window(bucket, now, true);
                sliding_available(bucket, now)
            }
        }
    }

    /// Estimated wait before `cost` tokens could be available.
    ///
    /// `None` when `cost` exceeds the bucket capacity, since no amount of
    /// waiting admits it. Waits too long to represent saturate at `Duration::MAX`.
    pub(crate) fn retry_after(
        self,
        bucket: &RateLimitBucket,
        cost: f64,
        available: f64,
        now: DateTime<Utc>,
    ) -> Option<Duration> {
        if cost > bucket.capacity() {
            return None;
        }
        let wait = match self {
            Strategy::TokenBucket => {
                let missing = (cost - available).max(0.0);
                let secs = missing * bucket.window_seconds as f64 / bucket.capacity();
                Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
            }
            Strategy::FixedWindow | Strategy::SlidingWindow => {
                match bucket.last_refill_time.checked_add_signed(window_delta(bucket)) {
                    Some(window_end) => (window_end - now).to_std().unwrap_or_default(),
                    None => Duration::MAX,
                }
            }
        };
        Some(wait)
    }
}

fn window_millis(bucket: &RateLimitBucket) -> i64 {
    let secs = i64::try_from(bucket.window_seconds).unwrap_or(i64::MAX / 1000);
    secs.saturating_mul(1000)
}

fn window_delta(bucket: &RateLimitBucket) -> chrono::Duration {
    chrono::Duration::try_milliseconds(window_millis(bucket)).unwrap_or(chrono::Duration::MAX)
}

fn refill_continuous(bucket: &mut RateLimitBucket, now: DateTime<Utc>) -> f64 {
    let elapsed = elapsed_secs(bucket.last_refill_time, now);
    if elapsed > 0.0 {
        let refill = elapsed / bucket.window_seconds as f64 * bucket.capacity();
        bucket.current_tokens = (bucket.current_tokens + refill).min(bucket.capacity());
        bucket.last_refill_time = now;
    }
    bucket.current_tokens
}

// Windows stay aligned to the first window start so idle gaps don't shift the boundaries.
fn roll_window(bucket: &mut RateLimitBucket, now: DateTime<Utc>, sliding: bool) {
    let window_ms = window_millis(bucket);
    let elapsed_ms = (now - bucket.last_refill_time).num_milliseconds();
    if elapsed_ms < window_ms {
        return;
    }
    let windows = elapsed_ms / window_ms;
    let used = bucket.capacity() - bucket.current_tokens;
    bucket.previous_window_used = if sliding && windows == 1 { used } else { 0.0 };
    bucket.current_tokens = bucket.capacity();
    let skipped = chrono::Duration::try_milliseconds(windows.saturating_mul(window_ms))
        .unwrap_or(chrono::Duration::MAX);
    bucket.last_refill_time = bucket.last_refill_time.checked_add_signed(skipped).unwrap_or(now);
}

fn sliding_available(bucket: &RateLimitBucket, now: DateTime<Utc>) -> f64 {
    let window = bucket.window_seconds as f64;
    let into_window = elapsed_secs(bucket.last_refill_time, now).min(window);
    let weight = 1.0 - into_window / window;
    (bucket.current_tokens - bucket.previous_window_used * weight).clamp(0.0, bucket.capacity())
}
