//! Backoff arithmetic for the work queue. Pure, no I/O, so the policy can
//! be swapped (e.g. jittered backoff) without touching queue or breaker.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Delay before the next attempt: `base * multiplier^attempt_count`,
/// capped. `attempt_count` is the value after incrementing for the current
/// failure, so the first failure gets the shortest delay.
pub fn compute_backoff(
    attempt_count: i32,
    base: Duration,
    multiplier: f64,
    cap: Duration,
) -> Duration {
    let scaled = base.as_secs_f64() * multiplier.powi(attempt_count.max(0));
    if scaled.is_finite() && scaled < cap.as_secs_f64() {
        Duration::from_secs_f64(scaled)
    } else {
        cap
    }
}

/// True once the retry budget is spent.
pub fn is_exhausted(attempt_count: i32, max_attempts: i32) -> bool {
    attempt_count >= max_attempts
}

pub fn next_attempt_time(now: DateTime<Utc>, backoff: Duration) -> DateTime<Utc> {
    now + chrono::Duration::milliseconds(backoff.as_millis() as i64)
}
