mod common;

use std::time::Duration;

use chrono::{TimeZone, Utc};
use siphon::retry::{compute_backoff, is_exhausted, next_attempt_time};

// ── Backoff curve ───────────────────────────────────────────────

#[test]
fn first_failure_waits_base_times_multiplier() {
    let backoff = compute_backoff(1, Duration::from_secs(300), 2.0, Duration::from_secs(86_400));
    assert_eq!(backoff, Duration::from_secs(600));
}

#[test]
fn backoff_grows_monotonically_until_cap() {
    let base = Duration::from_secs(300);
    let cap = Duration::from_secs(86_400);

    let mut previous = Duration::ZERO;
    for attempt in 1..=10 {
        let backoff = compute_backoff(attempt, base, 2.0, cap);
        assert!(backoff >= previous, "attempt {attempt} shrank the backoff");
        assert!(backoff <= cap);
        previous = backoff;
    }

    // 300 * 2^9 = 153600 > cap
    assert_eq!(compute_backoff(9, base, 2.0, cap), cap);
}

#[test]
fn multiplier_of_one_keeps_backoff_flat() {
    let base = Duration::from_secs(60);
    for attempt in 1..=5 {
        assert_eq!(
            compute_backoff(attempt, base, 1.0, Duration::from_secs(3600)),
            base
        );
    }
}

#[test]
fn huge_attempt_counts_saturate_at_cap() {
    let cap = Duration::from_secs(86_400);
    assert_eq!(
        compute_backoff(10_000, Duration::from_secs(300), 2.0, cap),
        cap
    );
}

#[test]
fn negative_attempt_counts_clamp_to_base() {
    assert_eq!(
        compute_backoff(-3, Duration::from_secs(300), 2.0, Duration::from_secs(86_400)),
        Duration::from_secs(300)
    );
}

// ── Exhaustion ──────────────────────────────────────────────────

#[test]
fn exhaustion_is_inclusive_at_max_attempts() {
    assert!(!is_exhausted(4, 5));
    assert!(is_exhausted(5, 5));
    assert!(is_exhausted(6, 5));
}

// ── Scheduling ──────────────────────────────────────────────────

#[test]
fn next_attempt_time_adds_backoff() {
    let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
    let next = next_attempt_time(now, Duration::from_secs(600));
    assert_eq!(next, Utc.with_ymd_and_hms(2026, 3, 1, 12, 10, 0).unwrap());
}
