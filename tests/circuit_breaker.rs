mod common;

use std::time::Duration;

use siphon::breaker::{BreakerState, CircuitBreaker};
use siphon::config::BreakerSettings;

fn instant_recovery(sample_size: usize, recovery_threshold: f64) -> BreakerSettings {
    BreakerSettings {
        failure_threshold: 0.5,
        recovery_threshold,
        open_duration: Duration::ZERO,
        sample_size,
    }
}

// ── Tripping ────────────────────────────────────────────────────

#[test]
fn opens_at_exact_failure_threshold() {
    let mut breaker = CircuitBreaker::new(common::breaker_settings(10));

    for _ in 0..5 {
        breaker.record_success();
    }
    for _ in 0..4 {
        breaker.record_failure();
    }
    assert_eq!(breaker.state(), BreakerState::Closed);

    // Tenth sample takes the rate to exactly 0.5.
    breaker.record_failure();
    assert_eq!(breaker.state(), BreakerState::Open);
    assert!(breaker.before_call().is_err());
}

#[test]
fn stays_closed_below_threshold() {
    let mut breaker = CircuitBreaker::new(common::breaker_settings(10));

    for _ in 0..6 {
        breaker.record_success();
    }
    for _ in 0..4 {
        breaker.record_failure();
    }

    assert_eq!(breaker.state(), BreakerState::Closed);
    assert!(breaker.before_call().is_ok());
}

#[test]
fn partial_window_never_trips() {
    let mut breaker = CircuitBreaker::new(common::breaker_settings(10));

    // 100% failures, but only half a window of evidence.
    for _ in 0..5 {
        breaker.record_failure();
    }

    assert_eq!(breaker.state(), BreakerState::Closed);
    assert!(breaker.before_call().is_ok());
}

#[test]
fn window_drops_oldest_samples() {
    let mut breaker = CircuitBreaker::new(common::breaker_settings(4));

    for _ in 0..4 {
        breaker.record_failure();
    }
    assert_eq!(breaker.state(), BreakerState::Open);

    breaker.reset();
    // Old failures beyond the window must not count against new calls.
    for _ in 0..4 {
        breaker.record_success();
    }
    breaker.record_failure();
    assert_eq!(breaker.failure_rate(), 0.25);
    assert_eq!(breaker.state(), BreakerState::Closed);
}

// ── Open state ──────────────────────────────────────────────────

#[test]
fn open_blocks_until_duration_elapses() {
    let mut breaker = CircuitBreaker::new(common::breaker_settings(2));

    breaker.record_failure();
    breaker.record_failure();
    assert_eq!(breaker.state(), BreakerState::Open);

    let blocked = breaker.before_call().unwrap_err();
    assert!(blocked.retry_after > Duration::ZERO);
    assert!(blocked.retry_after <= Duration::from_secs(300));

    let stats = breaker.statistics();
    assert_eq!(stats.state, BreakerState::Open);
    assert!(stats.open_remaining_secs.is_some());
}

#[test]
fn open_transitions_to_half_open_after_duration() {
    let mut breaker = CircuitBreaker::new(instant_recovery(2, 0.3));

    breaker.record_failure();
    breaker.record_failure();
    assert_eq!(breaker.state(), BreakerState::Open);

    assert!(breaker.before_call().is_ok());
    assert_eq!(breaker.state(), BreakerState::HalfOpen);
}

// ── Recovery ────────────────────────────────────────────────────

#[test]
fn half_open_failure_reopens() {
    let mut breaker = CircuitBreaker::new(instant_recovery(4, 0.25));

    breaker.record_success();
    breaker.record_success();
    breaker.record_failure();
    breaker.record_failure();
    assert_eq!(breaker.state(), BreakerState::Open);

    assert!(breaker.before_call().is_ok());
    assert_eq!(breaker.state(), BreakerState::HalfOpen);

    breaker.record_failure();
    assert_eq!(breaker.state(), BreakerState::Open);
}

#[test]
fn half_open_closes_at_exact_recovery_threshold() {
    let mut breaker = CircuitBreaker::new(instant_recovery(4, 0.25));

    breaker.record_success();
    breaker.record_success();
    breaker.record_failure();
    breaker.record_failure();
    assert_eq!(breaker.state(), BreakerState::Open);

    assert!(breaker.before_call().is_ok());

    // Successes dilute the window: 0.5, 0.5, then exactly 0.25.
    breaker.record_success();
    assert_eq!(breaker.state(), BreakerState::HalfOpen);
    breaker.record_success();
    assert_eq!(breaker.state(), BreakerState::HalfOpen);
    breaker.record_success();
    assert_eq!(breaker.state(), BreakerState::Closed);

    assert!(breaker.before_call().is_ok());
}

#[test]
fn half_open_stays_half_open_above_recovery_threshold() {
    let mut breaker = CircuitBreaker::new(instant_recovery(2, 0.3));

    breaker.record_failure();
    breaker.record_failure();
    assert!(breaker.before_call().is_ok());

    // Window becomes one failure, one success: a 0.5 rate is not recovered.
    breaker.record_success();
    assert_eq!(breaker.state(), BreakerState::HalfOpen);
}

// ── Statistics & reset ──────────────────────────────────────────

#[test]
fn statistics_report_totals_and_rate() {
    let mut breaker = CircuitBreaker::new(common::breaker_settings(10));

    for _ in 0..3 {
        breaker.record_success();
    }
    for _ in 0..2 {
        breaker.record_failure();
    }

    let stats = breaker.statistics();
    assert_eq!(stats.state, BreakerState::Closed);
    assert_eq!(stats.total_requests, 5);
    assert_eq!(stats.total_successes, 3);
    assert_eq!(stats.total_failures, 2);
    assert_eq!(stats.failure_rate, 0.4);
    assert_eq!(stats.window_len, 5);
    assert_eq!(stats.open_remaining_secs, None);
}

#[test]
fn reset_returns_to_closed_with_empty_window() {
    let mut breaker = CircuitBreaker::new(common::breaker_settings(2));

    breaker.record_failure();
    breaker.record_failure();
    assert_eq!(breaker.state(), BreakerState::Open);

    breaker.reset();
    assert_eq!(breaker.state(), BreakerState::Closed);
    assert_eq!(breaker.failure_rate(), 0.0);
    assert!(breaker.before_call().is_ok());

    // Lifetime counters go too: a reset breaker reports a blank slate.
    let stats = breaker.statistics();
    assert_eq!(stats.total_requests, 0);
    assert_eq!(stats.total_successes, 0);
    assert_eq!(stats.total_failures, 0);
    assert_eq!(stats.window_len, 0);
    assert_eq!(stats.open_remaining_secs, None);
}
