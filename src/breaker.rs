use std::collections::VecDeque;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::BreakerSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

/// Returned when the breaker refuses a call. Deferral, not failure: the
/// skipped item keeps its attempt budget.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Blocked {
    pub retry_after: Duration,
}

impl std::fmt::Display for Blocked {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "circuit breaker open, retry in {}s",
            self.retry_after.as_secs()
        )
    }
}

/// Sliding-window circuit breaker protecting the upstream API as a whole.
///
/// Holds the most recent call outcomes (capacity = sample size) and trips
/// from CLOSED to OPEN only on a full window, so a handful of early
/// failures cannot open a cold breaker. Threshold comparisons are
/// inclusive: a failure rate exactly at `failure_threshold` trips, exactly
/// at `recovery_threshold` recovers. State is in-memory only; a restart
/// begins CLOSED. Share one instance per process and pass it explicitly.
pub struct CircuitBreaker {
    settings: BreakerSettings,
    state: BreakerState,
    window: VecDeque<bool>,
    opened_at: Option<Instant>,
    total_successes: u64,
    total_failures: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BreakerStatistics {
    pub state: BreakerState,
    pub total_requests: u64,
    pub total_successes: u64,
    pub total_failures: u64,
    pub failure_rate: f64,
    pub window_len: usize,
    pub open_remaining_secs: Option<u64>,
}

impl CircuitBreaker {
    pub fn new(settings: BreakerSettings) -> Self {
        let capacity = settings.sample_size;
        Self {
            settings,
            state: BreakerState::Closed,
            window: VecDeque::with_capacity(capacity),
            opened_at: None,
            total_successes: 0,
            total_failures: 0,
        }
    }

    /// Gate an upstream call. In OPEN, refuses until the cool-down has
    /// elapsed, then moves to HALF_OPEN and lets the trial call through.
    pub fn before_call(&mut self) -> Result<(), Blocked> {
        if self.state == BreakerState::Open {
            let elapsed = self.opened_at.map(|at| at.elapsed()).unwrap_or_default();
            if elapsed < self.settings.open_duration {
                return Err(Blocked {
                    retry_after: self.settings.open_duration - elapsed,
                });
            }
            self.state = BreakerState::HalfOpen;
            tracing::info!("Circuit breaker half-open, allowing a trial call");
        }
        Ok(())
    }

    pub fn record_success(&mut self) {
        self.total_successes += 1;
        self.push(true);

        if self.state == BreakerState::HalfOpen
            && self.failure_rate() <= self.settings.recovery_threshold
        {
            self.state = BreakerState::Closed;
            self.opened_at = None;
            tracing::info!(
                "Circuit breaker closed (recovered, {:.1}% failure rate)",
                self.failure_rate() * 100.0
            );
        }
    }

    pub fn record_failure(&mut self) {
        self.total_failures += 1;
        self.push(false);

        match self.state {
            BreakerState::HalfOpen => {
                // A single failure during the trial aborts recovery.
                self.state = BreakerState::Open;
                self.opened_at = Some(Instant::now());
                tracing::warn!("Circuit breaker reopened during recovery trial");
            }
            BreakerState::Closed => {
                let rate = self.failure_rate();
                if self.window.len() >= self.settings.sample_size
                    && rate >= self.settings.failure_threshold
                {
                    self.state = BreakerState::Open;
                    self.opened_at = Some(Instant::now());
                    tracing::warn!(
                        "Circuit breaker OPEN ({:.1}% failure rate), pausing upstream calls for {}s",
                        rate * 100.0,
                        self.settings.open_duration.as_secs()
                    );
                }
            }
            BreakerState::Open => {}
        }
    }

    pub fn state(&self) -> BreakerState {
        self.state
    }

    pub fn failure_rate(&self) -> f64 {
        if self.window.is_empty() {
            return 0.0;
        }
        let failures = self.window.iter().filter(|ok| !**ok).count();
        failures as f64 / self.window.len() as f64
    }

    pub fn statistics(&self) -> BreakerStatistics {
        let open_remaining_secs = match (self.state, self.opened_at) {
            (BreakerState::Open, Some(at)) => Some(
                self.settings
                    .open_duration
                    .saturating_sub(at.elapsed())
                    .as_secs(),
            ),
            _ => None,
        };

        BreakerStatistics {
            state: self.state,
            total_requests: self.total_successes + self.total_failures,
            total_successes: self.total_successes,
            total_failures: self.total_failures,
            failure_rate: self.failure_rate(),
            window_len: self.window.len(),
            open_remaining_secs,
        }
    }

    /// Drop all history and return to CLOSED.
    pub fn reset(&mut self) {
        self.state = BreakerState::Closed;
        self.window.clear();
        self.opened_at = None;
        self.total_successes = 0;
        self.total_failures = 0;
        tracing::info!("Circuit breaker reset");
    }

    fn push(&mut self, ok: bool) {
        self.window.push_back(ok);
        while self.window.len() > self.settings.sample_size {
            self.window.pop_front();
        }
    }
}
