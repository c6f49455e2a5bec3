//! # Circuit Breaker
//!
//! Three-state gate in front of the tick pipeline.
//!
//! ```text
//!            failure_threshold failures
//!   Closed ─────────────────────────────► Open
//!     ▲                                   │  ▲
//!     │ half_open_success_threshold       │  │ any failure
//!     │ successes                         ▼  │
//!     └─────────────────────────────── HalfOpen
//!                      reset_timeout elapsed since last failure
//! ```
//!
//! State and counters are atomics; transitions are CAS so a racing caller
//! never double-trips or double-closes. Time is passed in explicitly by the
//! `*_at` variants so tests do not sleep.

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::time::{Duration, Instant};

use crate::config::BreakerConfig;

/// Breaker state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BreakerState {
    /// Normal operation.
    Closed = 0,
    /// Rejecting until the cool-down elapses.
    Open = 1,
    /// Letting probe requests through.
    HalfOpen = 2,
}

impl BreakerState {
    #[inline]
    const fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Open,
            2 => Self::HalfOpen,
            _ => Self::Closed,
        }
    }
}

/// Lock-free circuit breaker.
pub struct CircuitBreaker {
    state: AtomicU8,
    failures: AtomicU32,
    successes: AtomicU32,
    trips: AtomicU64,
    /// Nanoseconds from `epoch` to the most recent failure.
    last_failure_nanos: AtomicU64,
    epoch: Instant,
    failure_threshold: u32,
    success_threshold: u32,
    reset_timeout: Duration,
}

impl CircuitBreaker {
    /// Creates a closed breaker.
    #[must_use]
    pub fn new(config: &BreakerConfig) -> Self {
        Self {
            state: AtomicU8::new(BreakerState::Closed as u8),
            failures: AtomicU32::new(0),
            successes: AtomicU32::new(0),
            trips: AtomicU64::new(0),
            last_failure_nanos: AtomicU64::new(0),
            epoch: Instant::now(),
            failure_threshold: config.failure_threshold.max(1),
            success_threshold: config.half_open_success_threshold.max(1),
            reset_timeout: config.reset_timeout(),
        }
    }

    /// Current state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> BreakerState {
        BreakerState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// True while open (half-open counts as not open).
    #[inline]
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state() == BreakerState::Open
    }

    /// How many times the breaker has tripped since creation.
    #[inline]
    #[must_use]
    pub fn trip_count(&self) -> u64 {
        self.trips.load(Ordering::Relaxed)
    }

    /// Consecutive failures counted while closed.
    #[inline]
    #[must_use]
    pub fn failure_count(&self) -> u32 {
        self.failures.load(Ordering::Relaxed)
    }

    #[inline]
    fn transition(&self, from: BreakerState, to: BreakerState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    #[inline]
    fn nanos_since_epoch(&self, now: Instant) -> u64 {
        u64::try_from(now.saturating_duration_since(self.epoch).as_nanos()).unwrap_or(u64::MAX)
    }

    // ========================================================================
    // GATE
    // ========================================================================

    /// Whether the next tick may run.
    #[inline]
    pub fn allow_request(&self) -> bool {
        self.allow_request_at(Instant::now())
    }

    /// [`CircuitBreaker::allow_request`] at an explicit time.
    pub fn allow_request_at(&self, now: Instant) -> bool {
        match self.state() {
            BreakerState::Closed | BreakerState::HalfOpen => true,
            BreakerState::Open => {
                let last = self.last_failure_nanos.load(Ordering::Acquire);
                let elapsed = self.nanos_since_epoch(now).saturating_sub(last);
                if u128::from(elapsed) < self.reset_timeout.as_nanos() {
                    return false;
                }
                if self.transition(BreakerState::Open, BreakerState::HalfOpen) {
                    self.successes.store(0, Ordering::Release);
                    tracing::info!("circuit breaker half-open, probing");
                }
                true
            }
        }
    }

    // ========================================================================
    // RESULT RECORDING
    // ========================================================================

    /// Records a successful tick.
    pub fn record_success(&self) {
        match self.state() {
            BreakerState::Closed => self.failures.store(0, Ordering::Release),
            BreakerState::HalfOpen => {
                let successes = self.successes.fetch_add(1, Ordering::AcqRel) + 1;
                if successes >= self.success_threshold
                    && self.transition(BreakerState::HalfOpen, BreakerState::Closed)
                {
                    self.failures.store(0, Ordering::Release);
                    self.successes.store(0, Ordering::Release);
                    tracing::info!(successes, "circuit breaker closed");
                }
            }
            // A tick admitted before the trip finished late; ignore it.
            BreakerState::Open => {}
        }
    }

    /// Records a failed tick.
    #[inline]
    pub fn record_failure(&self) {
        self.record_failure_at(Instant::now());
    }

    /// [`CircuitBreaker::record_failure`] at an explicit time.
    pub fn record_failure_at(&self, now: Instant) {
        self.last_failure_nanos
            .store(self.nanos_since_epoch(now), Ordering::Release);

        match self.state() {
            BreakerState::Closed => {
                let failures = self.failures.fetch_add(1, Ordering::AcqRel) + 1;
                if failures >= self.failure_threshold
                    && self.transition(BreakerState::Closed, BreakerState::Open)
                {
                    self.failures.store(0, Ordering::Release);
                    let trips = self.trips.fetch_add(1, Ordering::Relaxed) + 1;
                    tracing::warn!(failures, trips, "circuit breaker tripped");
                }
            }
            BreakerState::HalfOpen => {
                if self.transition(BreakerState::HalfOpen, BreakerState::Open) {
                    self.successes.store(0, Ordering::Release);
                    let trips = self.trips.fetch_add(1, Ordering::Relaxed) + 1;
                    tracing::warn!(trips, "circuit breaker reopened during probe");
                }
            }
            BreakerState::Open => {}
        }
    }

    /// Forces the breaker closed and clears its counters.
    ///
    /// The trip count is lifetime history and is kept.
    pub fn reset(&self) {
        self.state
            .store(BreakerState::Closed as u8, Ordering::Release);
        self.failures.store(0, Ordering::Release);
        self.successes.store(0, Ordering::Release);
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("state", &self.state())
            .field("failures", &self.failure_count())
            .field("trips", &self.trip_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(&BreakerConfig {
            failure_threshold: 3,
            reset_timeout_ms: 1_000,
            half_open_success_threshold: 2,
        })
    }

    #[test]
    fn test_trips_after_threshold() {
        let cb = breaker();
        let now = Instant::now();
        cb.record_failure_at(now);
        cb.record_failure_at(now);
        assert_eq!(cb.state(), BreakerState::Closed);
        assert!(cb.allow_request_at(now));

        cb.record_failure_at(now);
        assert!(cb.is_open());
        assert_eq!(cb.trip_count(), 1);
        assert!(!cb.allow_request_at(now + Duration::from_millis(999)));
    }

    #[test]
    fn test_success_while_closed_resets_failures() {
        let cb = breaker();
        let now = Instant::now();
        cb.record_failure_at(now);
        cb.record_failure_at(now);
        cb.record_success();
        assert_eq!(cb.failure_count(), 0);
        cb.record_failure_at(now);
        cb.record_failure_at(now);
        assert_eq!(cb.state(), BreakerState::Closed);
    }

    #[test]
    fn test_half_open_then_close() {
        let cb = breaker();
        let now = Instant::now();
        for _ in 0..3 {
            cb.record_failure_at(now);
        }

        let later = now + Duration::from_millis(1_000);
        assert!(cb.allow_request_at(later));
        assert_eq!(cb.state(), BreakerState::HalfOpen);
        assert!(cb.allow_request_at(later));

        cb.record_success();
        assert_eq!(cb.state(), BreakerState::HalfOpen);
        cb.record_success();
        assert_eq!(cb.state(), BreakerState::Closed);
        assert_eq!(cb.failure_count(), 0);
    }

    #[test]
    fn test_failure_while_half_open_reopens() {
        let cb = breaker();
        let now = Instant::now();
        for _ in 0..3 {
            cb.record_failure_at(now);
        }
        let trial = now + Duration::from_secs(2);
        assert!(cb.allow_request_at(trial));
        cb.record_success();

        cb.record_failure_at(trial);
        assert!(cb.is_open());
        assert_eq!(cb.trip_count(), 2);
        // The cool-down restarts from the reopening failure.
        assert!(!cb.allow_request_at(trial + Duration::from_millis(500)));
        assert!(cb.allow_request_at(trial + Duration::from_millis(1_000)));
    }

    #[test]
    fn test_reset() {
        let cb = breaker();
        let now = Instant::now();
        for _ in 0..3 {
            cb.record_failure_at(now);
        }
        cb.reset();
        assert_eq!(cb.state(), BreakerState::Closed);
        assert!(cb.allow_request_at(now));
        assert_eq!(cb.trip_count(), 1);
    }
}
