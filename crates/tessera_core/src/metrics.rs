//! # Bridge Metrics
//!
//! Relaxed atomic counters, bumped from the tick thread and from whatever
//! threads register entities. [`BridgeMetrics::snapshot`] turns them into a
//! plain `Copy` value that any thread can hold onto.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::fault::CircuitBreaker;
use crate::sync::OutboundStats;

/// Live counters.
#[derive(Debug, Default)]
pub struct BridgeMetrics {
    registrations: AtomicU64,
    unregistrations: AtomicU64,
    registration_failures: AtomicU64,
    capacity_rejections: AtomicU64,
    tick_count: AtomicU64,
    failed_ticks: AtomicU64,
    rejected_ticks: AtomicU64,
    total_tick_nanos: AtomicU64,
    max_tick_nanos: AtomicU64,
    outbound_writes: AtomicU64,
    outbound_skips: AtomicU64,
}

/// Point-in-time copy of the counters plus derived values.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct MetricsSnapshot {
    /// Successful new registrations.
    pub registrations: u64,
    /// Successful unregistrations.
    pub unregistrations: u64,
    /// Registrations that failed after allocating (rolled back or contended).
    pub registration_failures: u64,
    /// Registrations refused because every slot was in use.
    pub capacity_rejections: u64,
    /// Ticks that ran the pipeline, failed or not.
    pub tick_count: u64,
    /// Ticks whose pipeline returned an error or panicked.
    pub failed_ticks: u64,
    /// Ticks the circuit breaker refused to run.
    pub rejected_ticks: u64,
    /// Mean pipeline duration over `tick_count`.
    pub avg_tick_nanos: u64,
    /// Longest pipeline duration.
    pub max_tick_nanos: u64,
    /// Entities that received outbound writes.
    pub outbound_writes: u64,
    /// Entities outbound sync skipped as clean.
    pub outbound_skips: u64,
    /// Times the breaker has tripped.
    pub breaker_trips: u64,
    /// Slots currently active.
    pub active_entities: u64,
    /// Whether the breaker is open right now.
    pub circuit_breaker_open: bool,
}

#[inline]
fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl BridgeMetrics {
    /// Creates zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts a new registration.
    #[inline]
    pub fn record_registration(&self) {
        bump(&self.registrations);
    }

    /// Counts an unregistration.
    #[inline]
    pub fn record_unregistration(&self) {
        bump(&self.unregistrations);
    }

    /// Counts a failed registration.
    #[inline]
    pub fn record_registration_failure(&self) {
        bump(&self.registration_failures);
    }

    /// Counts a registration refused for lack of slots.
    #[inline]
    pub fn record_capacity_rejection(&self) {
        bump(&self.capacity_rejections);
    }

    /// Counts a tick the breaker refused.
    #[inline]
    pub fn record_rejected_tick(&self) {
        bump(&self.rejected_ticks);
    }

    /// Records a pipeline run.
    ///
    /// # Arguments
    ///
    /// * `elapsed` - Wall time of the pipeline
    /// * `outbound` - Outbound stats, if outbound sync ran
    /// * `failed` - Whether the tick failed
    pub fn record_tick(&self, elapsed: Duration, outbound: Option<OutboundStats>, failed: bool) {
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        bump(&self.tick_count);
        if failed {
            bump(&self.failed_ticks);
        }
        self.total_tick_nanos.fetch_add(nanos, Ordering::Relaxed);

        let mut current_max = self.max_tick_nanos.load(Ordering::Relaxed);
        while nanos > current_max {
            match self.max_tick_nanos.compare_exchange_weak(
                current_max,
                nanos,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(x) => current_max = x,
            }
        }

        if let Some(stats) = outbound {
            self.outbound_writes
                .fetch_add(stats.written as u64, Ordering::Relaxed);
            self.outbound_skips
                .fetch_add(stats.skipped as u64, Ordering::Relaxed);
        }
    }

    /// Copies every counter out, adding breaker and occupancy state.
    #[must_use]
    pub fn snapshot(&self, breaker: &CircuitBreaker, active_entities: usize) -> MetricsSnapshot {
        let tick_count = self.tick_count.load(Ordering::Relaxed);
        let total = self.total_tick_nanos.load(Ordering::Relaxed);

        MetricsSnapshot {
            registrations: self.registrations.load(Ordering::Relaxed),
            unregistrations: self.unregistrations.load(Ordering::Relaxed),
            registration_failures: self.registration_failures.load(Ordering::Relaxed),
            capacity_rejections: self.capacity_rejections.load(Ordering::Relaxed),
            tick_count,
            failed_ticks: self.failed_ticks.load(Ordering::Relaxed),
            rejected_ticks: self.rejected_ticks.load(Ordering::Relaxed),
            avg_tick_nanos: if tick_count == 0 { 0 } else { total / tick_count },
            max_tick_nanos: self.max_tick_nanos.load(Ordering::Relaxed),
            outbound_writes: self.outbound_writes.load(Ordering::Relaxed),
            outbound_skips: self.outbound_skips.load(Ordering::Relaxed),
            breaker_trips: breaker.trip_count(),
            active_entities: active_entities as u64,
            circuit_breaker_open: breaker.is_open(),
        }
    }
}
