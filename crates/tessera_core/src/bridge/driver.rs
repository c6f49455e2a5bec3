//! # Simulation Driver
//!
//! The single owner of the tick pipeline:
//!
//! ```text
//! breaker gate ─► bind ─► inbound ─► update pass ─► outbound ─► publish ─► record
//!                 └──────── caught as one unit (errors and panics) ─────┘
//! ```
//!
//! A failed tick publishes nothing, so render keeps blending the last good
//! one.
//!
//! Holding the driver by `&mut` is what makes the tick single-threaded from
//! the outside; inside, sync phases fan out over the worker pool.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use super::context::BridgeContext;
use super::pass::{UpdateFrame, UpdatePass};
use crate::error::{BridgeError, BridgeResult};
use crate::host::HostEntity;
use crate::memory::ComponentArena;
use crate::sync::{Binding, ExecutionPolicy, OutboundStats};

/// What one completed tick did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Tick number, starting at 1.
    pub tick: u64,
    /// Entities synced inbound.
    pub synced: usize,
    /// Entities skipped at bind or inbound because their handle no longer
    /// named their slot.
    pub stale: usize,
    /// Entities skipped because an earlier entity in the slice was already
    /// bound to the same slot.
    pub duplicates: usize,
    /// Outbound write-back counts.
    pub outbound: OutboundStats,
    /// Deferred-destruction signals the pass left unread (discarded).
    pub unclaimed_despawns: usize,
    /// Pipeline wall time.
    pub elapsed: Duration,
}

/// Result of [`SimulationDriver::on_simulation_tick`].
#[derive(Clone, Debug, PartialEq)]
pub enum TickOutcome {
    /// The pipeline ran to the end.
    Completed(TickReport),
    /// The circuit breaker is open; nothing ran.
    Rejected,
    /// The pipeline failed or panicked; writes made before the failure stay.
    Failed(BridgeError),
    /// The context is shut down.
    Closed,
}

impl TickOutcome {
    /// The report, for completed ticks.
    #[must_use]
    pub fn report(&self) -> Option<&TickReport> {
        match self {
            Self::Completed(report) => Some(report),
            _ => None,
        }
    }
}

/// Exclusive tick driver for one [`BridgeContext`].
pub struct SimulationDriver {
    context: Arc<BridgeContext>,
    bindings: Vec<Binding>,
    slots: Vec<u32>,
    /// Tick each slot was last bound in; 0 never matches a real tick.
    bound_in: Vec<u64>,
    tick: u64,
}

impl SimulationDriver {
    pub(crate) fn new(context: Arc<BridgeContext>) -> Self {
        let capacity = context.registry().capacity();
        Self {
            context,
            bindings: Vec::with_capacity(capacity),
            slots: Vec::with_capacity(capacity),
            bound_in: vec![0; capacity],
            tick: 0,
        }
    }

    /// Ticks completed or failed so far.
    #[inline]
    #[must_use]
    pub fn tick_number(&self) -> u64 {
        self.tick
    }

    /// The context this driver ticks.
    #[inline]
    #[must_use]
    pub fn context(&self) -> &Arc<BridgeContext> {
        &self.context
    }

    /// Runs one gated tick over `entities`.
    ///
    /// # Arguments
    ///
    /// * `delta_seconds` - Raw tick delta; clamped to `[0, max_delta_seconds]`
    /// * `entities` - Host entities to sync; unbound or stale ones are skipped
    /// * `pass` - The update stage run between inbound and outbound sync
    pub fn on_simulation_tick<E, P>(
        &mut self,
        delta_seconds: f32,
        entities: &[E],
        pass: &mut P,
    ) -> TickOutcome
    where
        E: HostEntity,
        P: UpdatePass + ?Sized,
    {
        let context = Arc::clone(&self.context);
        let Ok(_guard) = context.lifecycle().enter() else {
            return TickOutcome::Closed;
        };

        if !context.breaker().allow_request() {
            context.metrics().record_rejected_tick();
            let dropped_despawns = context.despawn_receiver().try_iter().count();
            trace!(dropped_despawns, "tick rejected by open circuit breaker");
            return TickOutcome::Rejected;
        }

        let delta_seconds = context.config().clamp_delta(delta_seconds);
        self.tick += 1;
        let tick = self.tick;

        let start = Instant::now();
        let result = catch_unwind(AssertUnwindSafe(|| {
            self.run_pipeline(&context, delta_seconds, tick, entities, pass)
        }))
        .unwrap_or_else(|payload| Err(BridgeError::TickPanicked(panic_message(&*payload))));
        let elapsed = start.elapsed();

        let unclaimed_despawns = context.despawn_receiver().try_iter().count();

        match result {
            Ok(mut report) => {
                context.breaker().record_success();
                context.metrics().record_tick(elapsed, Some(report.outbound), false);
                report.elapsed = elapsed;
                report.unclaimed_despawns = unclaimed_despawns;
                trace!(tick, synced = report.synced, written = report.outbound.written, "tick completed");
                TickOutcome::Completed(report)
            }
            Err(err) => {
                context.breaker().record_failure();
                context.metrics().record_tick(elapsed, None, true);
                warn!(tick, error = %err, "tick failed");
                TickOutcome::Failed(err)
            }
        }
    }

    fn run_pipeline<E, P>(
        &mut self,
        context: &BridgeContext,
        delta_seconds: f32,
        tick: u64,
        entities: &[E],
        pass: &mut P,
    ) -> BridgeResult<TickReport>
    where
        E: HostEntity,
        P: UpdatePass + ?Sized,
    {
        let (stale, duplicates) = self.bind(context, entities, tick);
        let arena: &ComponentArena = context.arena();
        let registry = context.registry();
        let engine = context.engine();

        let synced = engine.inbound(
            arena,
            registry,
            &self.bindings,
            entities,
            tick,
            ExecutionPolicy::Auto,
        );

        let mut frame = UpdateFrame {
            arena,
            slots: &self.slots,
            delta_seconds,
            tick,
            engine,
            despawned: context.despawn_receiver(),
        };
        pass.run(&mut frame)?;

        let outbound = engine.outbound(
            arena,
            registry,
            &self.bindings,
            entities,
            ExecutionPolicy::Auto,
        );
        context.frames().publish(arena, &self.slots);

        Ok(TickReport {
            tick,
            synced,
            stale: stale + (self.bindings.len() - synced),
            duplicates,
            outbound,
            ..TickReport::default()
        })
    }

    /// Rebuilds the slot/entity bindings, one per slot. Returns how many
    /// stale handles were found (and cleared on their entities) and how many
    /// entities repeated a slot already bound this tick.
    fn bind<E: HostEntity>(
        &mut self,
        context: &BridgeContext,
        entities: &[E],
        tick: u64,
    ) -> (usize, usize) {
        self.bindings.clear();
        self.slots.clear();
        let registry = context.registry();
        let mut stale = 0;
        let mut duplicates = 0;

        for (position, entity) in entities.iter().enumerate() {
            let Some(handle) = entity.bridge_handle() else {
                continue;
            };
            let Ok(entity_index) = u32::try_from(position) else {
                break;
            };
            if !registry.is_current(handle)
                || registry.external_id(handle.slot()) != entity.external_id()
            {
                entity.set_bridge_handle(None);
                stale += 1;
                continue;
            }
            // Two host objects carrying one handle would sync the slot twice.
            if self.bound_in[handle.slot()] == tick {
                duplicates += 1;
                continue;
            }
            self.bound_in[handle.slot()] = tick;
            self.bindings.push(Binding {
                handle,
                entity: entity_index,
            });
            self.slots.push(handle.index());
        }
        if duplicates > 0 {
            debug!(tick, duplicates, "entities sharing a slot were bound once");
        }
        (stale, duplicates)
    }
}

impl Drop for SimulationDriver {
    fn drop(&mut self) {
        self.context.release_driver();
    }
}

impl std::fmt::Debug for SimulationDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulationDriver")
            .field("tick", &self.tick)
            .field("bound", &self.bindings.len())
            .finish_non_exhaustive()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message_extraction() {
        let payload = std::panic::catch_unwind(|| panic!("boom {}", 7)).unwrap_err();
        assert_eq!(panic_message(&*payload), "boom 7");
        let payload = std::panic::catch_unwind(|| panic!("static")).unwrap_err();
        assert_eq!(panic_message(&*payload), "static");
    }
}
