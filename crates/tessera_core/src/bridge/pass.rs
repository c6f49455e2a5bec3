//! # Update Pass
//!
//! The data-oriented stage that runs between inbound and outbound sync.
//! It sees only the arena, never host objects. Whatever it changes it marks
//! dirty; outbound sync writes exactly that back.

use crossbeam_channel::Receiver;

use crate::error::BridgeResult;
use crate::memory::ComponentArena;
use crate::registry::SlotHandle;
use crate::sync::{BatchSyncEngine, ExecutionPolicy, IntegrationKernel};

/// What an update pass gets to work with for one tick.
pub struct UpdateFrame<'a> {
    pub(crate) arena: &'a ComponentArena,
    pub(crate) slots: &'a [u32],
    pub(crate) delta_seconds: f32,
    pub(crate) tick: u64,
    pub(crate) engine: &'a BatchSyncEngine,
    pub(crate) despawned: &'a Receiver<SlotHandle>,
}

impl<'a> UpdateFrame<'a> {
    /// The component arena.
    #[inline]
    #[must_use]
    pub fn arena(&self) -> &'a ComponentArena {
        self.arena
    }

    /// Slots bound to a live entity this tick, in entity order.
    #[inline]
    #[must_use]
    pub fn slots(&self) -> &'a [u32] {
        self.slots
    }

    /// Clamped tick delta.
    #[inline]
    #[must_use]
    pub fn delta_seconds(&self) -> f32 {
        self.delta_seconds
    }

    /// Tick number, starting at 1.
    #[inline]
    #[must_use]
    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// The sync engine, for batch work on the worker pool.
    #[inline]
    #[must_use]
    pub fn engine(&self) -> &'a BatchSyncEngine {
        self.engine
    }

    /// Integrates velocity into position for every bound slot using the
    /// vectorized kernel. Returns how many slots moved.
    pub fn integrate_positions(&self) -> usize {
        self.engine.integrate_positions(
            self.arena,
            self.slots,
            f64::from(self.delta_seconds),
            ExecutionPolicy::Auto,
            IntegrationKernel::Vectorized,
        )
    }

    /// Takes every deferred-destruction signal queued so far.
    pub fn drain_despawned(&self) -> impl Iterator<Item = SlotHandle> + 'a {
        self.despawned.try_iter()
    }
}

/// A data-oriented update stage.
///
/// Closures taking `&mut UpdateFrame` implement this directly.
pub trait UpdatePass {
    /// Runs once per tick.
    ///
    /// # Errors
    ///
    /// Any error fails the tick and is fed to the circuit breaker.
    fn run(&mut self, frame: &mut UpdateFrame<'_>) -> BridgeResult<()>;
}

impl<F> UpdatePass for F
where
    F: FnMut(&mut UpdateFrame<'_>) -> BridgeResult<()>,
{
    fn run(&mut self, frame: &mut UpdateFrame<'_>) -> BridgeResult<()> {
        self(frame)
    }
}

/// Moves every bound entity by its velocity.
#[derive(Clone, Copy, Debug, Default)]
pub struct KinematicPass;

impl UpdatePass for KinematicPass {
    fn run(&mut self, frame: &mut UpdateFrame<'_>) -> BridgeResult<()> {
        let moved = frame.integrate_positions();
        tracing::trace!(tick = frame.tick(), moved, "kinematic pass");
        Ok(())
    }
}
