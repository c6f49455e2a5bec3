//! # Batch Sync Engine
//!
//! Moves state between host entities and the arena twice per tick, and
//! integrates velocity into position in place.
//!
//! ## Execution
//!
//! ```text
//! len < parallel_threshold      ──►  one sequential loop on the caller
//! len ≥ parallel_threshold      ──►  pool.install(bisect)
//!                                      rayon::join(left, right)
//!                                      ... down to min_leaf, leaves sequential
//! ```
//!
//! Slots in one batch are distinct, so workers never write the same block.
//! Per-slot work is identical on every path, so the strategy never changes
//! the result.
//!
//! Registration and unregistration run concurrently with ticks, so every
//! binding is checked against the registry again right before its slot is
//! touched. A binding whose handle went stale, or whose slot is pending
//! removal, is skipped in both directions.

use std::ops::Add;

use rayon::{ThreadPool, ThreadPoolBuilder};

use super::simd::{integrate_scalar, integrate_vectorized};
use crate::config::BridgeConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::host::HostEntity;
use crate::memory::{ComponentArena, DirtyFlags};
use crate::registry::{EntitySlotRegistry, SlotHandle};

/// How a batch is scheduled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ExecutionPolicy {
    /// Sequential below the parallel threshold, parallel at or above it.
    #[default]
    Auto,
    /// Always on the calling thread.
    Sequential,
    /// Always bisected on the worker pool (leaves still respect `min_leaf`).
    Parallel,
}

/// Which integration kernel runs inside each leaf.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum IntegrationKernel {
    /// One slot at a time.
    Scalar,
    /// Four slots per SIMD group, scalar tail.
    #[default]
    Vectorized,
}

/// Pairs a slot handle with the index of its host entity in the tick's
/// entity slice.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Binding {
    /// Handle the entity carried when it was bound.
    pub handle: SlotHandle,
    /// Index into the entity slice.
    pub entity: u32,
}

impl Binding {
    /// Arena slot of the bound handle.
    #[inline]
    #[must_use]
    pub const fn slot(self) -> usize {
        self.handle.slot()
    }
}

/// What outbound sync did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OutboundStats {
    /// Entities that received at least one write.
    pub written: usize,
    /// Entities skipped because nothing was dirty.
    pub skipped: usize,
    /// Position write-backs (each followed by a bounds invalidation).
    pub position_writes: usize,
    /// Entities skipped because their slot was unregistered or reused
    /// after binding.
    pub stale: usize,
}

impl Add for OutboundStats {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self {
            written: self.written + rhs.written,
            skipped: self.skipped + rhs.skipped,
            position_writes: self.position_writes + rhs.position_writes,
            stale: self.stale + rhs.stale,
        }
    }
}

/// Bulk synchronization between host entities and the arena.
pub struct BatchSyncEngine {
    pool: ThreadPool,
    parallel_threshold: usize,
    min_leaf: usize,
}

impl BatchSyncEngine {
    /// Builds the engine and its named worker pool.
    ///
    /// # Errors
    ///
    /// [`BridgeError::InvalidConfig`] if the pool cannot be started.
    pub fn new(config: &BridgeConfig) -> BridgeResult<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.worker_threads)
            .thread_name(|i| format!("tessera-sync-{i}"))
            .build()
            .map_err(|e| BridgeError::InvalidConfig(format!("worker pool: {e}")))?;

        Ok(Self {
            pool,
            parallel_threshold: config.parallel_threshold,
            min_leaf: config.min_leaf.max(1),
        })
    }

    /// Batches at or above this size go parallel under [`ExecutionPolicy::Auto`].
    #[inline]
    #[must_use]
    pub const fn parallel_threshold(&self) -> usize {
        self.parallel_threshold
    }

    /// Smallest range a split produces.
    #[inline]
    #[must_use]
    pub const fn min_leaf(&self) -> usize {
        self.min_leaf
    }

    /// Worker threads in the pool.
    #[inline]
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.pool.current_num_threads()
    }

    #[inline]
    fn goes_parallel(&self, len: usize, policy: ExecutionPolicy) -> bool {
        match policy {
            ExecutionPolicy::Sequential => false,
            ExecutionPolicy::Parallel => len >= self.min_leaf * 2,
            ExecutionPolicy::Auto => len >= self.parallel_threshold,
        }
    }

    /// Runs `leaf` over `items`, split according to `policy`, and sums the
    /// leaf results.
    fn run<T, R, F>(&self, items: &[T], policy: ExecutionPolicy, leaf: F) -> R
    where
        T: Sync,
        R: Send + Add<Output = R>,
        F: Fn(&[T]) -> R + Sync,
    {
        if self.goes_parallel(items.len(), policy) {
            let min_leaf = self.min_leaf;
            self.pool.install(|| bisect(items, min_leaf, &leaf))
        } else {
            leaf(items)
        }
    }

    // ========================================================================
    // INBOUND: host → arena
    // ========================================================================

    /// Snapshots each bound slot's current transform into previous, then
    /// overwrites current, velocity and flags from its host entity.
    ///
    /// Returns the number of slots synced; bindings that are no longer
    /// current are skipped and not counted.
    pub fn inbound<E: HostEntity>(
        &self,
        arena: &ComponentArena,
        registry: &EntitySlotRegistry,
        bindings: &[Binding],
        entities: &[E],
        tick: u64,
        policy: ExecutionPolicy,
    ) -> usize {
        self.run(bindings, policy, |chunk| {
            chunk
                .iter()
                .filter(|binding| {
                    inbound_one(
                        arena,
                        registry,
                        **binding,
                        &entities[binding.entity as usize],
                        tick,
                    )
                })
                .count()
        })
    }

    // ========================================================================
    // OUTBOUND: arena → host, dirty regions only
    // ========================================================================

    /// Writes back every region the update pass marked dirty, consuming the
    /// dirty bits. Entities with nothing dirty are not touched, and neither
    /// are entities whose slot changed hands since binding.
    pub fn outbound<E: HostEntity>(
        &self,
        arena: &ComponentArena,
        registry: &EntitySlotRegistry,
        bindings: &[Binding],
        entities: &[E],
        policy: ExecutionPolicy,
    ) -> OutboundStats {
        self.run(bindings, policy, |chunk| {
            chunk.iter().fold(OutboundStats::default(), |stats, binding| {
                stats
                    + outbound_one(
                        arena,
                        registry,
                        *binding,
                        &entities[binding.entity as usize],
                    )
            })
        })
    }

    // ========================================================================
    // INTEGRATION
    // ========================================================================

    /// `position += velocity × dt` for every slot in `slots`; moved slots are
    /// marked [`DirtyFlags::POSITION`].
    ///
    /// Returns the number of slots whose position changed. The result is the
    /// same bit for bit under every policy and kernel.
    pub fn integrate_positions(
        &self,
        arena: &ComponentArena,
        slots: &[u32],
        dt: f64,
        policy: ExecutionPolicy,
        kernel: IntegrationKernel,
    ) -> usize {
        self.run(slots, policy, |chunk| match kernel {
            IntegrationKernel::Scalar => integrate_scalar(arena, chunk, dt),
            IntegrationKernel::Vectorized => integrate_vectorized(arena, chunk, dt),
        })
    }
}

impl std::fmt::Debug for BatchSyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchSyncEngine")
            .field("workers", &self.worker_count())
            .field("parallel_threshold", &self.parallel_threshold)
            .field("min_leaf", &self.min_leaf)
            .finish()
    }
}

fn bisect<T, R, F>(items: &[T], min_leaf: usize, leaf: &F) -> R
where
    T: Sync,
    R: Send + Add<Output = R>,
    F: Fn(&[T]) -> R + Sync,
{
    if items.len() < min_leaf * 2 {
        return leaf(items);
    }
    let (left, right) = items.split_at(items.len() / 2);
    let (a, b) = rayon::join(
        || bisect(left, min_leaf, leaf),
        || bisect(right, min_leaf, leaf),
    );
    a + b
}

/// True while `binding` still names a live, registered slot.
#[inline]
fn is_live(arena: &ComponentArena, registry: &EntitySlotRegistry, binding: Binding) -> bool {
    registry.is_current(binding.handle)
        && !arena
            .flags(binding.slot())
            .contains(DirtyFlags::PENDING_REMOVAL)
}

#[inline]
fn inbound_one<E: HostEntity>(
    arena: &ComponentArena,
    registry: &EntitySlotRegistry,
    binding: Binding,
    entity: &E,
    tick: u64,
) -> bool {
    if !is_live(arena, registry, binding) {
        return false;
    }
    let slot = binding.slot();
    let state = entity.read_state();
    arena.copy_to_previous(slot);
    arena.set_position(slot, state.position);
    arena.set_orientation(slot, state.orientation);
    arena.set_transform_flags(slot, state.flags);
    arena.set_velocity(slot, state.velocity);
    // The host is authoritative for what was just copied in.
    arena.clear_flags(slot, DirtyFlags::SYNC);
    arena.set_last_sync_tick(slot, tick);
    true
}

#[inline]
fn outbound_one<E: HostEntity>(
    arena: &ComponentArena,
    registry: &EntitySlotRegistry,
    binding: Binding,
    entity: &E,
) -> OutboundStats {
    const STALE: OutboundStats = OutboundStats {
        written: 0,
        skipped: 0,
        position_writes: 0,
        stale: 1,
    };

    if !is_live(arena, registry, binding) {
        return STALE;
    }
    let slot = binding.slot();
    let dirty = arena.take_flags(slot, DirtyFlags::SYNC);
    if dirty.is_empty() {
        return OutboundStats {
            skipped: 1,
            ..OutboundStats::default()
        };
    }

    let position = arena.position(slot);
    let orientation = arena.orientation(slot);
    let velocity = arena.velocity(slot);
    // Reused between the first check and the reads: the bits and values
    // belong to the new owner.
    if !registry.is_current(binding.handle) {
        arena.set_flags(slot, dirty);
        return STALE;
    }

    let mut stats = OutboundStats {
        written: 1,
        ..OutboundStats::default()
    };
    if dirty.contains(DirtyFlags::POSITION) {
        entity.write_position(position);
        entity.mark_bounds_dirty();
        stats.position_writes = 1;
    }
    if dirty.contains(DirtyFlags::ORIENTATION) {
        entity.write_orientation(orientation.yaw, orientation.pitch);
    }
    if dirty.contains(DirtyFlags::VELOCITY) {
        entity.write_velocity(velocity);
    }
    stats
}
