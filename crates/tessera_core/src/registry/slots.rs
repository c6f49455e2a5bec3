//! # Entity Slot Registry
//!
//! Owns the slot lifecycle: lock-free allocation from the free-list, the
//! per-slot state machine, generations, and the external-id index.
//!
//! Every slot exists from construction; registration only moves it through
//! `Free → Allocating → Active` and unregistration through
//! `Active → Removing → Free`. Transitions out of `Free` and `Active` are
//! CAS-guarded; the thread that wins one owns the slot until it publishes
//! the next state.
//!
//! ## Lifecycle Word
//!
//! ```text
//! 63            32 31        8 7       0
//! ┌───────────────┬───────────┬─────────┐
//! │  generation   │  (zero)   │  state  │
//! └───────────────┴───────────┴─────────┘
//! ```
//!
//! State and generation share one atomic, so unregistration compares
//! `(Active, generation)` in a single CAS and a stale handle can never
//! disturb the slot's current owner.

use std::sync::atomic::{AtomicI32, AtomicU64, AtomicUsize, Ordering};

use tracing::warn;

use super::free_list::FreeList;
use super::handle::{SlotHandle, SlotState};
use super::hash_index::{IdIndex, InsertError};
use crate::config::{BridgeConfig, MAX_CAPACITY};
use crate::error::{BridgeError, BridgeResult};
use crate::host::EntitySnapshot;
use crate::memory::{ComponentArena, DirtyFlags};

/// Outcome of a successful [`EntitySlotRegistry::register`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Registered {
    /// The id was already active; nothing was written.
    Existing(SlotHandle),
    /// A slot was allocated and initialized.
    Created(SlotHandle),
}

impl Registered {
    /// The handle either way.
    #[inline]
    #[must_use]
    pub const fn handle(self) -> SlotHandle {
        match self {
            Self::Existing(handle) | Self::Created(handle) => handle,
        }
    }

    /// True if this call allocated the slot.
    #[inline]
    #[must_use]
    pub const fn is_new(self) -> bool {
        matches!(self, Self::Created(_))
    }
}

/// Why slot initialization stopped.
enum InitFailure {
    /// Give up and report.
    Fatal(BridgeError),
    /// A concurrent registration of the same id holds the index; start over.
    Duplicate,
}

#[inline]
const fn pack(generation: u32, state: SlotState) -> u64 {
    ((generation as u64) << 32) | state as u64
}

#[inline]
#[allow(clippy::cast_possible_truncation)]
const fn unpack(word: u64) -> (u32, SlotState) {
    ((word >> 32) as u32, SlotState::from_u8(word as u8))
}

/// Lock-free registry of entity slots.
pub struct EntitySlotRegistry {
    lifecycle: Box<[AtomicU64]>,
    external_ids: Box<[AtomicI32]>,
    free_list: FreeList,
    index: IdIndex,
    active: AtomicUsize,
    max_register_attempts: u32,
}

impl EntitySlotRegistry {
    /// Creates a registry with every slot free.
    ///
    /// # Arguments
    ///
    /// * `capacity` - Number of slots; must match the arena
    /// * `max_probes` - Probe window of the id index
    /// * `max_register_attempts` - Restarts a contended registration may make
    #[must_use]
    pub fn new(capacity: usize, max_probes: usize, max_register_attempts: u32) -> Self {
        debug_assert!(capacity <= MAX_CAPACITY);
        let capacity = capacity.min(MAX_CAPACITY);
        #[allow(clippy::cast_possible_truncation)]
        let free_list = FreeList::new(capacity as u32);

        Self {
            lifecycle: (0..capacity)
                .map(|_| AtomicU64::new(pack(0, SlotState::Free)))
                .collect(),
            external_ids: (0..capacity).map(|_| AtomicI32::new(0)).collect(),
            free_list,
            index: IdIndex::new(capacity, max_probes),
            active: AtomicUsize::new(0),
            max_register_attempts: max_register_attempts.max(1),
        }
    }

    /// Creates a registry sized by a validated configuration.
    #[must_use]
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self::new(
            config.capacity,
            config.max_probes,
            config.max_register_attempts,
        )
    }

    // ========================================================================
    // REGISTRATION
    // ========================================================================

    /// Binds `external_id` to a slot and initializes its block.
    ///
    /// Idempotent: an id that is already active returns
    /// [`Registered::Existing`] and its block is left alone.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::CapacityExhausted`] when no slot is free. Nothing
    ///   changes.
    /// - [`BridgeError::InvalidSnapshot`] or [`BridgeError::IndexFull`] after
    ///   the slot has been rolled back to `Free`.
    /// - [`BridgeError::Contention`] when every attempt lost a race.
    pub fn register(
        &self,
        arena: &ComponentArena,
        external_id: i32,
        snapshot: &EntitySnapshot,
    ) -> BridgeResult<Registered> {
        for _ in 0..self.max_register_attempts {
            if let Some(handle) = self.lookup(external_id) {
                return Ok(Registered::Existing(handle));
            }

            let Some(index) = self.free_list.pop() else {
                return Err(BridgeError::CapacityExhausted {
                    capacity: self.capacity(),
                });
            };
            let slot = index as usize;

            let word = self.lifecycle[slot].load(Ordering::Acquire);
            let (previous_generation, state) = unpack(word);
            let generation = previous_generation.wrapping_add(1);
            if state != SlotState::Free
                || self.lifecycle[slot]
                    .compare_exchange(
                        word,
                        pack(generation, SlotState::Allocating),
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_err()
            {
                self.free_list.push(index);
                std::hint::spin_loop();
                continue;
            }

            self.external_ids[slot].store(external_id, Ordering::Release);

            match self.initialize(arena, index, external_id, snapshot) {
                Ok(()) => {}
                Err(InitFailure::Fatal(err)) => {
                    warn!(external_id, slot, error = %err, "registration rolled back");
                    self.release(arena, index);
                    return Err(err);
                }
                Err(InitFailure::Duplicate) => {
                    self.release(arena, index);
                    std::thread::yield_now();
                    continue;
                }
            }

            // Allocating is owned by this thread; publishing Active needs no CAS.
            self.lifecycle[slot].store(pack(generation, SlotState::Active), Ordering::Release);
            self.active.fetch_add(1, Ordering::AcqRel);
            return Ok(Registered::Created(SlotHandle::new(index, generation)));
        }

        Err(BridgeError::Contention {
            external_id,
            attempts: self.max_register_attempts,
        })
    }

    fn initialize(
        &self,
        arena: &ComponentArena,
        index: u32,
        external_id: i32,
        snapshot: &EntitySnapshot,
    ) -> Result<(), InitFailure> {
        let slot = index as usize;
        snapshot.validate(external_id).map_err(InitFailure::Fatal)?;

        arena.write_snapshot(slot, snapshot);
        arena.set_external_id(slot, external_id);
        arena.set_internal_id(slot, index);
        arena.set_last_sync_tick(slot, 0);

        match self.index.insert(external_id, index) {
            Ok(()) => Ok(()),
            Err(InsertError::Duplicate) => Err(InitFailure::Duplicate),
            Err(InsertError::Full) => Err(InitFailure::Fatal(BridgeError::IndexFull {
                external_id,
                probes: self.index.max_probes(),
            })),
        }
    }

    /// Returns an owned (allocating or removing) slot to the free-list.
    fn release(&self, arena: &ComponentArena, index: u32) {
        let slot = index as usize;
        arena.zero_block(slot);
        self.external_ids[slot].store(0, Ordering::Release);
        let generation = self.generation(slot);
        self.lifecycle[slot].store(pack(generation, SlotState::Free), Ordering::Release);
        self.free_list.push(index);
    }

    // ========================================================================
    // UNREGISTRATION
    // ========================================================================

    /// Tears down the slot `handle` refers to.
    ///
    /// `on_removing` runs once, after the slot is marked
    /// [`DirtyFlags::PENDING_REMOVAL`] and before its block is cleared.
    /// Returns false (and skips the hook) for stale handles and slots that
    /// are not active, so repeated calls are harmless.
    pub fn unregister(
        &self,
        arena: &ComponentArena,
        handle: SlotHandle,
        on_removing: impl FnOnce(SlotHandle),
    ) -> bool {
        let slot = handle.slot();
        if slot >= self.capacity()
            || self.lifecycle[slot]
                .compare_exchange(
                    pack(handle.generation(), SlotState::Active),
                    pack(handle.generation(), SlotState::Removing),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_err()
        {
            return false;
        }

        arena.set_flags(slot, DirtyFlags::PENDING_REMOVAL);
        on_removing(handle);

        let external_id = self.external_ids[slot].load(Ordering::Acquire);
        self.index.remove(external_id, handle.index());
        self.release(arena, handle.index());
        self.active.fetch_sub(1, Ordering::AcqRel);
        true
    }

    // ========================================================================
    // QUERIES
    // ========================================================================

    /// Handle of the active slot mapped to `external_id`.
    #[must_use]
    pub fn lookup(&self, external_id: i32) -> Option<SlotHandle> {
        let index = self.index.find(external_id, |index| {
            let slot = index as usize;
            slot < self.capacity()
                && self.state(slot) == SlotState::Active
                && self.external_ids[slot].load(Ordering::Acquire) == external_id
        })?;
        Some(SlotHandle::new(index, self.generation(index as usize)))
    }

    /// True if `handle` still names an active slot.
    #[inline]
    #[must_use]
    pub fn is_current(&self, handle: SlotHandle) -> bool {
        let slot = handle.slot();
        slot < self.capacity()
            && self.lifecycle[slot].load(Ordering::Acquire)
                == pack(handle.generation(), SlotState::Active)
    }

    /// Lifecycle state of `slot`.
    ///
    /// # Panics
    ///
    /// Panics if `slot` is out of range.
    #[inline]
    #[must_use]
    pub fn state(&self, slot: usize) -> SlotState {
        unpack(self.lifecycle[slot].load(Ordering::Acquire)).1
    }

    /// Current generation of `slot`.
    #[inline]
    #[must_use]
    pub fn generation(&self, slot: usize) -> u32 {
        unpack(self.lifecycle[slot].load(Ordering::Acquire)).0
    }

    /// External id bound to `slot` (0 when free).
    #[inline]
    #[must_use]
    pub fn external_id(&self, slot: usize) -> i32 {
        self.external_ids[slot].load(Ordering::Acquire)
    }

    /// Fills `out` with the indices of every active slot, ascending.
    pub fn active_slots(&self, out: &mut Vec<u32>) {
        out.clear();
        out.extend(
            (0..self.lifecycle.len())
                .filter(|&slot| self.state(slot) == SlotState::Active)
                .map(|slot| slot as u32),
        );
    }

    /// Number of active slots.
    #[inline]
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Total number of slots.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.lifecycle.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_shared::DVec3;

    fn setup(capacity: usize) -> (ComponentArena, EntitySlotRegistry) {
        (
            ComponentArena::new(capacity).unwrap(),
            EntitySlotRegistry::new(capacity, 32, 8),
        )
    }

    fn at(x: f64) -> EntitySnapshot {
        EntitySnapshot::at(DVec3::new(x, 64.0, 0.0), 0.0, 0.0)
    }

    #[test]
    fn test_register_initializes_slot() {
        let (arena, registry) = setup(4);
        let registered = registry.register(&arena, 42, &at(10.0)).unwrap();
        assert!(registered.is_new());

        let handle = registered.handle();
        assert_eq!(handle.index(), 0);
        assert_eq!(handle.generation(), 1);
        assert_eq!(registry.state(0), SlotState::Active);
        assert_eq!(registry.active_count(), 1);
        assert_eq!(arena.external_id(0), 42);
        assert_eq!(arena.position(0).x, 10.0);
        assert_eq!(registry.lookup(42), Some(handle));
        assert_eq!(registry.lookup(43), None);
    }

    #[test]
    fn test_register_is_idempotent_and_leaves_block_alone() {
        let (arena, registry) = setup(4);
        let first = registry.register(&arena, 42, &at(10.0)).unwrap().handle();
        arena.set_position(first.slot(), DVec3::new(99.0, 0.0, 0.0));

        let again = registry.register(&arena, 42, &at(-1.0)).unwrap();
        assert_eq!(again, Registered::Existing(first));
        assert_eq!(arena.position(first.slot()).x, 99.0);
        assert_eq!(registry.active_count(), 1);
    }

    #[test]
    fn test_capacity_exhaustion_changes_nothing() {
        let (arena, registry) = setup(2);
        registry.register(&arena, 1, &at(1.0)).unwrap();
        registry.register(&arena, 2, &at(2.0)).unwrap();
        let before = [arena.read_transform(0), arena.read_transform(1)];

        assert_eq!(
            registry.register(&arena, 3, &at(3.0)),
            Err(BridgeError::CapacityExhausted { capacity: 2 })
        );
        assert_eq!([arena.read_transform(0), arena.read_transform(1)], before);
        assert_eq!(registry.active_count(), 2);
        assert_eq!(registry.lookup(3), None);
    }

    #[test]
    fn test_invalid_snapshot_rolls_back() {
        let (arena, registry) = setup(1);
        let bad = at(f64::NAN);
        assert!(matches!(
            registry.register(&arena, 7, &bad),
            Err(BridgeError::InvalidSnapshot { external_id: 7, .. })
        ));
        assert_eq!(registry.state(0), SlotState::Free);
        assert_eq!(registry.active_count(), 0);
        assert_eq!(registry.lookup(7), None);

        // The rolled-back slot is reusable, with a fresh generation.
        let handle = registry.register(&arena, 7, &at(1.0)).unwrap().handle();
        assert_eq!(handle.index(), 0);
        assert_eq!(handle.generation(), 2);
    }

    #[test]
    fn test_index_full_rolls_back() {
        let arena = ComponentArena::new(2).unwrap();
        let registry = EntitySlotRegistry::new(2, 1, 8);
        registry.register(&arena, 0, &at(0.0)).unwrap();

        let mut hit_full = false;
        for id in 1..1_000 {
            match registry.register(&arena, id, &at(0.0)) {
                Ok(registered) => {
                    assert!(registry.unregister(&arena, registered.handle(), |_| {}));
                }
                Err(BridgeError::IndexFull { external_id, probes }) => {
                    assert_eq!((external_id, probes), (id, 1));
                    hit_full = true;
                    break;
                }
                Err(other) => panic!("unexpected error {other}"),
            }
        }
        assert!(hit_full);
        assert_eq!(registry.active_count(), 1);
        assert_eq!(registry.state(1), SlotState::Free);
    }

    #[test]
    fn test_unregister_lifecycle() {
        let (arena, registry) = setup(2);
        let handle = registry.register(&arena, 42, &at(5.0)).unwrap().handle();

        let mut hook_calls = 0;
        assert!(registry.unregister(&arena, handle, |h| {
            assert_eq!(h, handle);
            assert!(arena.flags(h.slot()).contains(DirtyFlags::PENDING_REMOVAL));
            hook_calls += 1;
        }));
        assert_eq!(hook_calls, 1);
        assert_eq!(registry.state(0), SlotState::Free);
        assert_eq!(registry.active_count(), 0);
        assert_eq!(registry.lookup(42), None);
        assert_eq!(arena.position(0), DVec3::ZERO);
        assert!(arena.flags(0).is_empty());

        // Idempotent
        assert!(!registry.unregister(&arena, handle, |_| hook_calls += 1));
        assert_eq!(hook_calls, 1);
    }

    #[test]
    fn test_stale_handle_is_rejected() {
        let (arena, registry) = setup(1);
        let old = registry.register(&arena, 1, &at(1.0)).unwrap().handle();
        assert!(registry.unregister(&arena, old, |_| {}));

        let new = registry.register(&arena, 2, &at(2.0)).unwrap().handle();
        assert_eq!(new.index(), old.index());
        assert_ne!(new.generation(), old.generation());

        assert!(!registry.is_current(old));
        assert!(registry.is_current(new));
        assert!(!registry.unregister(&arena, old, |_| {}));
        assert_eq!(registry.lookup(2), Some(new));
        assert!(!registry.unregister(&arena, SlotHandle::new(9, 1), |_| {}));
    }

    #[test]
    fn test_lifecycle_word_round_trips() {
        for state in [
            SlotState::Free,
            SlotState::Allocating,
            SlotState::Active,
            SlotState::Removing,
        ] {
            assert_eq!(unpack(pack(u32::MAX, state)), (u32::MAX, state));
        }
        assert_ne!(pack(1, SlotState::Active), pack(2, SlotState::Active));
    }

    #[test]
    fn test_rollback_keeps_generation_and_frees_slot() {
        let (arena, registry) = setup(1);
        let handle = registry.register(&arena, 3, &at(1.0)).unwrap().handle();
        assert!(registry.unregister(&arena, handle, |_| {}));
        assert_eq!(registry.state(0), SlotState::Free);
        assert_eq!(registry.generation(0), handle.generation());
        assert!(!registry.is_current(handle));
    }

    #[test]
    fn test_active_slots_lists_only_active() {
        let (arena, registry) = setup(4);
        let handles: Vec<_> = (0..4)
            .map(|id| registry.register(&arena, id, &at(0.0)).unwrap().handle())
            .collect();
        registry.unregister(&arena, handles[1], |_| {});

        let mut slots = Vec::new();
        registry.active_slots(&mut slots);
        assert_eq!(slots, vec![0, 2, 3]);
    }
}
