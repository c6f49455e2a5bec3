//! # Component Memory Arena
//!
//! One contiguous, cache-aligned, zeroed allocation holding a fixed-size
//! block per slot. Allocated once when the context is built and returned to
//! the allocator only when the arena is dropped.
//!
//! ## Access Model
//!
//! Every field is read and written through a relaxed atomic of the field's
//! own width. Worker threads in the same phase own disjoint slots, so the
//! atomics compile to plain loads and stores and never contend; they exist so
//! a render-thread read racing a tick-thread write is a torn value, never
//! undefined behaviour.
//!
//! Slot indices are trusted: they come from the registry. A bad index trips
//! an assertion instead of reading foreign memory.

// SAFETY: This module owns a raw allocation and hands out atomic views into it.
// All unsafe blocks are documented at the point of use.
#![allow(unsafe_code)]

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use tessera_shared::{DVec3, Orientation, Transform};

use super::layout::{
    metadata, region, transform, velocity, DirtyFlags, BLOCK_SIZE, CACHE_LINE,
};
use crate::error::{BridgeError, BridgeResult};
use crate::host::EntitySnapshot;

/// The off-heap component store.
///
/// # Example
///
/// ```rust,ignore
/// let arena = ComponentArena::new(4096)?;
/// arena.set_position(7, DVec3::new(1.0, 64.0, 1.0));
/// arena.copy_to_previous(7);
/// ```
pub struct ComponentArena {
    /// Base of the allocation.
    base: NonNull<u8>,
    /// Layout used for the allocation (needed to free it).
    layout: Layout,
    /// Number of blocks.
    capacity: usize,
}

impl ComponentArena {
    /// Allocates and zero-fills `capacity` blocks.
    ///
    /// # Errors
    ///
    /// [`BridgeError::ArenaAllocation`] if the size overflows or the
    /// allocator refuses. There is no degraded mode without backing memory.
    pub fn new(capacity: usize) -> BridgeResult<Self> {
        let bytes = capacity
            .checked_mul(BLOCK_SIZE)
            .ok_or(BridgeError::ArenaAllocation { bytes: usize::MAX })?;
        if bytes == 0 {
            return Err(BridgeError::ArenaAllocation { bytes });
        }
        let layout = Layout::from_size_align(bytes, CACHE_LINE)
            .map_err(|_| BridgeError::ArenaAllocation { bytes })?;

        // SAFETY: layout has a non-zero size.
        let ptr = unsafe { alloc_zeroed(layout) };
        let base = NonNull::new(ptr).ok_or(BridgeError::ArenaAllocation { bytes })?;

        Ok(Self {
            base,
            layout,
            capacity,
        })
    }

    /// Number of blocks.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total size of the allocation in bytes.
    #[inline]
    #[must_use]
    pub const fn byte_len(&self) -> usize {
        self.layout.size()
    }

    /// Byte offset of a slot's block from the arena base.
    #[inline]
    #[must_use]
    pub const fn memory_offset(slot: usize) -> usize {
        slot * BLOCK_SIZE
    }

    // ========================================================================
    // RAW FIELD VIEWS
    // ========================================================================

    #[inline]
    fn field_ptr(&self, slot: usize, offset: usize) -> *mut u8 {
        assert!(slot < self.capacity, "slot {slot} outside arena of {}", self.capacity);
        debug_assert!(offset < BLOCK_SIZE);
        // SAFETY: slot < capacity and offset < BLOCK_SIZE keep the result inside
        // the allocation.
        unsafe { self.base.as_ptr().add(Self::memory_offset(slot) + offset) }
    }

    #[inline]
    fn word64(&self, slot: usize, offset: usize) -> &AtomicU64 {
        debug_assert_eq!(offset % 8, 0);
        // SAFETY: the block is 64-byte aligned and every 64-bit field sits on an
        // 8-byte offset; the memory is initialized (zeroed) and lives as long as
        // `self`.
        unsafe { &*self.field_ptr(slot, offset).cast::<AtomicU64>() }
    }

    #[inline]
    fn word32(&self, slot: usize, offset: usize) -> &AtomicU32 {
        debug_assert_eq!(offset % 4, 0);
        // SAFETY: as for `word64`, with 4-byte alignment.
        unsafe { &*self.field_ptr(slot, offset).cast::<AtomicU32>() }
    }

    #[inline]
    fn load_f64(&self, slot: usize, offset: usize) -> f64 {
        f64::from_bits(self.word64(slot, offset).load(Ordering::Relaxed))
    }

    #[inline]
    fn store_f64(&self, slot: usize, offset: usize, value: f64) {
        self.word64(slot, offset).store(value.to_bits(), Ordering::Relaxed);
    }

    #[inline]
    fn load_f32(&self, slot: usize, offset: usize) -> f32 {
        f32::from_bits(self.word32(slot, offset).load(Ordering::Relaxed))
    }

    #[inline]
    fn store_f32(&self, slot: usize, offset: usize, value: f32) {
        self.word32(slot, offset).store(value.to_bits(), Ordering::Relaxed);
    }

    #[inline]
    fn load_vec(&self, slot: usize, base: usize) -> DVec3 {
        DVec3::new(
            self.load_f64(slot, base),
            self.load_f64(slot, base + 8),
            self.load_f64(slot, base + 16),
        )
    }

    #[inline]
    fn store_vec(&self, slot: usize, base: usize, value: DVec3) {
        self.store_f64(slot, base, value.x);
        self.store_f64(slot, base + 8, value.y);
        self.store_f64(slot, base + 16, value.z);
    }

    #[inline]
    fn load_orientation(&self, slot: usize, base: usize) -> Orientation {
        Orientation::new(
            self.load_f32(slot, base + transform::YAW),
            self.load_f32(slot, base + transform::PITCH),
            self.load_f32(slot, base + transform::ROLL),
        )
    }

    #[inline]
    fn load_transform(&self, slot: usize, base: usize) -> Transform {
        Transform::new(
            self.load_vec(slot, base + transform::X),
            self.load_orientation(slot, base),
            self.word32(slot, base + transform::FLAGS).load(Ordering::Relaxed),
        )
    }

    // ========================================================================
    // CURRENT TRANSFORM
    // ========================================================================

    /// Current position.
    #[inline]
    #[must_use]
    pub fn position(&self, slot: usize) -> DVec3 {
        self.load_vec(slot, region::CURRENT + transform::X)
    }

    /// Overwrites the current position.
    #[inline]
    pub fn set_position(&self, slot: usize, position: DVec3) {
        self.store_vec(slot, region::CURRENT + transform::X, position);
    }

    /// Current orientation.
    #[inline]
    #[must_use]
    pub fn orientation(&self, slot: usize) -> Orientation {
        self.load_orientation(slot, region::CURRENT)
    }

    /// Overwrites the current orientation.
    #[inline]
    pub fn set_orientation(&self, slot: usize, orientation: Orientation) {
        self.store_f32(slot, region::CURRENT + transform::YAW, orientation.yaw);
        self.store_f32(slot, region::CURRENT + transform::PITCH, orientation.pitch);
        self.store_f32(slot, region::CURRENT + transform::ROLL, orientation.roll);
    }

    /// Host flag word of the current transform.
    #[inline]
    #[must_use]
    pub fn transform_flags(&self, slot: usize) -> u32 {
        self.word32(slot, region::CURRENT + transform::FLAGS)
            .load(Ordering::Relaxed)
    }

    /// Overwrites the host flag word of the current transform.
    #[inline]
    pub fn set_transform_flags(&self, slot: usize, flags: u32) {
        self.word32(slot, region::CURRENT + transform::FLAGS)
            .store(flags, Ordering::Relaxed);
    }

    /// Whole current transform.
    #[must_use]
    pub fn read_transform(&self, slot: usize) -> Transform {
        self.load_transform(slot, region::CURRENT)
    }

    // ========================================================================
    // PREVIOUS TRANSFORM
    // ========================================================================

    /// Previous position.
    #[inline]
    #[must_use]
    pub fn previous_position(&self, slot: usize) -> DVec3 {
        self.load_vec(slot, region::PREVIOUS + transform::X)
    }

    /// Previous orientation.
    #[inline]
    #[must_use]
    pub fn previous_orientation(&self, slot: usize) -> Orientation {
        self.load_orientation(slot, region::PREVIOUS)
    }

    /// Whole previous transform.
    #[must_use]
    pub fn read_previous_transform(&self, slot: usize) -> Transform {
        self.load_transform(slot, region::PREVIOUS)
    }

    /// Copies the current transform region over the previous one.
    ///
    /// Call exactly once per slot per tick, before fresh external state
    /// overwrites the current region. Nothing else writes the previous region.
    #[inline]
    pub fn copy_to_previous(&self, slot: usize) {
        for offset in [transform::X, transform::Y, transform::Z] {
            let bits = self.word64(slot, region::CURRENT + offset).load(Ordering::Relaxed);
            self.word64(slot, region::PREVIOUS + offset)
                .store(bits, Ordering::Relaxed);
        }
        for offset in [transform::YAW, transform::PITCH, transform::ROLL, transform::FLAGS] {
            let bits = self.word32(slot, region::CURRENT + offset).load(Ordering::Relaxed);
            self.word32(slot, region::PREVIOUS + offset)
                .store(bits, Ordering::Relaxed);
        }
    }

    // ========================================================================
    // VELOCITY / ACCELERATION
    // ========================================================================

    /// Velocity.
    #[inline]
    #[must_use]
    pub fn velocity(&self, slot: usize) -> DVec3 {
        self.load_vec(slot, region::VELOCITY + velocity::X)
    }

    /// Overwrites the velocity and refreshes the cached magnitude.
    #[inline]
    pub fn set_velocity(&self, slot: usize, value: DVec3) {
        self.store_vec(slot, region::VELOCITY + velocity::X, value);
        #[allow(clippy::cast_possible_truncation)]
        let magnitude = value.length() as f32;
        self.store_f32(slot, region::VELOCITY + velocity::MAGNITUDE, magnitude);
    }

    /// Cached velocity magnitude.
    #[inline]
    #[must_use]
    pub fn velocity_magnitude(&self, slot: usize) -> f32 {
        self.load_f32(slot, region::VELOCITY + velocity::MAGNITUDE)
    }

    /// Acceleration.
    #[inline]
    #[must_use]
    pub fn acceleration(&self, slot: usize) -> DVec3 {
        self.load_vec(slot, region::ACCELERATION)
    }

    /// Overwrites the acceleration.
    #[inline]
    pub fn set_acceleration(&self, slot: usize, value: DVec3) {
        self.store_vec(slot, region::ACCELERATION, value);
    }

    // ========================================================================
    // METADATA
    // ========================================================================

    /// External id recorded at registration.
    #[inline]
    #[must_use]
    pub fn external_id(&self, slot: usize) -> i32 {
        // i32 and u32 share size and alignment; the field is only ever viewed
        // through this width.
        let bits = self.word32(slot, region::METADATA + metadata::EXTERNAL_ID)
            .load(Ordering::Relaxed);
        i32::from_ne_bytes(bits.to_ne_bytes())
    }

    /// Records the external id.
    #[inline]
    pub fn set_external_id(&self, slot: usize, external_id: i32) {
        self.word32(slot, region::METADATA + metadata::EXTERNAL_ID)
            .store(u32::from_ne_bytes(external_id.to_ne_bytes()), Ordering::Relaxed);
    }

    /// Internal id (the slot index at registration time).
    #[inline]
    #[must_use]
    pub fn internal_id(&self, slot: usize) -> u32 {
        self.word32(slot, region::METADATA + metadata::INTERNAL_ID)
            .load(Ordering::Relaxed)
    }

    /// Records the internal id.
    #[inline]
    pub fn set_internal_id(&self, slot: usize, internal_id: u32) {
        self.word32(slot, region::METADATA + metadata::INTERNAL_ID)
            .store(internal_id, Ordering::Relaxed);
    }

    /// Tick of the most recent inbound sync.
    #[inline]
    #[must_use]
    pub fn last_sync_tick(&self, slot: usize) -> u64 {
        self.word64(slot, region::METADATA + metadata::LAST_SYNC_TICK)
            .load(Ordering::Relaxed)
    }

    /// Stamps the most recent inbound sync.
    #[inline]
    pub fn set_last_sync_tick(&self, slot: usize, tick: u64) {
        self.word64(slot, region::METADATA + metadata::LAST_SYNC_TICK)
            .store(tick, Ordering::Relaxed);
    }

    // ========================================================================
    // DIRTY FLAGS - lock-free, callable from any thread
    // ========================================================================

    #[inline]
    fn dirty_word(&self, slot: usize) -> &AtomicU64 {
        self.word64(slot, region::METADATA + metadata::DIRTY)
    }

    /// Current flag bits.
    #[inline]
    #[must_use]
    pub fn flags(&self, slot: usize) -> DirtyFlags {
        DirtyFlags::from_bits(self.dirty_word(slot).load(Ordering::Acquire))
    }

    /// Sets `flags`, leaving other bits alone.
    #[inline]
    pub fn set_flags(&self, slot: usize, flags: DirtyFlags) {
        self.dirty_word(slot).fetch_or(flags.bits(), Ordering::AcqRel);
    }

    /// Clears `flags`, leaving other bits alone.
    #[inline]
    pub fn clear_flags(&self, slot: usize, flags: DirtyFlags) {
        self.dirty_word(slot).fetch_and(!flags.bits(), Ordering::AcqRel);
    }

    /// Atomically reads and clears the bits in `mask`; returns the bits of
    /// `mask` that were set.
    #[inline]
    pub fn take_flags(&self, slot: usize, mask: DirtyFlags) -> DirtyFlags {
        let previous = self.dirty_word(slot).fetch_and(!mask.bits(), Ordering::AcqRel);
        DirtyFlags::from_bits(previous) & mask
    }

    // ========================================================================
    // WHOLE-BLOCK OPERATIONS
    // ========================================================================

    /// Initializes every region of a block from a host snapshot.
    ///
    /// Previous equals current afterwards; acceleration and dirty bits are
    /// zero.
    pub fn write_snapshot(&self, slot: usize, snapshot: &EntitySnapshot) {
        self.set_position(slot, snapshot.position);
        self.set_orientation(slot, snapshot.orientation);
        self.set_transform_flags(slot, snapshot.flags);
        self.copy_to_previous(slot);
        self.set_velocity(slot, snapshot.velocity);
        self.set_acceleration(slot, DVec3::ZERO);
        self.dirty_word(slot).store(0, Ordering::Release);
    }

    /// Zero-fills a block.
    ///
    /// Only call while the slot is not reachable by other threads
    /// (allocating or removing).
    pub fn zero_block(&self, slot: usize) {
        for offset in (0..BLOCK_SIZE).step_by(8) {
            self.word64(slot, offset).store(0, Ordering::Relaxed);
        }
    }
}

impl Drop for ComponentArena {
    fn drop(&mut self) {
        // SAFETY: `base` came from `alloc_zeroed(self.layout)` and is freed once.
        unsafe {
            dealloc(self.base.as_ptr(), self.layout);
        }
    }
}

// SAFETY: the arena owns its allocation outright and every access goes
// through atomics, so moving it to or sharing it with another thread is sound.
unsafe impl Send for ComponentArena {}
// SAFETY: see above.
unsafe impl Sync for ComponentArena {}
