//! # Frame Publication
//!
//! Hands finished ticks to render threads. A tick in progress is never
//! visible: render reads see the transforms the last completed tick
//! published, however far the next tick has got.
//!
//! ## Architecture
//!
//! ```text
//!        tick driver (one writer)               render threads (many)
//!                │                                      │
//!   outbound ────┤                                      │
//!                ▼                                      ▼
//!     ┌──── back bank ────┐                 ┌──── front bank ────┐
//!     │ seq odd           │                 │ seq (even)         │
//!     │ copy bound slots  │                 │ copy one slot      │
//!     │ seq even          │                 │ seq unchanged? ok  │
//!     └─────────┬─────────┘                 └────────────────────┘
//!               │
//!               └──► front index ^= 1, frame count += 1
//!                    old front catches up with the slots just written
//! ```
//!
//! Each bank holds the previous and current transform of every slot. A
//! bank's sequence is odd while it is being written; a reader that saw it
//! odd, or saw it move while copying, starts over on whichever bank is
//! front by then. Writes always land on the bank readers are not pointed
//! at, so retries only happen to a reader that straddles a swap.

use std::sync::atomic::{fence, AtomicBool, AtomicU64, AtomicUsize, Ordering};

use tessera_shared::{DVec3, Orientation, Transform};

use crate::memory::ComponentArena;

const WORDS_PER_TRANSFORM: usize = 5;
const WORDS_PER_SLOT: usize = WORDS_PER_TRANSFORM * 2;

// ============================================================================
// WORD ENCODING
// ============================================================================

fn encode(transform: &Transform, out: &mut [u64]) {
    let orientation = transform.orientation;
    out[0] = transform.position.x.to_bits();
    out[1] = transform.position.y.to_bits();
    out[2] = transform.position.z.to_bits();
    out[3] = u64::from(orientation.yaw.to_bits()) | (u64::from(orientation.pitch.to_bits()) << 32);
    out[4] = u64::from(orientation.roll.to_bits()) | (u64::from(transform.flags) << 32);
}

#[allow(clippy::cast_possible_truncation)]
fn decode(words: &[u64]) -> Transform {
    Transform {
        position: DVec3::new(
            f64::from_bits(words[0]),
            f64::from_bits(words[1]),
            f64::from_bits(words[2]),
        ),
        orientation: Orientation::new(
            f32::from_bits(words[3] as u32),
            f32::from_bits((words[3] >> 32) as u32),
            f32::from_bits(words[4] as u32),
        ),
        flags: (words[4] >> 32) as u32,
    }
}

// ============================================================================
// BANK
// ============================================================================

/// One full copy of the published transforms, guarded by a sequence.
struct Bank {
    sequence: AtomicU64,
    words: Box<[AtomicU64]>,
}

impl Bank {
    fn new(capacity: usize) -> Self {
        Self {
            sequence: AtomicU64::new(0),
            words: (0..capacity * WORDS_PER_SLOT)
                .map(|_| AtomicU64::new(0))
                .collect(),
        }
    }

    #[inline]
    fn slot_words(&self, slot: usize) -> &[AtomicU64] {
        &self.words[slot * WORDS_PER_SLOT..(slot + 1) * WORDS_PER_SLOT]
    }

    fn begin_write(&self) {
        let sequence = self.sequence.load(Ordering::Relaxed);
        self.sequence.store(sequence.wrapping_add(1), Ordering::Relaxed);
        fence(Ordering::Release);
    }

    fn end_write(&self) {
        let sequence = self.sequence.load(Ordering::Relaxed);
        self.sequence.store(sequence.wrapping_add(1), Ordering::Release);
    }

    fn store(&self, slot: usize, previous: &Transform, current: &Transform) {
        let mut encoded = [0_u64; WORDS_PER_SLOT];
        encode(previous, &mut encoded[..WORDS_PER_TRANSFORM]);
        encode(current, &mut encoded[WORDS_PER_TRANSFORM..]);
        for (word, value) in self.slot_words(slot).iter().zip(encoded) {
            word.store(value, Ordering::Relaxed);
        }
    }

    fn copy_slot_from(&self, source: &Bank, slot: usize) {
        for (word, from) in self.slot_words(slot).iter().zip(source.slot_words(slot)) {
            word.store(from.load(Ordering::Relaxed), Ordering::Relaxed);
        }
    }

    /// `(previous, current)` for `slot`, or `None` if a write overlapped.
    fn try_read(&self, slot: usize) -> Option<(Transform, Transform)> {
        let before = self.sequence.load(Ordering::Acquire);
        if before & 1 == 1 {
            return None;
        }

        let mut words = [0_u64; WORDS_PER_SLOT];
        for (value, word) in words.iter_mut().zip(self.slot_words(slot)) {
            *value = word.load(Ordering::Relaxed);
        }

        fence(Ordering::Acquire);
        if self.sequence.load(Ordering::Relaxed) != before {
            return None;
        }
        Some((
            decode(&words[..WORDS_PER_TRANSFORM]),
            decode(&words[WORDS_PER_TRANSFORM..]),
        ))
    }
}

// ============================================================================
// PUBLISHER
// ============================================================================

/// Double-buffered, tick-consistent view of every slot's last two
/// transforms.
///
/// ## Usage
///
/// ```rust,ignore
/// // Tick driver, after outbound sync:
/// frames.publish(&arena, &bound_slots);
///
/// // Any render thread, any time:
/// let (previous, current) = frames.read(slot);
/// ```
///
/// A slot shows what the last tick it was bound in published; before its
/// first tick it reads as zeros (or whatever its previous owner left).
pub struct FramePublisher {
    banks: [Bank; 2],
    /// Bank render reads go to. Writes go to the other one.
    front: AtomicUsize,
    frame_count: AtomicU64,
    write_locked: AtomicBool,
    capacity: usize,
}

impl FramePublisher {
    /// Creates a publisher for `capacity` slots with nothing published.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            banks: [Bank::new(capacity), Bank::new(capacity)],
            front: AtomicUsize::new(0),
            frame_count: AtomicU64::new(0),
            write_locked: AtomicBool::new(false),
            capacity,
        }
    }

    /// Number of slots.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Frames published so far.
    #[inline]
    #[must_use]
    pub fn frame_count(&self) -> u64 {
        self.frame_count.load(Ordering::Acquire)
    }

    /// Publishes the previous and current transform of every slot in
    /// `slots`, then makes them visible to readers in one swap.
    ///
    /// # Arguments
    ///
    /// * `arena` - Source of the transforms; must not change during the call
    /// * `slots` - Slots to publish; others keep what they last published
    ///
    /// # Panics
    ///
    /// Panics if two threads publish at once or a slot is out of range.
    pub fn publish(&self, arena: &ComponentArena, slots: &[u32]) {
        let was_locked = self.write_locked.swap(true, Ordering::AcqRel);
        assert!(!was_locked, "concurrent frame publish; only the tick driver publishes");

        let front = self.front.load(Ordering::Acquire);
        let back = &self.banks[front ^ 1];

        back.begin_write();
        for &slot in slots {
            let slot = slot as usize;
            back.store(
                slot,
                &arena.read_previous_transform(slot),
                &arena.read_transform(slot),
            );
        }
        back.end_write();

        self.front.store(front ^ 1, Ordering::Release);
        self.frame_count.fetch_add(1, Ordering::AcqRel);

        // The old front is two frames behind for these slots; bring it level
        // so the next publish starts from this frame.
        let cold = &self.banks[front];
        cold.begin_write();
        for &slot in slots {
            cold.copy_slot_from(back, slot as usize);
        }
        cold.end_write();

        self.write_locked.store(false, Ordering::Release);
    }

    /// `(previous, current)` transform of `slot` as of the last published
    /// frame. Never blocks on a tick; retries only across a swap.
    ///
    /// # Panics
    ///
    /// Panics if `slot` is out of range.
    #[must_use]
    pub fn read(&self, slot: usize) -> (Transform, Transform) {
        assert!(
            slot < self.capacity,
            "slot {slot} outside publisher of {}",
            self.capacity
        );
        loop {
            let bank = &self.banks[self.front.load(Ordering::Acquire)];
            if let Some(pair) = bank.try_read(slot) {
                return pair;
            }
            std::hint::spin_loop();
        }
    }
}

impl std::fmt::Debug for FramePublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FramePublisher")
            .field("capacity", &self.capacity)
            .field("frames", &self.frame_count())
            .finish_non_exhaustive()
    }
}
