//! # External-Id Index
//!
//! Open-addressing map from external id to slot index, lock-free, with a
//! bounded linear-probe window.
//!
//! ## Entry Encoding
//!
//! ```text
//! 63            32 31             0
//! ┌──────────────┬────────────────┐
//! │ external id  │   slot + 1     │      0        = never used
//! └──────────────┴────────────────┘      u64::MAX = tombstone
//! ```
//!
//! Removal leaves a tombstone so probe chains stay intact; inserts reuse
//! tombstones. A slot word never returns to empty, which is what lets a scan
//! stop at the first empty word.
//!
//! ## Duplicate Protocol
//!
//! Two registrations of the same id can both claim a word before either sees
//! the other. After claiming, an inserter rescans its window; if any other
//! live word carries its id it retracts its own word and reports
//! [`InsertError::Duplicate`]. Claims and rescans are `SeqCst`, so of two
//! racing inserters at least one sees the other. Both may retract; the
//! registry retries in that case.

use std::sync::atomic::{AtomicU64, Ordering};

const EMPTY: u64 = 0;
const TOMBSTONE: u64 = u64::MAX;

/// Why an insert did not take.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InsertError {
    /// No empty or tombstoned word within the probe window.
    Full,
    /// Another live word already maps this id.
    Duplicate,
}

#[inline]
const fn encode(external_id: i32, slot: u32) -> u64 {
    ((external_id as u32 as u64) << 32) | (slot as u64 + 1)
}

#[inline]
const fn decode_id(word: u64) -> i32 {
    (word >> 32) as u32 as i32
}

#[inline]
const fn decode_slot(word: u64) -> u32 {
    (word as u32).wrapping_sub(1)
}

#[inline]
const fn is_live(word: u64) -> bool {
    word != EMPTY && word != TOMBSTONE
}

/// Murmur3 finalizer; spreads sequential ids across the table.
#[inline]
const fn fmix32(mut h: u32) -> u32 {
    h ^= h >> 16;
    h = h.wrapping_mul(0x85eb_ca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2_ae35);
    h ^= h >> 16;
    h
}

/// Lock-free external-id → slot map.
pub struct IdIndex {
    words: Box<[AtomicU64]>,
    mask: usize,
    max_probes: usize,
}

impl IdIndex {
    /// Creates an index sized for `capacity` live entries.
    ///
    /// The table is the next power of two at or above twice the capacity.
    #[must_use]
    pub fn new(capacity: usize, max_probes: usize) -> Self {
        let size = capacity.saturating_mul(2).max(2).next_power_of_two();
        let words: Box<[AtomicU64]> = (0..size).map(|_| AtomicU64::new(EMPTY)).collect();
        Self {
            words,
            mask: size - 1,
            max_probes: max_probes.clamp(1, size),
        }
    }

    /// Probe window length.
    #[inline]
    #[must_use]
    pub const fn max_probes(&self) -> usize {
        self.max_probes
    }

    /// Number of words in the table.
    #[inline]
    #[must_use]
    pub fn table_size(&self) -> usize {
        self.words.len()
    }

    #[inline]
    fn home(&self, external_id: i32) -> usize {
        fmix32(external_id as u32) as usize & self.mask
    }

    #[inline]
    fn word(&self, home: usize, probe: usize) -> &AtomicU64 {
        &self.words[(home + probe) & self.mask]
    }

    /// Maps `external_id` to `slot`.
    ///
    /// # Errors
    ///
    /// - [`InsertError::Duplicate`] if a live mapping for the id exists or
    ///   appears concurrently; nothing is left behind.
    /// - [`InsertError::Full`] if the window has no reusable word.
    pub fn insert(&self, external_id: i32, slot: u32) -> Result<(), InsertError> {
        let home = self.home(external_id);
        let entry = encode(external_id, slot);

        let mut claimed = None;
        'probe: for probe in 0..self.max_probes {
            let word = self.word(home, probe);
            let mut current = word.load(Ordering::SeqCst);
            loop {
                if is_live(current) {
                    if decode_id(current) == external_id {
                        return Err(InsertError::Duplicate);
                    }
                    continue 'probe;
                }
                match word.compare_exchange(current, entry, Ordering::SeqCst, Ordering::SeqCst) {
                    Ok(_) => {
                        claimed = Some(probe);
                        break 'probe;
                    }
                    Err(actual) => current = actual,
                }
            }
        }
        let Some(mine) = claimed else {
            return Err(InsertError::Full);
        };

        // Rescan for a concurrent claim of the same id.
        for probe in 0..self.max_probes {
            if probe == mine {
                continue;
            }
            let current = self.word(home, probe).load(Ordering::SeqCst);
            if current == EMPTY {
                break;
            }
            if is_live(current) && decode_id(current) == external_id {
                // Only this thread writes over its own live word.
                self.word(home, mine).store(TOMBSTONE, Ordering::SeqCst);
                return Err(InsertError::Duplicate);
            }
        }
        Ok(())
    }

    /// Finds the first slot mapped to `external_id` that `accept` agrees with.
    pub fn find(&self, external_id: i32, mut accept: impl FnMut(u32) -> bool) -> Option<u32> {
        let home = self.home(external_id);
        for probe in 0..self.max_probes {
            let current = self.word(home, probe).load(Ordering::Acquire);
            if current == EMPTY {
                return None;
            }
            if is_live(current) && decode_id(current) == external_id {
                let slot = decode_slot(current);
                if accept(slot) {
                    return Some(slot);
                }
            }
        }
        None
    }

    /// Replaces the `external_id → slot` mapping with a tombstone.
    ///
    /// Returns false if no such mapping was found.
    pub fn remove(&self, external_id: i32, slot: u32) -> bool {
        let home = self.home(external_id);
        let entry = encode(external_id, slot);
        for probe in 0..self.max_probes {
            let word = self.word(home, probe);
            let current = word.load(Ordering::Acquire);
            if current == EMPTY {
                return false;
            }
            if current == entry {
                return word
                    .compare_exchange(entry, TOMBSTONE, Ordering::SeqCst, Ordering::Acquire)
                    .is_ok();
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};

    #[test]
    fn test_insert_find_remove() {
        let index = IdIndex::new(16, 8);
        assert_eq!(index.table_size(), 32);

        index.insert(42, 3).unwrap();
        index.insert(-7, 0).unwrap();
        assert_eq!(index.find(42, |_| true), Some(3));
        assert_eq!(index.find(-7, |_| true), Some(0));
        assert_eq!(index.find(43, |_| true), None);
        assert_eq!(index.find(42, |_| false), None);

        assert!(index.remove(42, 3));
        assert!(!index.remove(42, 3));
        assert_eq!(index.find(42, |_| true), None);
        assert_eq!(index.find(-7, |_| true), Some(0));
    }

    #[test]
    fn test_duplicate_is_rejected() {
        let index = IdIndex::new(8, 8);
        index.insert(5, 1).unwrap();
        assert_eq!(index.insert(5, 2), Err(InsertError::Duplicate));
        assert_eq!(index.find(5, |_| true), Some(1));
    }

    #[test]
    fn test_tombstones_are_reused_and_chains_survive() {
        // Two-word table: every id collides.
        let index = IdIndex::new(1, 2);
        index.insert(1, 0).unwrap();
        index.insert(2, 1).unwrap();
        assert_eq!(index.insert(3, 2), Err(InsertError::Full));

        assert!(index.remove(1, 0));
        assert_eq!(index.find(2, |_| true), Some(1));
        index.insert(3, 2).unwrap();
        assert_eq!(index.find(3, |_| true), Some(2));
    }

    #[test]
    fn test_removed_entry_does_not_hide_later_entries() {
        let index = IdIndex::new(64, 64);
        for id in 0..64 {
            index.insert(id, id as u32).unwrap();
        }
        for id in (0..64).step_by(2) {
            assert!(index.remove(id, id as u32));
        }
        for id in (1..64).step_by(2) {
            assert_eq!(index.find(id, |_| true), Some(id as u32));
        }
    }

    #[test]
    fn test_racing_inserts_of_one_id_leave_at_most_one() {
        for _ in 0..50 {
            let index = Arc::new(IdIndex::new(16, 16));
            let barrier = Arc::new(Barrier::new(4));
            let handles: Vec<_> = (0..4u32)
                .map(|slot| {
                    let index = Arc::clone(&index);
                    let barrier = Arc::clone(&barrier);
                    std::thread::spawn(move || {
                        barrier.wait();
                        index.insert(99, slot).is_ok()
                    })
                })
                .collect();
            let winners = handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|ok| *ok)
                .count();
            assert!(winners <= 1);

            let mut live = 0;
            index.find(99, |_| {
                live += 1;
                false
            });
            assert_eq!(live, winners);
        }
    }
}
