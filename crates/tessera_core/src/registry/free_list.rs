//! # Lock-Free Free-List
//!
//! A Treiber stack of slot indices threaded through a `next` array.
//!
//! The head word packs a 32-bit tag above the 32-bit top index. Every push
//! and pop bumps the tag, so a head that was popped and re-pushed between a
//! reader's load and its CAS no longer compares equal.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// End-of-list marker.
const NIL: u32 = u32::MAX;

#[inline]
const fn pack(tag: u32, index: u32) -> u64 {
    ((tag as u64) << 32) | index as u64
}

#[inline]
const fn unpack(word: u64) -> (u32, u32) {
    ((word >> 32) as u32, word as u32)
}

/// Lock-free stack of free slot indices.
pub struct FreeList {
    head: AtomicU64,
    next: Box<[AtomicU32]>,
}

impl FreeList {
    /// Creates a list holding every index in `0..capacity`.
    ///
    /// Pops come out in ascending order until the first push.
    #[must_use]
    pub fn new(capacity: u32) -> Self {
        let next: Box<[AtomicU32]> = (0..capacity)
            .map(|i| AtomicU32::new(if i + 1 < capacity { i + 1 } else { NIL }))
            .collect();
        let top = if capacity == 0 { NIL } else { 0 };
        Self {
            head: AtomicU64::new(pack(0, top)),
            next,
        }
    }

    /// Pops a free index.
    ///
    /// Returns `None` when the list is empty.
    pub fn pop(&self) -> Option<u32> {
        let mut head = self.head.load(Ordering::Acquire);
        loop {
            let (tag, top) = unpack(head);
            if top == NIL {
                return None;
            }
            let next = self.next[top as usize].load(Ordering::Relaxed);
            match self.head.compare_exchange_weak(
                head,
                pack(tag.wrapping_add(1), next),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(top),
                Err(current) => head = current,
            }
        }
    }

    /// Pushes an index back.
    ///
    /// The caller must own `index` (popped it and has not pushed it since).
    pub fn push(&self, index: u32) {
        let mut head = self.head.load(Ordering::Acquire);
        loop {
            let (tag, top) = unpack(head);
            self.next[index as usize].store(top, Ordering::Relaxed);
            match self.head.compare_exchange_weak(
                head,
                pack(tag.wrapping_add(1), index),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(current) => head = current,
            }
        }
    }

    /// True if nothing is left to pop. Racy by nature.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        unpack(self.head.load(Ordering::Acquire)).1 == NIL
    }
}
