//! # Slot Handles
//!
//! Generational references to registry slots.
//!
//! ## Layout
//!
//! Uses a 64-bit ID with 32-bit index and 32-bit generation:
//! - Index: position in the arena
//! - Generation: bumped every time the slot is allocated, so a handle kept
//!   past its entity's unregistration is detectably stale

/// Handle to a registered entity's slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct SlotHandle(u64);

impl SlotHandle {
    /// Creates a handle from index and generation.
    ///
    /// # Arguments
    ///
    /// * `index` - The slot index
    /// * `generation` - The slot's generation when the handle was issued
    #[inline]
    #[must_use]
    pub const fn new(index: u32, generation: u32) -> Self {
        Self(((generation as u64) << 32) | (index as u64))
    }

    /// Returns the index portion of the handle.
    #[inline]
    #[must_use]
    pub const fn index(self) -> u32 {
        self.0 as u32
    }

    /// Index as a `usize`, for arena access.
    #[inline]
    #[must_use]
    pub const fn slot(self) -> usize {
        self.index() as usize
    }

    /// Returns the generation portion of the handle.
    #[inline]
    #[must_use]
    pub const fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// Packed representation.
    #[inline]
    #[must_use]
    pub const fn to_bits(self) -> u64 {
        self.0
    }

    /// Unpacks a handle produced by [`SlotHandle::to_bits`].
    #[inline]
    #[must_use]
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }
}

impl std::fmt::Display for SlotHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}v{}", self.index(), self.generation())
    }
}

/// Lifecycle state of a slot.
///
/// ```text
/// Free ──register──► Allocating ──► Active ──unregister──► Removing ──► Free
///                        │
///                        └──── rollback on failure ─────────────────────► Free
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SlotState {
    /// On the free-list, block zeroed.
    Free = 0,
    /// Popped by a registration that has not finished.
    Allocating = 1,
    /// Registered and visible to lookups and ticks.
    Active = 2,
    /// Being torn down by an unregistration.
    Removing = 3,
}

impl SlotState {
    /// Decodes the stored byte. Unknown values read as `Free`.
    #[inline]
    #[must_use]
    pub const fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Allocating,
            2 => Self::Active,
            3 => Self::Removing,
            _ => Self::Free,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_roundtrip() {
        let handle = SlotHandle::new(12345, 67890);
        assert_eq!(handle.index(), 12345);
        assert_eq!(handle.generation(), 67890);
        assert_eq!(SlotHandle::from_bits(handle.to_bits()), handle);
        assert_eq!(handle.to_string(), "12345v67890");
    }

    #[test]
    fn test_generation_distinguishes_reuse() {
        assert_ne!(SlotHandle::new(3, 1), SlotHandle::new(3, 2));
    }

    #[test]
    fn test_state_decoding() {
        for state in [
            SlotState::Free,
            SlotState::Allocating,
            SlotState::Active,
            SlotState::Removing,
        ] {
            assert_eq!(SlotState::from_u8(state as u8), state);
        }
        assert_eq!(SlotState::from_u8(200), SlotState::Free);
    }
}
