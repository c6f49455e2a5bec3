//! # Component Block Layout
//!
//! Every slot owns one fixed-size block. Offsets are bytes from the block
//! base; every `f64`/`u64` field sits on an 8-byte boundary and every block
//! starts on a cache line.
//!
//! ```text
//!   0 ┌──────────────────────────────┐
//!     │ current transform      (40)  │ x y z:f64  yaw pitch roll:f32  flags:u32
//!  40 ├──────────────────────────────┤
//!     │ previous transform     (40)  │ same layout, written only by copy_to_previous
//!  80 ├──────────────────────────────┤
//!     │ velocity               (32)  │ vx vy vz:f64  |v|:f32  pad
//! 112 ├──────────────────────────────┤
//!     │ acceleration           (24)  │ ax ay az:f64
//! 136 ├──────────────────────────────┤
//!     │ metadata               (24)  │ ext id:i32  int id:u32  dirty:u64  tick:u64
//! 160 ├──────────────────────────────┤
//!     │ padding to cache line        │
//! 192 └──────────────────────────────┘
//! ```

use std::ops::{BitAnd, BitOr, BitOrAssign, Not};

/// Cache line size the arena aligns to.
pub const CACHE_LINE: usize = 64;

/// Size of one transform region.
pub const TRANSFORM_SIZE: usize = 40;

/// Region offsets within a block.
pub mod region {
    /// Current transform.
    pub const CURRENT: usize = 0;
    /// Previous transform (interpolation source).
    pub const PREVIOUS: usize = 40;
    /// Velocity plus cached magnitude.
    pub const VELOCITY: usize = 80;
    /// Acceleration.
    pub const ACCELERATION: usize = 112;
    /// Metadata.
    pub const METADATA: usize = 136;
    /// First byte past the metadata.
    pub const END: usize = 160;
}

/// Field offsets within a transform region.
pub mod transform {
    /// Position X (f64).
    pub const X: usize = 0;
    /// Position Y (f64).
    pub const Y: usize = 8;
    /// Position Z (f64).
    pub const Z: usize = 16;
    /// Yaw (f32).
    pub const YAW: usize = 24;
    /// Pitch (f32).
    pub const PITCH: usize = 28;
    /// Roll (f32).
    pub const ROLL: usize = 32;
    /// Host flag word (u32).
    pub const FLAGS: usize = 36;
}

/// Field offsets within the velocity region.
pub mod velocity {
    /// X (f64).
    pub const X: usize = 0;
    /// Y (f64).
    pub const Y: usize = 8;
    /// Z (f64).
    pub const Z: usize = 16;
    /// Cached magnitude (f32).
    pub const MAGNITUDE: usize = 24;
}

/// Field offsets within the metadata region.
pub mod metadata {
    /// External id (i32).
    pub const EXTERNAL_ID: usize = 0;
    /// Internal id (u32).
    pub const INTERNAL_ID: usize = 4;
    /// Dirty/flag bitset (u64).
    pub const DIRTY: usize = 8;
    /// Tick of the last inbound sync (u64).
    pub const LAST_SYNC_TICK: usize = 16;
}

/// Block size, rounded up to whole cache lines.
pub const BLOCK_SIZE: usize = (region::END + CACHE_LINE - 1) & !(CACHE_LINE - 1);

const _: () = assert!(BLOCK_SIZE == 192);
const _: () = assert!(region::PREVIOUS == region::CURRENT + TRANSFORM_SIZE);
const _: () = assert!((region::METADATA + metadata::DIRTY) % 8 == 0);
const _: () = assert!(region::VELOCITY % 8 == 0 && region::ACCELERATION % 8 == 0);

/// Per-slot dirty bitset stored in the metadata region.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct DirtyFlags(u64);

impl DirtyFlags {
    /// Nothing changed.
    pub const NONE: Self = Self(0);
    /// Current position changed in the arena.
    pub const POSITION: Self = Self(1 << 0);
    /// Current yaw/pitch/roll changed in the arena.
    pub const ORIENTATION: Self = Self(1 << 1);
    /// Velocity changed in the arena.
    pub const VELOCITY: Self = Self(1 << 2);
    /// Position or orientation changed.
    pub const TRANSFORM: Self = Self(Self::POSITION.0 | Self::ORIENTATION.0);
    /// Every bit outbound sync consumes.
    pub const SYNC: Self = Self(Self::TRANSFORM.0 | Self::VELOCITY.0);
    /// Slot is being torn down.
    pub const PENDING_REMOVAL: Self = Self(1 << 63);

    /// Wraps raw bits.
    #[inline]
    #[must_use]
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    /// Raw bits.
    #[inline]
    #[must_use]
    pub const fn bits(self) -> u64 {
        self.0
    }

    /// True if no bit is set.
    #[inline]
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True if every bit of `other` is set.
    #[inline]
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// True if any bit of `other` is set.
    #[inline]
    #[must_use]
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }
}

impl BitOr for DirtyFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for DirtyFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for DirtyFlags {
    type Output = Self;
    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl Not for DirtyFlags {
    type Output = Self;
    fn not(self) -> Self {
        Self(!self.0)
    }
}
