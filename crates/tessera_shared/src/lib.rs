//! # Tessera Shared
//!
//! Value types used on both sides of the entity bridge.
//!
//! ## CRITICAL RULE
//!
//! This crate must NEVER grow runtime state:
//! - no atomics
//! - no allocation
//! - no threads
//!
//! If you need shared mutable state, it belongs in `tessera_core`.

#![deny(missing_docs)]
#![deny(unsafe_code)]

pub mod constants;
pub mod math;

pub use constants::{
    DEFAULT_CAPACITY, DEFAULT_MAX_DELTA_SECONDS, DEFAULT_MAX_PROBES, MIN_PARALLEL_LEAF,
    PARALLEL_THRESHOLD, SIMD_LANES,
};
pub use math::{lerp_degrees, wrap_degrees, DVec3, Orientation, Transform};
