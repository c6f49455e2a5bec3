//! # Bridge Tuning Constants
//!
//! Defaults for the bridge configuration. Every value here can be overridden
//! through `BridgeConfig`; these are what you get when the config is silent.

// =============================================================================
// CAPACITY
// =============================================================================

/// Number of pre-allocated entity slots.
pub const DEFAULT_CAPACITY: usize = 16_384;

/// Upper bound on linear probing in the external-id index.
pub const DEFAULT_MAX_PROBES: usize = 32;

// =============================================================================
// BATCH EXECUTION
// =============================================================================

/// Batches smaller than this run on the calling thread.
pub const PARALLEL_THRESHOLD: usize = 256;

/// Parallel bisection stops once a range is this small.
pub const MIN_PARALLEL_LEAF: usize = 64;

/// Slots gathered per vectorized integration group.
pub const SIMD_LANES: usize = 4;

// =============================================================================
// TIMING
// =============================================================================

/// Largest tick delta accepted before clamping (four 20 TPS ticks).
///
/// Caps extrapolation after a frame hitch.
pub const DEFAULT_MAX_DELTA_SECONDS: f32 = 0.25;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leaf_is_smaller_than_threshold() {
        assert!(MIN_PARALLEL_LEAF < PARALLEL_THRESHOLD);
        assert_eq!(MIN_PARALLEL_LEAF % SIMD_LANES, 0);
    }
}
