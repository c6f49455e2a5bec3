//! # Integration Kernels
//!
//! `position += velocity × dt` over a list of slots, scalar or four slots at
//! a time.
//!
//! The vectorized kernel gathers one component of four slots into a lane
//! array, runs one multiply and one add per lane, and scatters back. Both
//! kernels use exactly that multiply-then-add sequence (never a fused
//! multiply-add), so they agree bit for bit.

// SAFETY: Arch intrinsics below operate on stack arrays of the exact lane width.
#![allow(unsafe_code)]

use tessera_shared::constants::SIMD_LANES;
use tessera_shared::DVec3;

use crate::memory::{ComponentArena, DirtyFlags};

/// Slots processed per vector group.
pub const LANES: usize = SIMD_LANES;

const _: () = assert!(LANES == 4);

// ============================================================================
// LANE ARITHMETIC
// ============================================================================

/// `p[i] = p[i] + v[i] * dt` for every lane.
#[inline]
fn axpy(p: &mut [f64; LANES], v: &[f64; LANES], dt: f64) {
    #[cfg(target_arch = "x86_64")]
    {
        // SAFETY: SSE2 is part of the x86_64 baseline. Each load/store covers
        // two f64s inside a 4-element array.
        unsafe {
            use std::arch::x86_64::{_mm_add_pd, _mm_loadu_pd, _mm_mul_pd, _mm_set1_pd, _mm_storeu_pd};
            let dt2 = _mm_set1_pd(dt);
            for half in 0..2 {
                let offset = half * 2;
                let pv = _mm_loadu_pd(p.as_ptr().add(offset));
                let vv = _mm_loadu_pd(v.as_ptr().add(offset));
                let out = _mm_add_pd(pv, _mm_mul_pd(vv, dt2));
                _mm_storeu_pd(p.as_mut_ptr().add(offset), out);
            }
        }
    }

    #[cfg(target_arch = "aarch64")]
    {
        // SAFETY: NEON is part of the aarch64 baseline. Each load/store covers
        // two f64s inside a 4-element array.
        unsafe {
            use std::arch::aarch64::{vaddq_f64, vdupq_n_f64, vld1q_f64, vmulq_f64, vst1q_f64};
            let dt2 = vdupq_n_f64(dt);
            for half in 0..2 {
                let offset = half * 2;
                let pv = vld1q_f64(p.as_ptr().add(offset));
                let vv = vld1q_f64(v.as_ptr().add(offset));
                let out = vaddq_f64(pv, vmulq_f64(vv, dt2));
                vst1q_f64(p.as_mut_ptr().add(offset), out);
            }
        }
    }

    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    {
        *p = std::array::from_fn(|i| p[i] + v[i] * dt);
    }
}

// ============================================================================
// KERNELS
// ============================================================================

/// Integrates one slot. Returns true if its position bits changed.
#[inline]
pub(crate) fn integrate_slot(arena: &ComponentArena, slot: usize, dt: f64) -> bool {
    let position = arena.position(slot);
    let velocity = arena.velocity(slot);
    let moved = DVec3::new(
        position.x + velocity.x * dt,
        position.y + velocity.y * dt,
        position.z + velocity.z * dt,
    );
    store_if_changed(arena, slot, position, moved)
}

#[inline]
fn store_if_changed(arena: &ComponentArena, slot: usize, old: DVec3, new: DVec3) -> bool {
    let same = old.x.to_bits() == new.x.to_bits()
        && old.y.to_bits() == new.y.to_bits()
        && old.z.to_bits() == new.z.to_bits();
    if same {
        return false;
    }
    arena.set_position(slot, new);
    arena.set_flags(slot, DirtyFlags::POSITION);
    true
}

/// Scalar kernel. Returns how many slots moved.
pub fn integrate_scalar(arena: &ComponentArena, slots: &[u32], dt: f64) -> usize {
    slots
        .iter()
        .filter(|&&slot| integrate_slot(arena, slot as usize, dt))
        .count()
}

/// Four-wide kernel; the tail below one group runs scalar. Returns how many
/// slots moved.
pub fn integrate_vectorized(arena: &ComponentArena, slots: &[u32], dt: f64) -> usize {
    let mut moved = 0;
    let groups = slots.chunks_exact(LANES);
    let tail = groups.remainder();

    for group in groups {
        let ids: [usize; LANES] = std::array::from_fn(|i| group[i] as usize);
        let before: [DVec3; LANES] = std::array::from_fn(|i| arena.position(ids[i]));
        let velocity: [DVec3; LANES] = std::array::from_fn(|i| arena.velocity(ids[i]));

        let mut xs = before.map(|p| p.x);
        let mut ys = before.map(|p| p.y);
        let mut zs = before.map(|p| p.z);
        axpy(&mut xs, &velocity.map(|v| v.x), dt);
        axpy(&mut ys, &velocity.map(|v| v.y), dt);
        axpy(&mut zs, &velocity.map(|v| v.z), dt);

        for lane in 0..LANES {
            let after = DVec3::new(xs[lane], ys[lane], zs[lane]);
            if store_if_changed(arena, ids[lane], before[lane], after) {
                moved += 1;
            }
        }
    }

    moved + integrate_scalar(arena, tail, dt)
}
