//! # Interpolation Buffer
//!
//! Render-side reader that blends each slot's previous and current transform.
//!
//! The simulation runs at a fixed rate; frames land between ticks. The render
//! thread refreshes the factor once per frame and samples every visible slot
//! with it. Samples come from the last published tick, never from the live
//! arena, so a tick in progress cannot leak into a frame. Nothing here
//! allocates.

use std::sync::Arc;

use tessera_shared::Transform;

use super::publish::FramePublisher;

/// Clamps an interpolation factor into `[0, 1]`. NaN becomes 0.
#[inline]
#[must_use]
pub fn clamp_factor(factor: f32) -> f32 {
    if factor.is_nan() {
        0.0
    } else {
        factor.clamp(0.0, 1.0)
    }
}

/// Per-render-thread interpolation state.
pub struct InterpolationBuffer {
    frames: Arc<FramePublisher>,
    factor: f32,
}

impl InterpolationBuffer {
    /// Creates a buffer reading published frames, factor 0.
    #[must_use]
    pub fn new(frames: Arc<FramePublisher>) -> Self {
        Self { frames, factor: 0.0 }
    }

    /// Stores the frame's interpolation factor.
    ///
    /// # Arguments
    ///
    /// * `factor` - Progress from the previous tick to the current one
    #[inline]
    pub fn on_render_tick(&mut self, factor: f32) {
        self.factor = clamp_factor(factor);
    }

    /// The stored factor.
    #[inline]
    #[must_use]
    pub fn factor(&self) -> f32 {
        self.factor
    }

    /// Ticks published so far. Unchanged between two frames means there is
    /// nothing new to blend towards.
    #[inline]
    #[must_use]
    pub fn published_ticks(&self) -> u64 {
        self.frames.frame_count()
    }

    /// Blends `slot`'s previous and current transform at `t` into `out`.
    ///
    /// Position is `prev·(1−t) + cur·t`; angles follow the shortest arc. At
    /// `t = 0` and `t = 1` the result equals previous and current exactly.
    /// The flag word is taken from current.
    ///
    /// # Panics
    ///
    /// Panics if `slot` is out of range.
    pub fn interpolated_transform(&self, slot: usize, t: f32, out: &mut Transform) {
        let t = clamp_factor(t);
        let (previous, current) = self.frames.read(slot);

        out.position = previous.position.lerp(current.position, f64::from(t));
        out.orientation = previous.orientation.lerp_shortest(current.orientation, t);
        out.flags = current.flags;
    }

    /// [`InterpolationBuffer::interpolated_transform`] at the stored factor.
    #[inline]
    pub fn sample(&self, slot: usize, out: &mut Transform) {
        self.interpolated_transform(slot, self.factor, out);
    }
}
