//! # Synchronization
//!
//! Everything that moves entity state across the bridge:
//!
//! - [`BatchSyncEngine`]: inbound/outbound copies and position integration
//! - [`FramePublisher`]: double-buffered hand-off of finished ticks to render
//! - [`InterpolationBuffer`]: render-time blend of the last two ticks
//!
//! Phases run strictly in order within a tick: inbound, update pass,
//! outbound, publish. Render reads only ever see published ticks.

mod batch;
mod interpolation;
mod publish;
mod simd;

pub use batch::{BatchSyncEngine, Binding, ExecutionPolicy, IntegrationKernel, OutboundStats};
pub use interpolation::{clamp_factor, InterpolationBuffer};
pub use publish::FramePublisher;
pub use simd::{integrate_scalar, integrate_vectorized, LANES};
