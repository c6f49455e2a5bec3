//! # Tessera Core
//!
//! Lock-free, off-heap entity bridge between a host simulation's live
//! objects and a packed, data-oriented component store.
//!
//! - Fixed-capacity arena allocated once, cache-line aligned
//! - Lock-free slot registry with generational handles
//! - Inbound/outbound batch sync, parallel above a size threshold
//! - Vectorized position integration, bit-identical to scalar
//! - Circuit breaker around every tick
//!
//! ## Architecture Rules
//!
//! 1. **No allocation in the hot path** - slots and scratch buffers are reused
//! 2. **No locks on the data plane** - CAS for lifecycle, atomics for fields
//! 3. **A failed tick never reaches the host** - errors and panics stop at the driver
//!
//! ## Example
//!
//! ```rust,ignore
//! use tessera_core::{BridgeConfig, BridgeContext, KinematicPass};
//!
//! let bridge = BridgeContext::new(BridgeConfig::from_toml_file("bridge.toml")?)?;
//! for entity in &entities {
//!     bridge.register_entity(entity)?;
//! }
//!
//! let mut driver = bridge.simulation_driver()?;
//! driver.on_simulation_tick(0.05, &entities, &mut KinematicPass);
//!
//! let mut render = bridge.interpolation_buffer();
//! render.on_render_tick(0.5);
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod bridge;
pub mod config;
pub mod error;
pub mod fault;
pub mod host;
pub mod memory;
pub mod metrics;
pub mod registry;
pub mod sync;

pub use bridge::{
    BridgeContext, KinematicPass, LifecycleState, SimulationDriver, TickOutcome, TickReport,
    UpdateFrame, UpdatePass,
};
pub use config::{BreakerConfig, BridgeConfig};
pub use error::{BridgeError, BridgeResult};
pub use fault::{BreakerState, CircuitBreaker};
pub use host::{EntitySnapshot, HostEntity};
pub use memory::{ComponentArena, DirtyFlags, BLOCK_SIZE};
pub use metrics::{BridgeMetrics, MetricsSnapshot};
pub use registry::{EntitySlotRegistry, Registered, SlotHandle, SlotState};
pub use sync::{
    BatchSyncEngine, Binding, ExecutionPolicy, FramePublisher, InterpolationBuffer,
    IntegrationKernel, OutboundStats,
};
pub use tessera_shared::{DVec3, Orientation, Transform};
