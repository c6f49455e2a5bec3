//! # Bridge
//!
//! The host-facing surface: one [`BridgeContext`] per host, one
//! [`SimulationDriver`] for the tick thread, and any number of
//! interpolation buffers for render threads.
//!
//! ## Tick
//!
//! ```text
//! CircuitBreaker::allow_request
//!     → inbound sync   (host → arena, previous ← current first)
//!     → UpdatePass     (arena only, marks dirty bits)
//!     → outbound sync  (arena → host, dirty regions only)
//!     → record success / failure
//! ```

mod context;
mod driver;
mod lifecycle;
mod pass;

pub use context::BridgeContext;
pub use driver::{SimulationDriver, TickOutcome, TickReport};
pub use lifecycle::{InFlightGuard, Lifecycle, LifecycleState};
pub use pass::{KinematicPass, UpdateFrame, UpdatePass};
