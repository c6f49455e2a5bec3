//! # Memory Management
//!
//! The off-heap component arena and its byte layout.
//!
//! ## Design Philosophy
//!
//! All memory is allocated once when the bridge starts. While it runs:
//! - No heap allocations for entity state
//! - Slots are recycled, never freed
//! - Blocks are zero-filled on release

mod arena;
pub mod layout;

pub use arena::ComponentArena;
pub use layout::{DirtyFlags, BLOCK_SIZE, CACHE_LINE};
