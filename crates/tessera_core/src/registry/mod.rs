//! # Entity Slot Registry
//!
//! Lock-free slot allocation, slot lifecycle and external-id lookup.
//!
//! ## Structures
//!
//! - [`FreeList`]: tagged Treiber stack of free slot indices
//! - [`IdIndex`]: open-addressing external-id map with tombstones
//! - [`EntitySlotRegistry`]: the state machine tying both to the arena

mod free_list;
mod handle;
mod hash_index;
mod slots;

pub use free_list::FreeList;
pub use handle::{SlotHandle, SlotState};
pub use hash_index::{IdIndex, InsertError};
pub use slots::{EntitySlotRegistry, Registered};
