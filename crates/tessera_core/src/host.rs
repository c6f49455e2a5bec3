//! # Host Adapter
//!
//! The narrow contract the host's live entity objects implement so the bridge
//! can read them in and write them back. The bridge never sees the host's own
//! class hierarchy, only this trait.
//!
//! Methods take `&self`: the host decides how its objects guard their own
//! fields. Outbound sync may call the write methods from worker threads, but
//! never for the same entity from two threads in the same phase.

use serde::{Deserialize, Serialize};
use tessera_shared::{DVec3, Orientation};

use crate::error::{BridgeError, BridgeResult};
use crate::registry::SlotHandle;

/// State read from a host entity: everything inbound sync copies.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    /// World position.
    pub position: DVec3,
    /// Orientation in degrees.
    pub orientation: Orientation,
    /// Velocity in world units per second.
    pub velocity: DVec3,
    /// Host-defined flag word (on-ground, sneaking, ...), carried untouched.
    pub flags: u32,
}

impl EntitySnapshot {
    /// Snapshot at rest with the given position and heading.
    #[must_use]
    pub const fn at(position: DVec3, yaw: f32, pitch: f32) -> Self {
        Self {
            position,
            orientation: Orientation::new(yaw, pitch, 0.0),
            velocity: DVec3::ZERO,
            flags: 0,
        }
    }

    /// Same snapshot with a velocity.
    #[must_use]
    pub fn with_velocity(mut self, velocity: DVec3) -> Self {
        self.velocity = velocity;
        self
    }

    /// Rejects snapshots that would poison the arena.
    ///
    /// # Errors
    ///
    /// [`BridgeError::InvalidSnapshot`] naming the first non-finite field.
    pub fn validate(&self, external_id: i32) -> BridgeResult<()> {
        let field = if !self.position.is_finite() {
            "position"
        } else if !self.orientation.is_finite() {
            "orientation"
        } else if !self.velocity.is_finite() {
            "velocity"
        } else {
            return Ok(());
        };
        Err(BridgeError::InvalidSnapshot { external_id, field })
    }
}

/// Capabilities the bridge needs from a host entity.
pub trait HostEntity: Send + Sync {
    /// The host's identifier for this entity.
    fn external_id(&self) -> i32;

    /// Handle stored by the last successful registration, if any.
    fn bridge_handle(&self) -> Option<SlotHandle>;

    /// Stores or clears the bridge back-reference.
    fn set_bridge_handle(&self, handle: Option<SlotHandle>);

    /// Reads the entity's current position, orientation and velocity.
    fn read_state(&self) -> EntitySnapshot;

    /// Writes a position computed by the bridge.
    fn write_position(&self, position: DVec3);

    /// Writes yaw and pitch computed by the bridge.
    fn write_orientation(&self, yaw: f32, pitch: f32);

    /// Writes a velocity computed by the bridge.
    fn write_velocity(&self, velocity: DVec3);

    /// Tells the host its bounding volume is stale.
    ///
    /// Called after every [`HostEntity::write_position`].
    fn mark_bounds_dirty(&self);
}
