//! Host-side test doubles shared by the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tessera_core::{
    BreakerConfig, BridgeConfig, BridgeContext, DVec3, EntitySnapshot, HostEntity, Orientation,
    SlotHandle,
};

/// Host entity that records every write the bridge makes to it.
#[derive(Debug)]
pub struct SpyEntity {
    id: i32,
    state: Mutex<EntitySnapshot>,
    handle: Mutex<Option<SlotHandle>>,
    pub position_writes: AtomicUsize,
    pub orientation_writes: AtomicUsize,
    pub velocity_writes: AtomicUsize,
    pub bounds_invalidations: AtomicUsize,
}

impl SpyEntity {
    pub fn new(id: i32, snapshot: EntitySnapshot) -> Self {
        Self {
            id,
            state: Mutex::new(snapshot),
            handle: Mutex::new(None),
            position_writes: AtomicUsize::new(0),
            orientation_writes: AtomicUsize::new(0),
            velocity_writes: AtomicUsize::new(0),
            bounds_invalidations: AtomicUsize::new(0),
        }
    }

    pub fn at(id: i32, x: f64, y: f64, z: f64) -> Self {
        Self::new(id, EntitySnapshot::at(DVec3::new(x, y, z), 0.0, 0.0))
    }

    /// Simulates the host moving the entity between ticks.
    pub fn host_moves(&self, position: DVec3, velocity: DVec3) {
        let mut state = self.state.lock();
        state.position = position;
        state.velocity = velocity;
    }

    pub fn state(&self) -> EntitySnapshot {
        *self.state.lock()
    }

    pub fn total_writes(&self) -> usize {
        self.position_writes.load(Ordering::Relaxed)
            + self.orientation_writes.load(Ordering::Relaxed)
            + self.velocity_writes.load(Ordering::Relaxed)
    }
}

impl HostEntity for SpyEntity {
    fn external_id(&self) -> i32 {
        self.id
    }

    fn bridge_handle(&self) -> Option<SlotHandle> {
        *self.handle.lock()
    }

    fn set_bridge_handle(&self, handle: Option<SlotHandle>) {
        *self.handle.lock() = handle;
    }

    fn read_state(&self) -> EntitySnapshot {
        *self.state.lock()
    }

    fn write_position(&self, position: DVec3) {
        self.state.lock().position = position;
        self.position_writes.fetch_add(1, Ordering::Relaxed);
    }

    fn write_orientation(&self, yaw: f32, pitch: f32) {
        let mut state = self.state.lock();
        state.orientation = Orientation::new(yaw, pitch, state.orientation.roll);
        self.orientation_writes.fetch_add(1, Ordering::Relaxed);
    }

    fn write_velocity(&self, velocity: DVec3) {
        self.state.lock().velocity = velocity;
        self.velocity_writes.fetch_add(1, Ordering::Relaxed);
    }

    fn mark_bounds_dirty(&self) {
        self.bounds_invalidations.fetch_add(1, Ordering::Relaxed);
    }
}

/// Small context with a two-thread pool and a fast breaker.
pub fn bridge(capacity: usize) -> Arc<BridgeContext> {
    BridgeContext::new(BridgeConfig {
        worker_threads: 2,
        breaker: BreakerConfig {
            failure_threshold: 3,
            reset_timeout_ms: 50,
            half_open_success_threshold: 2,
        },
        ..BridgeConfig::with_capacity(capacity)
    })
    .expect("test bridge")
}
