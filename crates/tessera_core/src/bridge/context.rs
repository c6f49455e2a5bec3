//! # Bridge Context
//!
//! Owns the arena, registry, sync engine, breaker and metrics for one host.
//! Built once, shared by `Arc`, dropped when the last handle goes; there is
//! no global instance.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, info, warn};

use super::driver::SimulationDriver;
use super::lifecycle::{Lifecycle, LifecycleState};
use crate::config::BridgeConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::fault::CircuitBreaker;
use crate::host::{EntitySnapshot, HostEntity};
use crate::memory::ComponentArena;
use crate::metrics::{BridgeMetrics, MetricsSnapshot};
use crate::registry::{EntitySlotRegistry, Registered, SlotHandle};
use crate::sync::{BatchSyncEngine, FramePublisher, InterpolationBuffer};

/// Everything one bridge instance owns.
///
/// # Example
///
/// ```rust,ignore
/// let bridge = BridgeContext::new(BridgeConfig::default())?;
/// bridge.register_entity(&zombie)?;
///
/// let mut driver = bridge.simulation_driver()?;
/// driver.on_simulation_tick(0.05, &entities, &mut KinematicPass);
/// ```
pub struct BridgeContext {
    config: BridgeConfig,
    arena: Arc<ComponentArena>,
    registry: EntitySlotRegistry,
    engine: BatchSyncEngine,
    frames: Arc<FramePublisher>,
    breaker: CircuitBreaker,
    metrics: BridgeMetrics,
    despawn_tx: Sender<SlotHandle>,
    despawn_rx: Receiver<SlotHandle>,
    driver_claimed: AtomicBool,
    lifecycle: Lifecycle,
}

impl BridgeContext {
    /// Validates `config`, allocates the arena and starts the worker pool.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::InvalidConfig`] for a bad configuration or a worker
    ///   pool that will not start
    /// - [`BridgeError::ArenaAllocation`] if the arena cannot be allocated
    pub fn new(config: BridgeConfig) -> BridgeResult<Arc<Self>> {
        config.validate()?;

        let arena = Arc::new(ComponentArena::new(config.capacity)?);
        let registry = EntitySlotRegistry::from_config(&config);
        let engine = BatchSyncEngine::new(&config)?;
        let frames = Arc::new(FramePublisher::new(config.capacity));
        let breaker = CircuitBreaker::new(&config.breaker);
        let (despawn_tx, despawn_rx) = crossbeam_channel::unbounded();

        info!(
            capacity = config.capacity,
            arena_bytes = arena.byte_len(),
            workers = engine.worker_count(),
            "entity bridge started"
        );

        Ok(Arc::new(Self {
            config,
            arena,
            registry,
            engine,
            frames,
            breaker,
            metrics: BridgeMetrics::new(),
            despawn_tx,
            despawn_rx,
            driver_claimed: AtomicBool::new(false),
            lifecycle: Lifecycle::new(),
        }))
    }

    // ========================================================================
    // REGISTRATION
    // ========================================================================

    /// Registers `external_id` with an initial snapshot.
    ///
    /// Registering an id that is already active returns its handle and
    /// changes nothing.
    ///
    /// # Errors
    ///
    /// Capacity, registration and lifecycle errors from [`BridgeError`].
    pub fn register(&self, external_id: i32, snapshot: &EntitySnapshot) -> BridgeResult<SlotHandle> {
        let _guard = self.lifecycle.enter()?;

        match self.registry.register(&self.arena, external_id, snapshot) {
            Ok(Registered::Created(handle)) => {
                self.metrics.record_registration();
                debug!(external_id, %handle, "entity registered");
                Ok(handle)
            }
            Ok(Registered::Existing(handle)) => Ok(handle),
            Err(err) => {
                if matches!(err, BridgeError::CapacityExhausted { .. }) {
                    self.metrics.record_capacity_rejection();
                } else if err.is_registration_failure() {
                    self.metrics.record_registration_failure();
                }
                warn!(external_id, error = %err, "registration failed");
                Err(err)
            }
        }
    }

    /// Registers a host entity and stores the handle on it.
    ///
    /// # Errors
    ///
    /// As [`BridgeContext::register`]; the entity is left untouched on error.
    pub fn register_entity<E: HostEntity + ?Sized>(&self, entity: &E) -> BridgeResult<SlotHandle> {
        let handle = self.register(entity.external_id(), &entity.read_state())?;
        entity.set_bridge_handle(Some(handle));
        Ok(handle)
    }

    // ========================================================================
    // UNREGISTRATION
    // ========================================================================

    /// Unregisters the slot `handle` names.
    ///
    /// Returns `Ok(false)` for stale handles and repeated calls.
    ///
    /// # Errors
    ///
    /// [`BridgeError::ShutDown`] after shutdown.
    pub fn unregister(&self, handle: SlotHandle) -> BridgeResult<bool> {
        let _guard = self.lifecycle.enter()?;
        Ok(self.unregister_with(handle, || {}))
    }

    /// Unregisters whatever slot `external_id` is bound to.
    ///
    /// # Errors
    ///
    /// [`BridgeError::ShutDown`] after shutdown.
    pub fn unregister_external(&self, external_id: i32) -> BridgeResult<bool> {
        let _guard = self.lifecycle.enter()?;
        Ok(self
            .registry
            .lookup(external_id)
            .is_some_and(|handle| self.unregister_with(handle, || {})))
    }

    /// Unregisters a host entity and clears its back-reference.
    ///
    /// # Errors
    ///
    /// [`BridgeError::ShutDown`] after shutdown.
    pub fn unregister_entity<E: HostEntity + ?Sized>(&self, entity: &E) -> BridgeResult<bool> {
        let _guard = self.lifecycle.enter()?;
        let Some(handle) = entity
            .bridge_handle()
            .or_else(|| self.registry.lookup(entity.external_id()))
        else {
            return Ok(false);
        };

        let removed = self.unregister_with(handle, || entity.set_bridge_handle(None));
        if !removed && entity.bridge_handle() == Some(handle) {
            // Stale back-reference from an earlier unregistration.
            entity.set_bridge_handle(None);
        }
        Ok(removed)
    }

    fn unregister_with(&self, handle: SlotHandle, clear_back_reference: impl FnOnce()) -> bool {
        let removed = self.registry.unregister(&self.arena, handle, |handle| {
            clear_back_reference();
            // The receiver lives in `self`, so the send cannot fail.
            let _ = self.despawn_tx.send(handle);
        });
        if removed {
            self.metrics.record_unregistration();
            debug!(%handle, "entity unregistered");
        }
        removed
    }

    // ========================================================================
    // QUERIES
    // ========================================================================

    /// Handle of the active slot bound to `external_id`.
    #[must_use]
    pub fn lookup(&self, external_id: i32) -> Option<SlotHandle> {
        self.registry.lookup(external_id)
    }

    /// Current counters.
    #[must_use]
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics
            .snapshot(&self.breaker, self.registry.active_count())
    }

    /// Live counters.
    #[inline]
    #[must_use]
    pub fn metrics(&self) -> &BridgeMetrics {
        &self.metrics
    }

    /// The tick circuit breaker.
    #[inline]
    #[must_use]
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// The component arena.
    #[inline]
    #[must_use]
    pub fn arena(&self) -> &Arc<ComponentArena> {
        &self.arena
    }

    /// The slot registry.
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &EntitySlotRegistry {
        &self.registry
    }

    /// The batch sync engine.
    #[inline]
    #[must_use]
    pub fn engine(&self) -> &BatchSyncEngine {
        &self.engine
    }

    /// Ticks as published for render threads.
    #[inline]
    #[must_use]
    pub fn frames(&self) -> &Arc<FramePublisher> {
        &self.frames
    }

    /// The configuration this context was built with.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    // ========================================================================
    // DRIVERS
    // ========================================================================

    /// Claims the tick driver. Only one exists at a time; dropping it
    /// releases the claim.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::DriverClaimed`] while another driver is alive
    /// - [`BridgeError::ShutDown`] after shutdown
    pub fn simulation_driver(self: &Arc<Self>) -> BridgeResult<SimulationDriver> {
        let _guard = self.lifecycle.enter()?;
        if self
            .driver_claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(BridgeError::DriverClaimed);
        }
        Ok(SimulationDriver::new(Arc::clone(self)))
    }

    /// A render-thread interpolation buffer over this context's published
    /// ticks.
    #[must_use]
    pub fn interpolation_buffer(&self) -> InterpolationBuffer {
        InterpolationBuffer::new(Arc::clone(&self.frames))
    }

    pub(crate) fn release_driver(&self) {
        self.driver_claimed.store(false, Ordering::Release);
    }

    pub(crate) fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    pub(crate) fn despawn_receiver(&self) -> &Receiver<SlotHandle> {
        &self.despawn_rx
    }

    // ========================================================================
    // SHUTDOWN
    // ========================================================================

    /// Stops accepting work and waits for in-flight operations.
    ///
    /// Returns `Ok(true)` for the call that shut the context down and
    /// `Ok(false)` for every later or concurrent call.
    ///
    /// # Errors
    ///
    /// [`BridgeError::ShutdownTimedOut`] if work was still running after
    /// `shutdown_timeout_ms`. The context is closed regardless.
    pub fn shutdown(&self) -> BridgeResult<bool> {
        let result = self.lifecycle.shutdown(self.config.shutdown_timeout());
        match &result {
            Ok(true) => {
                let metrics = self.metrics_snapshot();
                info!(
                    ticks = metrics.tick_count,
                    failed_ticks = metrics.failed_ticks,
                    active = metrics.active_entities,
                    "entity bridge shut down"
                );
            }
            Ok(false) => {}
            Err(err) => warn!(error = %err, "entity bridge shutdown timed out"),
        }
        result
    }

    /// True once shutdown has begun.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.lifecycle.state() != LifecycleState::Running
    }
}

impl std::fmt::Debug for BridgeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeContext")
            .field("capacity", &self.registry.capacity())
            .field("active", &self.registry.active_count())
            .field("breaker", &self.breaker)
            .field("lifecycle", &self.lifecycle.state())
            .finish_non_exhaustive()
    }
}
