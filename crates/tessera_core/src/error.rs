//! # Bridge Error Types
//!
//! All errors that can cross the bridge boundary.
//!
//! Only [`BridgeError::ArenaAllocation`] and [`BridgeError::InvalidConfig`]
//! are fatal, and both can only happen while a context is being built.
//! Everything else is reported and the host keeps running.

use thiserror::Error;

/// Errors that can occur in the entity bridge.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    /// Every slot is in use. Nothing was changed.
    #[error("no free slot: all {capacity} slots are allocated")]
    CapacityExhausted {
        /// Number of slots in the arena.
        capacity: usize,
    },

    /// The registration snapshot carried a NaN or infinite value.
    #[error("entity {external_id}: snapshot field `{field}` is not finite")]
    InvalidSnapshot {
        /// External id that was being registered.
        external_id: i32,
        /// Name of the offending field.
        field: &'static str,
    },

    /// The id index had no free entry within the probe window.
    #[error("entity {external_id}: id index full within {probes} probes")]
    IndexFull {
        /// External id that was being registered.
        external_id: i32,
        /// Probe window that was searched.
        probes: usize,
    },

    /// Registration kept losing races and gave up.
    #[error("entity {external_id}: registration abandoned after {attempts} contended attempts")]
    Contention {
        /// External id that was being registered.
        external_id: i32,
        /// Attempts made.
        attempts: u32,
    },

    /// The data-oriented update pass reported a failure.
    #[error("update pass failed: {0}")]
    UpdatePass(String),

    /// Something in the tick pipeline panicked.
    #[error("tick pipeline panicked: {0}")]
    TickPanicked(String),

    /// Backing memory for the arena could not be obtained.
    #[error("arena allocation of {bytes} bytes failed")]
    ArenaAllocation {
        /// Requested size in bytes.
        bytes: usize,
    },

    /// Configuration file could not be read, parsed or validated.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A simulation driver already exists for this context.
    #[error("simulation driver already claimed")]
    DriverClaimed,

    /// The context has been shut down.
    #[error("bridge is shut down")]
    ShutDown,

    /// Shutdown gave up waiting for in-flight work.
    #[error("shutdown timed out with {in_flight} operations still in flight")]
    ShutdownTimedOut {
        /// Operations that had not finished.
        in_flight: usize,
    },
}

impl BridgeError {
    /// True for the errors the taxonomy calls registration failures
    /// (rolled back, counted, never fatal).
    #[must_use]
    pub const fn is_registration_failure(&self) -> bool {
        matches!(
            self,
            Self::InvalidSnapshot { .. } | Self::IndexFull { .. } | Self::Contention { .. }
        )
    }
}

/// Result type for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;
