//! # Bridge Configuration
//!
//! Loaded once at startup, usually from a TOML file shipped with the host:
//!
//! ```toml
//! capacity = 16384
//! parallel_threshold = 256
//! min_leaf = 64
//! max_delta_seconds = 0.25
//!
//! [breaker]
//! failure_threshold = 5
//! reset_timeout_ms = 5000
//! half_open_success_threshold = 3
//! ```
//!
//! Missing keys fall back to the defaults in `tessera_shared::constants`.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tessera_shared::constants::{
    DEFAULT_CAPACITY, DEFAULT_MAX_DELTA_SECONDS, DEFAULT_MAX_PROBES, MIN_PARALLEL_LEAF,
    PARALLEL_THRESHOLD,
};

use crate::error::{BridgeError, BridgeResult};

/// Largest capacity whose slot indices survive the id-index entry encoding.
pub const MAX_CAPACITY: usize = (u32::MAX - 2) as usize;

/// Circuit breaker thresholds.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BreakerConfig {
    /// Consecutive failures (while closed) that trip the breaker.
    pub failure_threshold: u32,
    /// Cool-down after the last failure before a probe tick is allowed.
    pub reset_timeout_ms: u64,
    /// Consecutive successes (while half-open) that close the breaker.
    pub half_open_success_threshold: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout_ms: 5_000,
            half_open_success_threshold: 3,
        }
    }
}

impl BreakerConfig {
    /// Reset timeout as a [`Duration`].
    #[must_use]
    pub const fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }
}

/// Top-level bridge configuration.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    /// Number of entity slots, fixed for the life of the context.
    pub capacity: usize,
    /// Linear-probe bound in the external-id index.
    pub max_probes: usize,
    /// How many times a contended registration restarts before giving up.
    pub max_register_attempts: u32,
    /// Batches at or above this size are split across the worker pool.
    pub parallel_threshold: usize,
    /// Smallest range a parallel split will produce.
    pub min_leaf: usize,
    /// Worker threads for batch sync; 0 lets rayon pick.
    pub worker_threads: usize,
    /// Tick deltas are clamped to `[0, max_delta_seconds]`.
    pub max_delta_seconds: f32,
    /// How long `shutdown` waits for in-flight work.
    pub shutdown_timeout_ms: u64,
    /// Circuit breaker thresholds.
    pub breaker: BreakerConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            max_probes: DEFAULT_MAX_PROBES,
            max_register_attempts: 8,
            parallel_threshold: PARALLEL_THRESHOLD,
            min_leaf: MIN_PARALLEL_LEAF,
            worker_threads: 0,
            max_delta_seconds: DEFAULT_MAX_DELTA_SECONDS,
            shutdown_timeout_ms: 2_000,
            breaker: BreakerConfig::default(),
        }
    }
}

impl BridgeConfig {
    /// Default configuration with a different slot count.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }

    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::InvalidConfig`] on a syntax error, an unknown
    /// key, or a value that fails [`BridgeConfig::validate`].
    pub fn from_toml_str(source: &str) -> BridgeResult<Self> {
        let config: Self =
            toml::from_str(source).map_err(|e| BridgeError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::InvalidConfig`] if the file cannot be read or
    /// its contents are invalid.
    pub fn from_toml_file(path: impl AsRef<Path>) -> BridgeResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|e| BridgeError::InvalidConfig(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&source)
    }

    /// Checks every value is usable.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::InvalidConfig`] naming the first bad value.
    pub fn validate(&self) -> BridgeResult<()> {
        let fail = |msg: String| Err(BridgeError::InvalidConfig(msg));

        if self.capacity == 0 || self.capacity > MAX_CAPACITY {
            return fail(format!(
                "capacity must be in 1..={MAX_CAPACITY}, got {}",
                self.capacity
            ));
        }
        if self.max_probes == 0 {
            return fail("max_probes must be non-zero".into());
        }
        if self.max_register_attempts == 0 {
            return fail("max_register_attempts must be non-zero".into());
        }
        if self.min_leaf == 0 {
            return fail("min_leaf must be non-zero".into());
        }
        if self.parallel_threshold < self.min_leaf {
            return fail(format!(
                "parallel_threshold ({}) must not be below min_leaf ({})",
                self.parallel_threshold, self.min_leaf
            ));
        }
        if !self.max_delta_seconds.is_finite() || self.max_delta_seconds <= 0.0 {
            return fail(format!(
                "max_delta_seconds must be positive, got {}",
                self.max_delta_seconds
            ));
        }
        if self.breaker.failure_threshold == 0 || self.breaker.half_open_success_threshold == 0 {
            return fail("breaker thresholds must be non-zero".into());
        }
        Ok(())
    }

    /// Shutdown wait as a [`Duration`].
    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Clamps a raw tick delta into `[0, max_delta_seconds]`. NaN becomes 0.
    #[inline]
    #[must_use]
    pub fn clamp_delta(&self, delta_seconds: f32) -> f32 {
        if delta_seconds.is_nan() || delta_seconds <= 0.0 {
            0.0
        } else {
            delta_seconds.min(self.max_delta_seconds)
        }
    }
}
