//! # Fault Isolation
//!
//! Keeps a failing tick pipeline from taking the host down with it.

mod circuit_breaker;

pub use circuit_breaker::{BreakerState, CircuitBreaker};
