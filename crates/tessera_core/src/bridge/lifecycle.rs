//! # Context Lifecycle
//!
//! `Running → Draining → Closed`, one way only.
//!
//! Every public operation holds an [`InFlightGuard`] while it runs. Shutdown
//! flips the state with a CAS, so exactly one caller performs it, then
//! blocks on a condvar until the guards are gone or the timeout passes.

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{BridgeError, BridgeResult};

/// Where the context is in its life.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum LifecycleState {
    /// Accepting work.
    Running = 0,
    /// Refusing new work, waiting for in-flight work.
    Draining = 1,
    /// Done.
    Closed = 2,
}

impl LifecycleState {
    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Running,
            1 => Self::Draining,
            _ => Self::Closed,
        }
    }
}

/// Shutdown barrier and in-flight counter.
#[derive(Debug)]
pub struct Lifecycle {
    state: AtomicU8,
    in_flight: AtomicUsize,
    drained: Condvar,
    mutex: Mutex<()>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    /// Creates a running lifecycle.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(LifecycleState::Running as u8),
            in_flight: AtomicUsize::new(0),
            drained: Condvar::new(),
            mutex: Mutex::new(()),
        }
    }

    /// Current state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        LifecycleState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Operations currently holding a guard.
    #[inline]
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Admits one operation.
    ///
    /// # Errors
    ///
    /// [`BridgeError::ShutDown`] once shutdown has begun.
    pub fn enter(&self) -> BridgeResult<InFlightGuard<'_>> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let guard = InFlightGuard { lifecycle: self };
        if self.state() == LifecycleState::Running {
            Ok(guard)
        } else {
            // Dropping the guard undoes the increment and wakes a drainer.
            drop(guard);
            Err(BridgeError::ShutDown)
        }
    }

    fn leave(&self) {
        if self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1
            && self.state() != LifecycleState::Running
        {
            let _lock = self.mutex.lock();
            self.drained.notify_all();
        }
    }

    /// Stops admitting work and waits for in-flight operations.
    ///
    /// Returns `Ok(true)` for the caller that performed the shutdown and
    /// `Ok(false)` for everyone else.
    ///
    /// # Errors
    ///
    /// [`BridgeError::ShutdownTimedOut`] if operations were still running at
    /// the deadline. The context is closed regardless.
    pub fn shutdown(&self, timeout: Duration) -> BridgeResult<bool> {
        if self
            .state
            .compare_exchange(
                LifecycleState::Running as u8,
                LifecycleState::Draining as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            return Ok(false);
        }

        let deadline = Instant::now() + timeout;
        let mut guard = self.mutex.lock();
        while self.in_flight() > 0 {
            if self.drained.wait_until(&mut guard, deadline).timed_out() {
                break;
            }
        }
        drop(guard);

        let remaining = self.in_flight();
        self.state
            .store(LifecycleState::Closed as u8, Ordering::SeqCst);
        if remaining > 0 {
            return Err(BridgeError::ShutdownTimedOut {
                in_flight: remaining,
            });
        }
        Ok(true)
    }
}

/// Marks one operation in flight until dropped.
#[must_use = "the operation counts as in flight only while the guard lives"]
#[derive(Debug)]
pub struct InFlightGuard<'a> {
    lifecycle: &'a Lifecycle,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.lifecycle.leave();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_enter_after_shutdown_is_refused() {
        let lifecycle = Lifecycle::new();
        {
            let _guard = lifecycle.enter().unwrap();
            assert_eq!(lifecycle.in_flight(), 1);
        }
        assert_eq!(lifecycle.shutdown(Duration::from_millis(10)), Ok(true));
        assert_eq!(lifecycle.state(), LifecycleState::Closed);
        assert!(matches!(lifecycle.enter(), Err(BridgeError::ShutDown)));
        assert_eq!(lifecycle.in_flight(), 0);
    }

    #[test]
    fn test_second_shutdown_is_a_no_op() {
        let lifecycle = Lifecycle::new();
        assert_eq!(lifecycle.shutdown(Duration::ZERO), Ok(true));
        assert_eq!(lifecycle.shutdown(Duration::ZERO), Ok(false));
    }

    #[test]
    fn test_shutdown_waits_for_guard() {
        let lifecycle = Arc::new(Lifecycle::new());
        let (entered_tx, entered_rx) = crossbeam_channel::bounded(0);

        let worker = {
            let lifecycle = Arc::clone(&lifecycle);
            std::thread::spawn(move || {
                let _guard = lifecycle.enter().unwrap();
                entered_tx.send(()).unwrap();
                std::thread::sleep(Duration::from_millis(50));
            })
        };
        entered_rx.recv().unwrap();

        assert_eq!(lifecycle.shutdown(Duration::from_secs(5)), Ok(true));
        assert_eq!(lifecycle.in_flight(), 0);
        worker.join().unwrap();
    }

    #[test]
    fn test_shutdown_times_out() {
        let lifecycle = Lifecycle::new();
        let guard = lifecycle.enter().unwrap();
        assert_eq!(
            lifecycle.shutdown(Duration::from_millis(20)),
            Err(BridgeError::ShutdownTimedOut { in_flight: 1 })
        );
        assert_eq!(lifecycle.state(), LifecycleState::Closed);
        drop(guard);
        assert_eq!(lifecycle.in_flight(), 0);
    }
}
