// SPDX-License-Identifier: Apache-2.0

//! Circuit breaker guarding calls against a repeatedly failing backend.
//!
//! Converts a slow, expensive failure (network timeout against a crashing
//! function) into an immediate, cheap one once a threshold is crossed, while
//! still periodically re-probing for recovery.
//!
//! States: CLOSED (normal) → OPEN (fast-fail) → HALF_OPEN (trial) →
//! CLOSED | OPEN. Concurrent callers arriving while the breaker is HALF_OPEN
//! may each run their own trial; whichever outcome lands decides the next
//! state.

use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::error::{EmberError, EmberResult};

/// Breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation; calls pass through.
    Closed,
    /// Fast-failing; calls are rejected without touching the backend.
    Open,
    /// Cooling-off elapsed; the next call is a recovery trial.
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failures: u32,
    last_failure: Option<Instant>,
}

/// Per-backend failure tracker.
///
/// State is mutated under a short-held lock, never across an await point.
#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    recovery_timeout: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            failure_threshold,
            recovery_timeout,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failures: 0,
                last_failure: None,
            }),
        }
    }

    /// Current breaker state.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().unwrap().state
    }

    /// Current consecutive-failure count.
    pub fn failure_count(&self) -> u32 {
        self.inner.lock().unwrap().failures
    }

    /// Execute `f`, opening or closing the circuit based on its outcome.
    ///
    /// While OPEN and inside the recovery window, fails with `CircuitOpen`
    /// without invoking `f` at all.
    pub async fn call<F, Fut, T>(&self, f: F) -> EmberResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = EmberResult<T>>,
    {
        let trial = {
            let mut inner = self.inner.lock().unwrap();
            match inner.state {
                CircuitState::Open => {
                    let cooling = inner
                        .last_failure
                        .map(|at| at.elapsed() <= self.recovery_timeout)
                        .unwrap_or(false);
                    if cooling {
                        return Err(EmberError::CircuitOpen {
                            failures: inner.failures,
                        });
                    }
                    inner.state = CircuitState::HalfOpen;
                    info!("Circuit breaker transitioning to half-open");
                    true
                }
                CircuitState::HalfOpen => true,
                CircuitState::Closed => false,
            }
        };

        match f().await {
            Ok(value) => {
                if trial {
                    let mut inner = self.inner.lock().unwrap();
                    inner.state = CircuitState::Closed;
                    inner.failures = 0;
                    inner.last_failure = None;
                    info!("Circuit breaker recovered, back to closed");
                }
                Ok(value)
            }
            Err(e) => {
                let mut inner = self.inner.lock().unwrap();
                inner.failures += 1;
                inner.last_failure = Some(Instant::now());

                // A failed trial reopens immediately; otherwise open once the
                // threshold is crossed.
                if inner.failures >= self.failure_threshold || trial {
                    inner.state = CircuitState::Open;
                    warn!(
                        failures = inner.failures,
                        error = %e,
                        "Circuit breaker opened"
                    );
                }

                Err(e)
            }
        }
    }
}
