//! Three-state circuit breaker guarding fallible external calls.
//!
//! One breaker instance wraps each dependency (embedding, vector-store
//! writes, entity extraction) so a failing dependency is isolated without
//! suppressing the others. The OPEN → HALF_OPEN transition happens lazily on
//! the next call attempt after the reset window, not on a timer.

use std::future::Future;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::MemoryError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures in CLOSED before the circuit opens.
    pub failure_threshold: u32,
    /// How long OPEN suppresses calls before a probe is allowed.
    pub reset_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            reset_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    failure_count: u32,
    last_failure_at: Option<Instant>,
    /// HALF_OPEN admits exactly one in-flight probe.
    probe_in_flight: bool,
}

/// Guard around one external dependency.
pub struct CircuitBreaker {
    name: &'static str,
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: &'static str, config: BreakerConfig) -> Self {
        Self {
            name,
            config,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                failure_count: 0,
                last_failure_at: None,
                probe_in_flight: false,
            }),
        }
    }

    /// Run `op` through the breaker. In OPEN, fails immediately with
    /// `CircuitOpen` without invoking the action.
    pub async fn call<T, F, Fut>(&self, op: F) -> Result<T, MemoryError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, MemoryError>>,
    {
        self.before_call()?;

        match op().await {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(err) => {
                self.on_failure();
                Err(err)
            }
        }
    }

    /// Current state, with the lazy OPEN → HALF_OPEN transition applied.
    pub fn state(&self) -> BreakerState {
        let mut inner = self.inner.lock();
        self.maybe_half_open(&mut inner);
        inner.state
    }

    fn maybe_half_open(&self, inner: &mut Inner) {
        if inner.state == BreakerState::Open {
            let elapsed = inner
                .last_failure_at
                .map(|at| at.elapsed())
                .unwrap_or(Duration::MAX);
            if elapsed >= self.config.reset_timeout {
                inner.state = BreakerState::HalfOpen;
                inner.probe_in_flight = false;
                tracing::info!(breaker = self.name, "circuit half-open, admitting one probe");
            }
        }
    }

    fn before_call(&self) -> Result<(), MemoryError> {
        let mut inner = self.inner.lock();
        self.maybe_half_open(&mut inner);

        match inner.state {
            BreakerState::Closed => Ok(()),
            BreakerState::HalfOpen => {
                if inner.probe_in_flight {
                    Err(self.open_error(&inner))
                } else {
                    inner.probe_in_flight = true;
                    Ok(())
                }
            }
            BreakerState::Open => Err(self.open_error(&inner)),
        }
    }

    fn open_error(&self, inner: &Inner) -> MemoryError {
        let retry_after = inner
            .last_failure_at
            .map(|at| self.config.reset_timeout.saturating_sub(at.elapsed()))
            .unwrap_or(self.config.reset_timeout);
        MemoryError::CircuitOpen {
            name: self.name.to_string(),
            retry_after_ms: retry_after.as_millis() as u64,
        }
    }

    fn on_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::HalfOpen => {
                tracing::info!(breaker = self.name, "probe succeeded, circuit closed");
                inner.state = BreakerState::Closed;
                inner.failure_count = 0;
                inner.probe_in_flight = false;
            }
            BreakerState::Closed => {
                inner.failure_count = 0;
            }
            BreakerState::Open => {}
        }
    }

    fn on_failure(&self) {
        let mut inner = self.inner.lock();
        inner.last_failure_at = Some(Instant::now());
        match inner.state {
            BreakerState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold {
                    tracing::warn!(
                        breaker = self.name,
                        failures = inner.failure_count,
                        "failure threshold reached, circuit open"
                    );
                    inner.state = BreakerState::Open;
                }
            }
            BreakerState::HalfOpen => {
                tracing::warn!(breaker = self.name, "probe failed, circuit re-opened");
                inner.state = BreakerState::Open;
                inner.probe_in_flight = false;
            }
            BreakerState::Open => {}
        }
    }
}
