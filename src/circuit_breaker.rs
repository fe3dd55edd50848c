/*!
 * # Circuit Breaker
 *
 * Guards calls to a remote dependency. After `failure_threshold` consecutive
 * failures the circuit opens and calls fail fast until `timeout` elapses;
 * then a single half-open probe decides whether to close it again.
 */

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::warn;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Circuit is closed, allowing requests
    Closed,
    /// Circuit is open, rejecting requests
    Open,
    /// Circuit is half-open, admitting one probe at a time to test recovery
    HalfOpen,
}

/// Circuit breaker configuration
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Maximum number of failures before opening the circuit
    pub failure_threshold: u32,
    /// Duration to wait before transitioning from Open to HalfOpen
    pub timeout: Duration,
    /// Number of successful requests needed in HalfOpen to close the circuit
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout: Duration::from_secs(60),
            success_threshold: 1,
        }
    }
}

#[derive(Debug)]
struct CircuitBreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    opened_at: Option<Instant>,
    /// Start of the probe currently admitted in half-open
    probe_started: Option<Instant>,
}

/// Circuit breaker implementation
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: Arc<Mutex<CircuitBreakerState>>,
}

/// Circuit breaker errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CircuitBreakerError<E> {
    #[error("Circuit breaker is open")]
    CircuitOpen,
    #[error("{0}")]
    Inner(E),
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, timeout: Duration, success_threshold: u32) -> Self {
        Self::with_config(CircuitBreakerConfig {
            failure_threshold,
            timeout,
            success_threshold,
        })
    }

    pub fn with_config(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(CircuitBreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                opened_at: None,
                probe_started: None,
            })),
        }
    }

    /// Runs `fut` under the breaker. Every error counts as a failure.
    pub async fn call<F, R, E>(&self, fut: F) -> Result<R, CircuitBreakerError<E>>
    where
        F: Future<Output = Result<R, E>>,
    {
        self.call_with(fut, |_| true).await
    }

    /// Runs `fut` under the breaker; only errors for which `is_failure`
    /// returns true move the breaker towards open. Other errors are passed
    /// through and count as a healthy round-trip.
    pub async fn call_with<F, R, E, P>(
        &self,
        fut: F,
        is_failure: P,
    ) -> Result<R, CircuitBreakerError<E>>
    where
        F: Future<Output = Result<R, E>>,
        P: Fn(&E) -> bool,
    {
        if !self.can_execute() {
            return Err(CircuitBreakerError::CircuitOpen);
        }

        match fut.await {
            Ok(result) => {
                self.on_success();
                Ok(result)
            }
            Err(err) => {
                if is_failure(&err) {
                    self.on_failure();
                } else {
                    self.on_success();
                }
                Err(CircuitBreakerError::Inner(err))
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, CircuitBreakerState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn can_execute(&self) -> bool {
        let mut state = self.lock();

        match state.state {
            CircuitState::Closed => true,
            // A probe that never reported back (its caller was dropped) is
            // given up on after `timeout`.
            CircuitState::HalfOpen => match state.probe_started {
                Some(started) if started.elapsed() < self.config.timeout => false,
                _ => {
                    state.probe_started = Some(Instant::now());
                    true
                }
            },
            CircuitState::Open => match state.opened_at {
                Some(opened) if opened.elapsed() >= self.config.timeout => {
                    state.state = CircuitState::HalfOpen;
                    state.success_count = 0;
                    state.probe_started = Some(Instant::now());
                    true
                }
                _ => false,
            },
        }
    }

    fn on_success(&self) {
        let mut state = self.lock();
        state.probe_started = None;

        match state.state {
            CircuitState::Closed => {
                state.failure_count = 0;
            }
            CircuitState::HalfOpen | CircuitState::Open => {
                state.success_count += 1;
                if state.success_count >= self.config.success_threshold {
                    state.state = CircuitState::Closed;
                    state.failure_count = 0;
                    state.success_count = 0;
                    state.opened_at = None;
                }
            }
        }
    }

    fn on_failure(&self) {
        let mut state = self.lock();
        state.probe_started = None;
        state.failure_count += 1;

        match state.state {
            CircuitState::Closed => {
                if state.failure_count >= self.config.failure_threshold {
                    warn!(
                        failures = state.failure_count,
                        "circuit breaker opening after consecutive failures"
                    );
                    state.state = CircuitState::Open;
                    state.opened_at = Some(Instant::now());
                }
            }
            CircuitState::HalfOpen => {
                state.state = CircuitState::Open;
                state.success_count = 0;
                state.opened_at = Some(Instant::now());
            }
            CircuitState::Open => {}
        }
    }

    /// Get the current state of the circuit breaker
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }
}
