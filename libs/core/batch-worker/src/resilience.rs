//! Circuit breaker + token-bucket rate limiter guarding QueueStore/JobRepository
//! calls from cascading failure during a Redis/Postgres outage.
//!
//! Carried over from the donor `stream-worker::resilience` module essentially
//! unchanged -- the breaker/limiter pair has no Streams-specific logic inside
//! it, it is purely a call-site guard.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::config::BatchWorkerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub open_duration: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            open_duration: Duration::from_secs(30),
        }
    }
}

pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: RwLock<CircuitState>,
    failures: AtomicU32,
    successes: AtomicU32,
    opened_at: RwLock<Option<Instant>>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: RwLock::new(CircuitState::Closed),
            failures: AtomicU32::new(0),
            successes: AtomicU32::new(0),
            opened_at: RwLock::new(None),
        }
    }

    pub fn can_execute(&self) -> bool {
        let state = *self.state.read().unwrap();
        match state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let opened_at = *self.opened_at.read().unwrap();
                match opened_at {
                    Some(t) if t.elapsed() >= self.config.open_duration => {
                        *self.state.write().unwrap() = CircuitState::HalfOpen;
                        self.successes.store(0, Ordering::SeqCst);
                        true
                    }
                    _ => false,
                }
            }
        }
    }

    pub fn record_success(&self) {
        let state = *self.state.read().unwrap();
        match state {
            CircuitState::Closed => {
                self.failures.store(0, Ordering::SeqCst);
            }
            CircuitState::HalfOpen => {
                let successes = self.successes.fetch_add(1, Ordering::SeqCst) + 1;
                if successes >= self.config.success_threshold {
                    *self.state.write().unwrap() = CircuitState::Closed;
                    self.failures.store(0, Ordering::SeqCst);
                }
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let state = *self.state.read().unwrap();
        match state {
            CircuitState::Closed => {
                let failures = self.failures.fetch_add(1, Ordering::SeqCst) + 1;
                if failures >= self.config.failure_threshold {
                    self.trip();
                }
            }
            CircuitState::HalfOpen => {
                self.trip();
            }
            CircuitState::Open => {}
        }
    }

    fn trip(&self) {
        *self.state.write().unwrap() = CircuitState::Open;
        *self.opened_at.write().unwrap() = Some(Instant::now());
    }

    pub fn state(&self) -> CircuitState {
        *self.state.read().unwrap()
    }

    pub fn reset(&self) {
        *self.state.write().unwrap() = CircuitState::Closed;
        self.failures.store(0, Ordering::SeqCst);
        self.successes.store(0, Ordering::SeqCst);
        *self.opened_at.write().unwrap() = None;
    }
}

/// Simple token-bucket rate limiter: refills fully every `window`.
pub struct RateLimiter {
    max_tokens: u32,
    tokens: AtomicU32,
    window: Duration,
    window_start: RwLock<Instant>,
    refills: AtomicU64,
}

impl RateLimiter {
    pub fn new(max_per_window: u32, window: Duration) -> Self {
        Self {
            max_tokens: max_per_window,
            tokens: AtomicU32::new(max_per_window),
            window,
            window_start: RwLock::new(Instant::now()),
            refills: AtomicU64::new(0),
        }
    }

    pub fn try_acquire(&self) -> bool {
        let elapsed = self.window_start.read().unwrap().elapsed();
        if elapsed >= self.window {
            self.tokens.store(self.max_tokens, Ordering::SeqCst);
            *self.window_start.write().unwrap() = Instant::now();
            self.refills.fetch_add(1, Ordering::SeqCst);
        }

        let mut current = self.tokens.load(Ordering::SeqCst);
        loop {
            if current == 0 {
                return false;
            }
            match self.tokens.compare_exchange(
                current,
                current - 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum ResilienceError {
    #[error("circuit breaker open, refusing call")]
    CircuitOpen,
    #[error("rate limit exceeded")]
    RateLimited,
}

/// Combines a circuit breaker and an optional rate limiter behind a single
/// `check()` gate, called before touching Redis/Postgres.
pub struct ResilienceLayer {
    breaker: Option<CircuitBreaker>,
    limiter: Option<RateLimiter>,
}

impl ResilienceLayer {
    pub fn new(breaker: Option<CircuitBreaker>, limiter: Option<RateLimiter>) -> Self {
        Self { breaker, limiter }
    }

    /// Builds the breaker/limiter pair the Supervisor's recovery timer and
    /// the worker loop both pass through before touching Redis or Postgres,
    /// from the `ENABLE_CIRCUIT_BREAKER`/`ENABLE_RATE_LIMITER`/`RATE_LIMIT_RPS`
    /// knobs in `BatchWorkerConfig`.
    pub fn from_config(config: &BatchWorkerConfig) -> Self {
        let breaker = config
            .enable_circuit_breaker
            .then(|| CircuitBreaker::new(CircuitBreakerConfig::default()));
        let limiter = config
            .enable_rate_limiter
            .then(|| RateLimiter::new(config.rate_limit_rps, Duration::from_secs(1)));
        Self::new(breaker, limiter)
    }

    pub fn check(&self) -> Result<(), ResilienceError> {
        if let Some(b) = &self.breaker {
            if !b.can_execute() {
                return Err(ResilienceError::CircuitOpen);
            }
        }
        if let Some(l) = &self.limiter {
            if !l.try_acquire() {
                return Err(ResilienceError::RateLimited);
            }
        }
        Ok(())
    }

    pub fn record_success(&self) {
        if let Some(b) = &self.breaker {
            b.record_success();
        }
    }

    pub fn record_failure(&self) {
        if let Some(b) = &self.breaker {
            b.record_failure();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn breaker_trips_after_threshold_failures() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 2,
            success_threshold: 1,
            open_duration: Duration::from_millis(50),
        });
        assert!(cb.can_execute());
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.can_execute());
    }

    #[test]
    fn breaker_half_opens_after_duration_and_closes_on_success() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            success_threshold: 1,
            open_duration: Duration::from_millis(10),
        });
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        std::thread::sleep(Duration::from_millis(20));
        assert!(cb.can_execute());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn rate_limiter_blocks_after_budget_exhausted() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }
}
