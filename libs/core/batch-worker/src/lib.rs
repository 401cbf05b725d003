//! Generic scheduling/worker-loop infrastructure shared by `apps/worker` and
//! `apps/api`: error categorization, resilience (circuit breaker + rate
//! limiter), Prometheus metrics, and the ambient health/admin HTTP router.
//!
//! Adapted from the donor `stream-worker` crate. The Streams-specific pieces
//! (consumer groups, `XADD`/`XREADGROUP` producer/consumer, DLQ-over-Redis-
//! Streams) are not carried forward -- this system's queue is a plain Redis
//! list (`libs/domains/inference::queue`), so only the queue-agnostic
//! ambient concerns (config, error, resilience, metrics, health) remain here.

pub mod config;
pub mod error;
pub mod health;
pub mod metrics;
pub mod resilience;

pub use config::BatchWorkerConfig;
pub use error::{ErrorCategory, RetryStrategy, WorkerError};
pub use health::{health_router, HealthState};
pub use resilience::{CircuitBreaker, CircuitBreakerConfig, RateLimiter, ResilienceError, ResilienceLayer};
