//! Error categorization and retry-strategy derivation shared by worker loops.
//!
//! Adapted from the donor `stream-worker` crate's `error.rs`: the Redis-Streams-
//! specific variants (consumer-group / NOGROUP handling) are dropped since this
//! crate backs a plain list queue, but the `ErrorCategory`/`RetryStrategy` split
//! and its jittered-backoff arithmetic are carried over unchanged.

use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("processing error: {0}")]
    Processing(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("queue error: {0}")]
    Queue(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("health check failed: {0}")]
    HealthCheck(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl WorkerError {
    pub fn is_connection_error(&self) -> bool {
        matches!(self, WorkerError::Redis(e) if e.is_connection_dropped() || e.is_connection_refusal())
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, WorkerError::Timeout(_))
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            WorkerError::Redis(_) | WorkerError::Timeout(_) | WorkerError::Queue(_) => {
                ErrorCategory::Transient
            }
            WorkerError::HealthCheck(_) => ErrorCategory::Transient,
            WorkerError::Config(_) | WorkerError::Serialization(_) => ErrorCategory::Permanent,
            WorkerError::Processing(_) | WorkerError::Internal(_) => ErrorCategory::Permanent,
        }
    }
}

/// Coarse classification used to decide whether a failure is worth retrying
/// and, if so, on what schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Likely to succeed if retried (network blip, momentary lock contention).
    Transient,
    /// Will never succeed without an external fix (bad input, bad config).
    Permanent,
    /// Backend is asking callers to slow down.
    RateLimited,
}

impl ErrorCategory {
    pub fn retry_strategy(&self) -> RetryStrategy {
        match self {
            ErrorCategory::Transient => RetryStrategy::ExponentialBackoff {
                base_delay_ms: 1000,
                max_delay_ms: 30_000,
                max_retries: 3,
            },
            ErrorCategory::Permanent => RetryStrategy::NoRetry,
            ErrorCategory::RateLimited => RetryStrategy::ExponentialBackoff {
                base_delay_ms: 5000,
                max_delay_ms: 120_000,
                max_retries: 5,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStrategy {
    NoRetry,
    ExponentialBackoff {
        base_delay_ms: u64,
        max_delay_ms: u64,
        max_retries: u32,
    },
}

impl RetryStrategy {
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<u64> {
        match self {
            RetryStrategy::NoRetry => None,
            RetryStrategy::ExponentialBackoff {
                base_delay_ms,
                max_delay_ms,
                max_retries,
            } => {
                if attempt >= *max_retries {
                    return None;
                }
                let exp = base_delay_ms.saturating_mul(1u64 << attempt.min(20));
                let capped = exp.min(*max_delay_ms);
                Some(apply_jitter(capped))
            }
        }
    }
}

/// +/-25% jitter seeded from the current time; avoids a `rand` dependency for
/// what is otherwise a one-shot, non-cryptographic spread of retry attempts.
fn apply_jitter(delay_ms: u64) -> u64 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);

    let mut hasher = DefaultHasher::new();
    nanos.hash(&mut hasher);
    delay_ms.hash(&mut hasher);
    let r = (hasher.finish() % 1000) as i64 - 500; // [-500, 500)
    let jitter_pct = r as f64 / 2000.0; // +/- 25%
    let jittered = delay_ms as f64 * (1.0 + jitter_pct);
    jittered.max(0.0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_category_retries_with_backoff() {
        let strategy = ErrorCategory::Transient.retry_strategy();
        assert!(matches!(strategy, RetryStrategy::ExponentialBackoff { .. }));
        assert!(strategy.delay_for_attempt(0).is_some());
        assert!(strategy.delay_for_attempt(3).is_none());
    }

    #[test]
    fn permanent_category_never_retries() {
        let strategy = ErrorCategory::Permanent.retry_strategy();
        assert_eq!(strategy, RetryStrategy::NoRetry);
        assert!(strategy.delay_for_attempt(0).is_none());
    }

    #[test]
    fn backoff_is_capped_at_max_delay() {
        let strategy = RetryStrategy::ExponentialBackoff {
            base_delay_ms: 1000,
            max_delay_ms: 5000,
            max_retries: 10,
        };
        let delay = strategy.delay_for_attempt(8).expect("should retry");
        // even with jitter, should not wildly exceed the cap
        assert!(delay <= 5000 + 5000 / 4);
    }
}
