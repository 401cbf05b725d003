//! Worker tuning knobs, assembled via a builder the way the donor
//! `stream-worker::config::WorkerConfig` is -- loaded from the environment
//! once at startup and threaded down into `BatchCollector`/`Supervisor`.

use core_config::{env_or_default, ConfigError, FromEnv};

/// Tuning for the collect -> execute -> recover loop a worker process runs.
#[derive(Debug, Clone)]
pub struct BatchWorkerConfig {
    /// How long `collect_batch` blocks for the first job id, in ms.
    pub first_wait_ms: u64,
    /// Micro-batching window: how long to keep draining after the first id.
    pub window_ms: u64,
    /// Maximum jobs per batch.
    pub max_size: usize,
    /// Number of worker tasks the Supervisor keeps alive.
    pub worker_count: usize,
    /// Per-job inference timeout budget, multiplied by batch size at call time.
    pub inference_timeout_secs: u64,
    /// Retry budget shared by RetryPolicy and StuckJobRecovery.
    pub max_retries: u32,
    /// How often the Supervisor runs StuckJobRecovery, in seconds.
    pub recovery_interval_secs: u64,
    /// Liveness check cadence for the Supervisor's worker monitor, in seconds.
    pub liveness_interval_secs: u64,
    /// Bind port for the worker binary's own health/metrics admin listener.
    pub health_port: u16,
    pub enable_circuit_breaker: bool,
    pub enable_rate_limiter: bool,
    pub rate_limit_rps: u32,
}

impl BatchWorkerConfig {
    pub fn new() -> Self {
        Self {
            first_wait_ms: 5000,
            window_ms: 30,
            max_size: 8,
            worker_count: 2,
            inference_timeout_secs: 10,
            max_retries: 3,
            recovery_interval_secs: 600,
            liveness_interval_secs: 3,
            health_port: 8082,
            enable_circuit_breaker: true,
            enable_rate_limiter: false,
            rate_limit_rps: 100,
        }
    }

    pub fn with_worker_count(mut self, count: usize) -> Self {
        self.worker_count = count;
        self
    }

    pub fn with_window_ms(mut self, window_ms: u64) -> Self {
        self.window_ms = window_ms;
        self
    }

    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_inference_timeout_secs(mut self, secs: u64) -> Self {
        self.inference_timeout_secs = secs;
        self
    }

    pub fn with_recovery_interval_secs(mut self, secs: u64) -> Self {
        self.recovery_interval_secs = secs;
        self
    }

    pub fn with_health_port(mut self, port: u16) -> Self {
        self.health_port = port;
        self
    }
}

impl Default for BatchWorkerConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl FromEnv for BatchWorkerConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let parse = |key: &str, default: &str| -> Result<u64, ConfigError> {
            env_or_default(key, default)
                .parse()
                .map_err(|e| ConfigError::ParseError {
                    key: key.to_string(),
                    details: format!("{}", e),
                })
        };

        let worker_count: usize = env_or_default("WORKER_COUNT", "2")
            .parse()
            .map_err(|e| ConfigError::ParseError {
                key: "WORKER_COUNT".to_string(),
                details: format!("{}", e),
            })?;

        let max_size: usize = env_or_default("BATCH_MAX_SIZE", "8")
            .parse()
            .map_err(|e| ConfigError::ParseError {
                key: "BATCH_MAX_SIZE".to_string(),
                details: format!("{}", e),
            })?;

        let max_retries: u32 = env_or_default("MAX_RETRIES", "3")
            .parse()
            .map_err(|e| ConfigError::ParseError {
                key: "MAX_RETRIES".to_string(),
                details: format!("{}", e),
            })?;

        let health_port: u16 = env_or_default("WORKER_HEALTH_PORT", "8082")
            .parse()
            .map_err(|e| ConfigError::ParseError {
                key: "WORKER_HEALTH_PORT".to_string(),
                details: format!("{}", e),
            })?;

        Ok(Self {
            first_wait_ms: parse("BATCH_FIRST_WAIT_MS", "5000")?,
            window_ms: parse("BATCH_WINDOW_MS", "30")?,
            max_size,
            worker_count,
            inference_timeout_secs: parse("INFERENCE_TIMEOUT", "10")?,
            max_retries,
            recovery_interval_secs: parse("RECOVERY_INTERVAL", "600")?,
            liveness_interval_secs: parse("LIVENESS_INTERVAL_SECS", "3")?,
            health_port,
            enable_circuit_breaker: env_or_default("ENABLE_CIRCUIT_BREAKER", "true") == "true",
            enable_rate_limiter: env_or_default("ENABLE_RATE_LIMITER", "false") == "true",
            rate_limit_rps: env_or_default("RATE_LIMIT_RPS", "100")
                .parse()
                .unwrap_or(100),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_values() {
        let config = BatchWorkerConfig::new();
        assert_eq!(config.first_wait_ms, 5000);
        assert_eq!(config.window_ms, 30);
        assert_eq!(config.max_size, 8);
        assert_eq!(config.worker_count, 2);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.recovery_interval_secs, 600);
    }

    #[test]
    fn builder_overrides_apply() {
        let config = BatchWorkerConfig::new()
            .with_worker_count(4)
            .with_window_ms(0)
            .with_max_retries(0);
        assert_eq!(config.worker_count, 4);
        assert_eq!(config.window_ms, 0);
        assert_eq!(config.max_retries, 0);
    }

    #[test]
    fn from_env_reads_overrides() {
        temp_env::with_vars(
            [
                ("WORKER_COUNT", Some("5")),
                ("BATCH_WINDOW_MS", Some("0")),
                ("MAX_RETRIES", Some("0")),
            ],
            || {
                let config = BatchWorkerConfig::from_env().unwrap();
                assert_eq!(config.worker_count, 5);
                assert_eq!(config.window_ms, 0);
                assert_eq!(config.max_retries, 0);
            },
        );
    }
}
