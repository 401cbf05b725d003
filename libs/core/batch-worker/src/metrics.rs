//! Prometheus metrics exposition, following the donor `stream-worker::metrics`
//! module's pattern (lazy global recorder behind `OnceLock`, named-constant
//! module, `MetricsTimer` drop-guard) adapted to the batch-inference domain.

use std::sync::OnceLock;
use std::time::Instant;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub fn init_metrics() -> PrometheusHandle {
    HANDLE
        .get_or_init(|| {
            PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

pub fn handle() -> Option<PrometheusHandle> {
    HANDLE.get().cloned()
}

pub mod names {
    pub const JOBS_SUBMITTED: &str = "inference_jobs_submitted_total";
    pub const JOBS_COMPLETED: &str = "inference_jobs_completed_total";
    pub const JOBS_FAILED: &str = "inference_jobs_failed_total";
    pub const JOBS_DLQ: &str = "inference_jobs_dlq_total";
    pub const JOB_RETRIES: &str = "inference_job_retries_total";
    pub const BATCH_SIZE: &str = "inference_batch_size";
    pub const BATCH_DURATION: &str = "inference_batch_duration_seconds";
    pub const QUEUE_DEPTH: &str = "inference_queue_depth";
    pub const DLQ_SIZE: &str = "inference_dlq_size";
    pub const IN_FLIGHT_JOBS: &str = "inference_in_flight_jobs";
    pub const RECOVERY_RUNS: &str = "inference_recovery_runs_total";
    pub const RECOVERY_REQUEUED: &str = "inference_recovery_requeued_total";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Failed,
    Dlq,
}

pub fn record_job_outcome(outcome: JobOutcome) {
    match outcome {
        JobOutcome::Completed => metrics::counter!(names::JOBS_COMPLETED).increment(1),
        JobOutcome::Failed => metrics::counter!(names::JOBS_FAILED).increment(1),
        JobOutcome::Dlq => metrics::counter!(names::JOBS_DLQ).increment(1),
    }
}

pub fn record_batch(size: usize) {
    metrics::histogram!(names::BATCH_SIZE).record(size as f64);
}

/// Records elapsed wall time to `names::BATCH_DURATION` on drop, regardless of
/// whether the batch succeeded or failed.
pub struct BatchTimer {
    start: Instant,
}

impl BatchTimer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Drop for BatchTimer {
    fn drop(&mut self) {
        metrics::histogram!(names::BATCH_DURATION).record(self.start.elapsed().as_secs_f64());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_timer_does_not_panic_without_recorder() {
        let _timer = BatchTimer::start();
    }
}
