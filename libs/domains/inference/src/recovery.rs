//! StuckJobRecovery (spec §4.9): runs on the Supervisor's timer, not inline
//! in the worker loop. Two independent scans share `RetryPolicy`'s counter,
//! so a job stuck by a crashed worker and a job re-stuck after recovery
//! still draw from the same `MAX_RETRIES` budget (spec §4.5).

use std::sync::Arc;
use std::time::Duration;

use batch_worker::ResilienceLayer;
use chrono::Utc;

use crate::error::{InferenceError, InferenceResult};
use crate::repository::JobRepository;
use crate::retry::RetryPolicy;

const IN_PROGRESS_STUCK_AFTER: Duration = Duration::from_secs(10 * 60);
const QUEUED_STUCK_AFTER: Duration = Duration::from_secs(5 * 60);

pub struct StuckJobRecovery {
    jobs: Arc<dyn JobRepository>,
    retry: Arc<RetryPolicy>,
    resilience: Arc<ResilienceLayer>,
}

impl StuckJobRecovery {
    pub fn new(jobs: Arc<dyn JobRepository>, retry: Arc<RetryPolicy>, resilience: Arc<ResilienceLayer>) -> Self {
        Self { jobs, retry, resilience }
    }

    fn guard(&self) -> InferenceResult<()> {
        self.resilience
            .check()
            .map_err(|e| InferenceError::TransportError(e.to_string()))
    }

    /// A worker crashed mid-inference and never wrote a terminal status;
    /// `updated_at` is the sole staleness signal (spec §3).
    pub async fn recover_stuck_in_progress(&self) -> InferenceResult<usize> {
        self.guard()?;
        let older_than = Utc::now() - IN_PROGRESS_STUCK_AFTER;
        let stuck = match self.jobs.query_stuck_in_progress(older_than).await {
            Ok(stuck) => {
                self.resilience.record_success();
                stuck
            }
            Err(e) => {
                self.resilience.record_failure();
                return Err(e);
            }
        };
        if stuck.is_empty() {
            return Ok(0);
        }
        let ids: Vec<i64> = stuck.iter().map(|j| j.id).collect();
        tracing::warn!(count = ids.len(), "recovering stuck IN_PROGRESS jobs");
        self.retry.handle_failures(&ids, "stuck_in_progress").await?;
        Ok(ids.len())
    }

    /// SubmitHandler crashed before enqueue, or the job was dropped from the
    /// queue without being picked up; `created_at` is the staleness signal
    /// since the job never reached IN_PROGRESS (spec §3).
    pub async fn recover_stuck_queued(&self) -> InferenceResult<usize> {
        self.guard()?;
        let older_than = Utc::now() - QUEUED_STUCK_AFTER;
        let stuck = match self.jobs.query_stuck_queued(older_than).await {
            Ok(stuck) => {
                self.resilience.record_success();
                stuck
            }
            Err(e) => {
                self.resilience.record_failure();
                return Err(e);
            }
        };
        if stuck.is_empty() {
            return Ok(0);
        }
        let ids: Vec<i64> = stuck.iter().map(|j| j.id).collect();
        tracing::warn!(count = ids.len(), "recovering stuck QUEUED jobs");
        self.retry.handle_failures(&ids, "stuck_queued").await?;
        Ok(ids.len())
    }

    /// Runs both scans; called once per `RECOVERY_INTERVAL` by the Supervisor.
    pub async fn run_once(&self) -> InferenceResult<()> {
        let in_progress = self.recover_stuck_in_progress().await?;
        let queued = self.recover_stuck_queued().await?;
        metrics::counter!(batch_worker::metrics::names::RECOVERY_RUNS).increment(1);
        if in_progress + queued > 0 {
            metrics::counter!(batch_worker::metrics::names::RECOVERY_REQUEUED)
                .increment((in_progress + queued) as u64);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{JobModel, JobStatus};
    use crate::queue::MockQueueStore;
    use crate::repository::MockJobRepository;
    use chrono::{DateTime, FixedOffset};

    fn job(id: i64, status: JobStatus) -> JobModel {
        let now: DateTime<FixedOffset> = Utc::now().fixed_offset();
        JobModel {
            id,
            model_id: 1,
            status,
            input_sha256: "deadbeef".repeat(8),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn recovers_stuck_in_progress_jobs_via_retry_policy() {
        let mut jobs = MockJobRepository::new();
        jobs.expect_query_stuck_in_progress()
            .returning(|_| Ok(vec![job(9, JobStatus::InProgress)]));
        jobs.expect_query_stuck_queued().returning(|_| Ok(vec![]));
        jobs.expect_set_status().returning(|_, _| Ok(()));

        let mut queue = MockQueueStore::new();
        queue.expect_incr_retry().returning(|_| Ok(1));
        queue.expect_enqueue().returning(|_| Ok(()));

        let jobs = Arc::new(jobs);
        let retry = Arc::new(RetryPolicy::new(Arc::new(queue), jobs.clone(), 3));
        let resilience = Arc::new(ResilienceLayer::new(None, None));
        let recovery = StuckJobRecovery::new(jobs, retry, resilience);

        let n = recovery.recover_stuck_in_progress().await.unwrap();
        assert_eq!(n, 1);
    }

    #[tokio::test]
    async fn no_stuck_jobs_is_a_no_op() {
        let mut jobs = MockJobRepository::new();
        jobs.expect_query_stuck_queued().returning(|_| Ok(vec![]));

        let queue = MockQueueStore::new();
        let jobs = Arc::new(jobs);
        let retry = Arc::new(RetryPolicy::new(Arc::new(queue), jobs.clone(), 3));
        let resilience = Arc::new(ResilienceLayer::new(None, None));
        let recovery = StuckJobRecovery::new(jobs, retry, resilience);

        let n = recovery.recover_stuck_queued().await.unwrap();
        assert_eq!(n, 0);
    }
}
