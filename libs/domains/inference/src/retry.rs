//! RetryPolicy (spec §4.5), shared by `BatchExecutor` and `StuckJobRecovery`
//! since the retry counter is keyed by job id regardless of caller.
//!
//! Applies the defect fix SPEC_FULL.md §4.5 instructs: the source re-enqueues
//! without resetting status, relying on StuckJobRecovery as a safety net.
//! This implementation sets `Job.status = QUEUED` before re-enqueuing so the
//! normal retry path does not depend on the recovery path for progress.

use std::sync::Arc;

use crate::entity::JobStatus;
use crate::error::InferenceResult;
use crate::queue::QueueStore;
use crate::repository::JobRepository;

pub struct RetryPolicy {
    queue: Arc<dyn QueueStore>,
    jobs: Arc<dyn JobRepository>,
    max_retries: u32,
}

impl RetryPolicy {
    pub fn new(queue: Arc<dyn QueueStore>, jobs: Arc<dyn JobRepository>, max_retries: u32) -> Self {
        Self {
            queue,
            jobs,
            max_retries,
        }
    }

    /// Reason is informational only (logged, not consulted by policy) --
    /// spec §4.5 is explicit that the policy does not branch on it.
    pub async fn handle_failures(&self, job_ids: &[i64], reason: &str) -> InferenceResult<()> {
        for &job_id in job_ids {
            if let Err(e) = self.handle_one(job_id, reason).await {
                tracing::error!(job_id, error = %e, "retry policy failed to process job");
                return Err(e);
            }
        }
        Ok(())
    }

    async fn handle_one(&self, job_id: i64, reason: &str) -> InferenceResult<()> {
        let attempt = self.queue.incr_retry(job_id).await?;

        if attempt <= self.max_retries {
            tracing::info!(job_id, attempt, reason, "re-enqueuing job for retry");
            self.jobs.set_status(job_id, JobStatus::Queued).await?;
            self.queue.enqueue(job_id).await?;
        } else {
            tracing::warn!(job_id, attempt, reason, "retries exhausted, routing to DLQ");
            self.jobs.set_status(job_id, JobStatus::Failed).await?;
            self.queue.push_dlq(job_id).await?;
            self.queue.clear_retry(job_id).await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::MockQueueStore;
    use crate::repository::MockJobRepository;
    use mockall::predicate::eq;

    #[tokio::test]
    async fn retries_re_enqueue_and_reset_status_to_queued() {
        let mut queue = MockQueueStore::new();
        queue.expect_incr_retry().with(eq(42)).returning(|_| Ok(1));
        queue.expect_enqueue().with(eq(42)).returning(|_| Ok(()));

        let mut jobs = MockJobRepository::new();
        jobs.expect_set_status()
            .withf(|id, status| *id == 42 && *status == JobStatus::Queued)
            .returning(|_, _| Ok(()));

        let policy = RetryPolicy::new(Arc::new(queue), Arc::new(jobs), 3);
        policy.handle_failures(&[42], "preprocess_failed").await.unwrap();
    }

    #[tokio::test]
    async fn exhausted_retries_go_terminal_and_clear_counter() {
        let mut queue = MockQueueStore::new();
        queue.expect_incr_retry().with(eq(7)).returning(|_| Ok(4));
        queue.expect_push_dlq().with(eq(7)).returning(|_| Ok(()));
        queue.expect_clear_retry().with(eq(7)).returning(|_| Ok(()));

        let mut jobs = MockJobRepository::new();
        jobs.expect_set_status()
            .withf(|id, status| *id == 7 && *status == JobStatus::Failed)
            .returning(|_, _| Ok(()));

        let policy = RetryPolicy::new(Arc::new(queue), Arc::new(jobs), 3);
        policy.handle_failures(&[7], "inference_error").await.unwrap();
    }

    #[tokio::test]
    async fn zero_max_retries_makes_first_failure_terminal() {
        let mut queue = MockQueueStore::new();
        queue.expect_incr_retry().returning(|_| Ok(1));
        queue.expect_push_dlq().returning(|_| Ok(()));
        queue.expect_clear_retry().returning(|_| Ok(()));

        let mut jobs = MockJobRepository::new();
        jobs.expect_set_status().returning(|_, _| Ok(()));

        let policy = RetryPolicy::new(Arc::new(queue), Arc::new(jobs), 0);
        policy.handle_failures(&[1], "image_missing").await.unwrap();
    }
}
