//! Repository trait seams, mockable the way the donor workspace mocks its
//! own domain repositories (`#[cfg_attr(test, mockall::automock)]` on a
//! `Send + Sync` async trait), so `BatchExecutor`/`RetryPolicy`/
//! `StuckJobRecovery` unit tests never need a live Postgres.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use crate::entity::{JobModel, JobStatus, ModelVersionModel, ResultModel};
use crate::error::InferenceResult;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn create_job(&self, model_id: i64, sha256: &str) -> InferenceResult<JobModel>;

    async fn get(&self, id: i64) -> InferenceResult<Option<JobModel>>;

    /// Newest-first, excluding `FAILED` (spec §4.8 fallback dedup lookup).
    async fn find_active_by_sha(&self, sha256: &str) -> InferenceResult<Option<JobModel>>;

    /// At most one caller wins each id (SKIP LOCKED semantics); ids not
    /// returned were already picked up, deleted, or no longer in `from`.
    async fn lock_and_transition(
        &self,
        ids: &[i64],
        from: JobStatus,
        to: JobStatus,
    ) -> InferenceResult<Vec<JobModel>>;

    async fn set_status(&self, id: i64, status: JobStatus) -> InferenceResult<()>;

    /// Idempotent: a unique-violation on `job_id` is treated as success
    /// (invariant §8.1 -- at most one Result row per Job).
    async fn insert_result(
        &self,
        job_id: i64,
        scores: &BTreeMap<String, f64>,
        top_label: &str,
    ) -> InferenceResult<()>;

    async fn get_result(&self, job_id: i64) -> InferenceResult<Option<ResultModel>>;

    async fn query_stuck_in_progress(
        &self,
        older_than: DateTime<Utc>,
    ) -> InferenceResult<Vec<JobModel>>;

    async fn query_stuck_queued(&self, older_than: DateTime<Utc>) -> InferenceResult<Vec<JobModel>>;

    /// Used by `/v1/ops/metrics`: counts and p50/p95/p99 latency over a
    /// rolling window, backed by the `(status, created_at)` composite index.
    async fn rolling_metrics(&self, since: DateTime<Utc>) -> InferenceResult<MetricsWindow>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ModelRepository: Send + Sync {
    async fn latest_model(&self) -> InferenceResult<Option<ModelVersionModel>>;

    async fn get(&self, id: i64) -> InferenceResult<Option<ModelVersionModel>>;
}

#[derive(Debug, Clone, Default)]
pub struct MetricsWindow {
    pub total_requests: u64,
    pub success_requests: u64,
    pub failed_requests: u64,
    /// Seconds, `Result.created_at - Job.created_at`, completed jobs only.
    pub latencies_seconds: Vec<f64>,
}
