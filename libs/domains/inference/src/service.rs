//! Business logic behind the HTTP surface (spec §4.8, §6): `SubmitHandler`'s
//! validate -> dedup-check -> create-job -> store-blob -> enqueue pipeline,
//! plus the read-only poll/result/health/metrics/dlq operations. Mirrors the
//! donor workspace's `TaskService<R: TaskRepository>` shape -- an
//! `Arc`-wrapped set of repository/queue trait objects with `#[instrument]`
//! on every public method.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use sha2::{Digest, Sha256};
use tracing::instrument;

use crate::entity::JobStatus;
use crate::error::{InferenceError, InferenceResult};
use crate::models::{DlqEntry, JobSummary, LatencyPercentiles, MetricsSummary, ResultView};
use crate::queue::QueueStore;
use crate::repository::{JobRepository, ModelRepository};

const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;
const METRICS_WINDOW_MINUTES: i64 = 5;

/// Outcome of `SubmitHandler`'s pipeline: either a fresh/in-flight job
/// summary (200/201) or, on a dedup hit against a completed job, its result.
pub enum SubmitOutcome {
    NewJob(JobSummary),
    ExistingJob(JobSummary),
    ExistingResult(ResultView),
}

pub struct InferenceService {
    jobs: Arc<dyn JobRepository>,
    models: Arc<dyn ModelRepository>,
    queue: Arc<dyn QueueStore>,
}

impl InferenceService {
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        models: Arc<dyn ModelRepository>,
        queue: Arc<dyn QueueStore>,
    ) -> Self {
        Self { jobs, models, queue }
    }

    /// Validates content-type/size/header, computes the fingerprint, checks
    /// both dedup layers (cache then DB fallback), and -- on a full miss --
    /// creates the Job, writes the Redis side effects, and enqueues it.
    ///
    /// Known race (spec §4.8): two concurrent requests for the same sha can
    /// both miss and both create Jobs; this is accepted, not prevented, and
    /// no unique constraint is placed on `input_sha256` (it must remain
    /// re-submittable after FAILED).
    #[instrument(skip(self, bytes))]
    pub async fn submit(&self, content_type: &str, bytes: &[u8]) -> InferenceResult<SubmitOutcome> {
        if !content_type.starts_with("image/") {
            return Err(InferenceError::UnsupportedMediaError(content_type.to_string()));
        }
        if bytes.is_empty() {
            return Err(InferenceError::InputError("image field is empty".to_string()));
        }
        if bytes.len() > MAX_UPLOAD_BYTES {
            return Err(InferenceError::TooLargeError);
        }
        if sniff_image_format(bytes).is_none() {
            return Err(InferenceError::UnprocessableError(
                "unrecognized image header".to_string(),
            ));
        }

        let digest = Sha256::digest(bytes);
        let sha256 = digest.iter().map(|b| format!("{b:02x}")).collect::<String>();

        if let Some(job_id) = self.queue.get_cached_job(&sha256).await? {
            if let Some(job) = self.jobs.get(job_id).await? {
                return self.outcome_for_existing(job).await;
            }
        }

        if let Some(job) = self.jobs.find_active_by_sha(&sha256).await? {
            self.queue.set_cached_job(&sha256, job.id).await?;
            if job.status != JobStatus::Completed {
                // restore the blob if it may have expired while this job sat
                // in flight, so a worker can still pick it up.
                self.queue.store_image(&sha256, bytes).await?;
            }
            return self.outcome_for_existing(job).await;
        }

        let Some(model) = self.models.latest_model().await? else {
            return Err(InferenceError::ServiceUnavailable);
        };

        let job = self.jobs.create_job(model.id, &sha256).await?;

        self.queue.store_image(&sha256, bytes).await?;
        self.queue.enqueue(job.id).await?;
        self.queue.set_cached_job(&sha256, job.id).await?;

        Ok(SubmitOutcome::NewJob(JobSummary::from(&job)))
    }

    async fn outcome_for_existing(
        &self,
        job: crate::entity::JobModel,
    ) -> InferenceResult<SubmitOutcome> {
        if job.status == JobStatus::Completed {
            if let Some(result) = self.jobs.get_result(job.id).await? {
                return Ok(SubmitOutcome::ExistingResult(ResultView::from_model(&result)));
            }
        }
        Ok(SubmitOutcome::ExistingJob(JobSummary::from(&job)))
    }

    #[instrument(skip(self))]
    pub async fn get_job(&self, id: i64) -> InferenceResult<JobSummary> {
        let job = self.jobs.get(id).await?.ok_or(InferenceError::NotFound)?;
        Ok(JobSummary::from(&job))
    }

    #[instrument(skip(self))]
    pub async fn get_result(&self, id: i64) -> InferenceResult<ResultView> {
        let job = self.jobs.get(id).await?.ok_or(InferenceError::NotFound)?;
        if job.status != JobStatus::Completed {
            return Err(InferenceError::Conflict(format!(
                "job {id} is {} (not COMPLETED)",
                job.status
            )));
        }
        let result = self
            .jobs
            .get_result(id)
            .await?
            .ok_or(InferenceError::NotFound)?;
        Ok(ResultView::from_model(&result))
    }

    #[instrument(skip(self))]
    pub async fn dlq_contents(&self) -> InferenceResult<Vec<DlqEntry>> {
        let ids = self.queue.list_dlq().await?;
        let mut entries = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(job) = self.jobs.get(id).await? {
                entries.push(DlqEntry {
                    job_id: job.id,
                    status: job.status.to_string(),
                    input_sha256: job.input_sha256,
                    created_at: job.created_at.with_timezone(&Utc),
                });
            }
        }
        Ok(entries)
    }

    #[instrument(skip(self))]
    pub async fn rolling_metrics(&self) -> InferenceResult<MetricsSummary> {
        let since = Utc::now() - ChronoDuration::minutes(METRICS_WINDOW_MINUTES);
        let window = self.jobs.rolling_metrics(since).await?;

        let throughput_rps =
            window.total_requests as f64 / (METRICS_WINDOW_MINUTES as f64 * 60.0);
        let failure_rate = if window.total_requests == 0 {
            0.0
        } else {
            window.failed_requests as f64 / window.total_requests as f64
        };

        Ok(MetricsSummary {
            window_minutes: METRICS_WINDOW_MINUTES as u32,
            throughput_rps,
            failure_rate,
            end_to_end_latency_seconds: percentiles(&window.latencies_seconds),
            total_requests: window.total_requests,
            success_requests: window.success_requests,
            failed_requests: window.failed_requests,
        })
    }
}

fn percentiles(latencies: &[f64]) -> LatencyPercentiles {
    if latencies.is_empty() {
        return LatencyPercentiles {
            p50: 0.0,
            p95: 0.0,
            p99: 0.0,
        };
    }
    let mut sorted = latencies.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let at = |pct: f64| -> f64 {
        let idx = ((sorted.len() as f64 - 1.0) * pct).round() as usize;
        sorted[idx.min(sorted.len() - 1)]
    };
    LatencyPercentiles {
        p50: at(0.50),
        p95: at(0.95),
        p99: at(0.99),
    }
}

/// Minimal magic-number sniff standing in for a full image-header parse
/// (spec §4.8 step 1's "image header parses" gate): recognizes PNG/JPEG/GIF/
/// WEBP signatures. Anything else -- including a well-formed non-raster
/// format like `image/svg+xml`, which passes the content-type gate but has
/// no binary magic number -- is rejected here with 422 (spec §8 boundary
/// behavior).
fn sniff_image_format(bytes: &[u8]) -> Option<&'static str> {
    const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF];
    const GIF87A: &[u8] = b"GIF87a";
    const GIF89A: &[u8] = b"GIF89a";

    if bytes.starts_with(PNG) {
        Some("png")
    } else if bytes.starts_with(JPEG) {
        Some("jpeg")
    } else if bytes.starts_with(GIF87A) || bytes.starts_with(GIF89A) {
        Some("gif")
    } else if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        Some("webp")
    } else {
        None
    }
}

/// Timeout helper for callers that want to bound a Redis/Postgres call
/// explicitly rather than rely on connection-level timeouts; used by the
/// ambient health check (`/v1/ops/health`).
pub async fn with_timeout<F, T>(duration: Duration, fut: F) -> InferenceResult<T>
where
    F: std::future::Future<Output = InferenceResult<T>>,
{
    match tokio::time::timeout(duration, fut).await {
        Ok(result) => result,
        Err(_) => Err(InferenceError::TransportError("health check timed out".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sniffs_png_header() {
        let mut bytes = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
        bytes.extend_from_slice(&[0u8; 16]);
        assert_eq!(sniff_image_format(&bytes), Some("png"));
    }

    #[test]
    fn rejects_svg_text_as_unrecognized_header() {
        let svg = br#"<?xml version="1.0"?><svg></svg>"#;
        assert_eq!(sniff_image_format(svg), None);
    }

    #[test]
    fn percentiles_of_empty_window_are_zero() {
        let p = percentiles(&[]);
        assert_eq!(p.p50, 0.0);
        assert_eq!(p.p99, 0.0);
    }

    #[test]
    fn percentiles_pick_correct_rank() {
        let latencies: Vec<f64> = (1..=100).map(|n| n as f64).collect();
        let p = percentiles(&latencies);
        assert!((p.p50 - 50.0).abs() <= 1.0);
        assert!((p.p99 - 99.0).abs() <= 1.0);
    }
}
