//! BatchExecutor (spec §4.4): drives one batch from lock to persisted
//! result, routing every failure path through `RetryPolicy` so the worker
//! loop never dies on a bad job (spec §7).

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use batch_worker::ResilienceLayer;

use crate::entity::{JobModel, JobStatus};
use crate::error::{InferenceError, InferenceResult};
use crate::predictor::{Predictor, PredictorInput, ScoreMap};
use crate::queue::QueueStore;
use crate::repository::JobRepository;
use crate::retry::RetryPolicy;

pub struct BatchExecutor {
    jobs: Arc<dyn JobRepository>,
    queue: Arc<dyn QueueStore>,
    retry: Arc<RetryPolicy>,
    inference_timeout_secs: u64,
    resilience: Arc<ResilienceLayer>,
}

impl BatchExecutor {
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        queue: Arc<dyn QueueStore>,
        retry: Arc<RetryPolicy>,
        inference_timeout_secs: u64,
        resilience: Arc<ResilienceLayer>,
    ) -> Self {
        Self {
            jobs,
            queue,
            retry,
            inference_timeout_secs,
            resilience,
        }
    }

    /// Gates the next Redis/Postgres call through the circuit breaker and
    /// rate limiter; a tripped breaker or exhausted token bucket surfaces as
    /// a `TransportError`, which `RetryPolicy` already treats as transient.
    fn guard(&self) -> InferenceResult<()> {
        self.resilience
            .check()
            .map_err(|e| InferenceError::TransportError(e.to_string()))
    }

    pub async fn run(&self, ids: &[i64], predictor: &dyn Predictor) -> InferenceResult<()> {
        if ids.is_empty() {
            return Ok(());
        }

        self.guard()?;
        let locked = match self
            .jobs
            .lock_and_transition(ids, JobStatus::Queued, JobStatus::InProgress)
            .await
        {
            Ok(locked) => {
                self.resilience.record_success();
                locked
            }
            Err(e) => {
                self.resilience.record_failure();
                return Err(e);
            }
        };
        if locked.is_empty() {
            return Ok(());
        }

        let mut failed: Vec<(i64, &'static str)> = Vec::new();
        let mut loaded: Vec<(JobModel, Vec<u8>)> = Vec::new();

        for job in locked {
            self.guard()?;
            match self.queue.fetch_image(&job.input_sha256).await {
                Ok(Some(bytes)) => {
                    self.resilience.record_success();
                    loaded.push((job, bytes));
                }
                Ok(None) => {
                    self.resilience.record_success();
                    failed.push((job.id, "image_missing"));
                }
                Err(e) => {
                    self.resilience.record_failure();
                    return Err(e);
                }
            }
        }

        let mut preprocessed: Vec<(JobModel, PredictorInput)> = Vec::new();
        for (job, bytes) in loaded {
            match predictor.preprocess(&bytes) {
                Ok(input) => preprocessed.push((job, input)),
                Err(e) => {
                    tracing::warn!(job_id = job.id, error = %e, "preprocess failed");
                    failed.push((job.id, "preprocess_failed"));
                }
            }
        }

        if !preprocessed.is_empty() {
            let batch_size = preprocessed.len() as u64;
            let (jobs_in_batch, inputs): (Vec<JobModel>, Vec<PredictorInput>) =
                preprocessed.into_iter().unzip();

            let deadline = Duration::from_secs(self.inference_timeout_secs * batch_size);
            match tokio::time::timeout(deadline, predictor.predict_batch(inputs)).await {
                Ok(Ok(scores)) => {
                    self.persist_results(jobs_in_batch, scores, &mut failed).await?;
                }
                Ok(Err(e)) => {
                    tracing::error!(error = %e, batch_size, "batch forward pass failed");
                    failed.extend(jobs_in_batch.iter().map(|j| (j.id, "inference_error")));
                }
                Err(_) => {
                    tracing::error!(batch_size, timeout_secs = ?deadline, "batch forward pass timed out");
                    failed.extend(jobs_in_batch.iter().map(|j| (j.id, "inference_timeout")));
                }
            }
        }

        if !failed.is_empty() {
            let ids: Vec<i64> = failed.iter().map(|(id, _)| *id).collect();
            let reason = failed.first().map(|(_, r)| *r).unwrap_or("unknown");
            self.retry.handle_failures(&ids, reason).await?;
        }

        Ok(())
    }

    async fn persist_results(
        &self,
        jobs_in_batch: Vec<JobModel>,
        scores: Vec<ScoreMap>,
        failed: &mut Vec<(i64, &'static str)>,
    ) -> InferenceResult<()> {
        if jobs_in_batch.len() != scores.len() {
            // Predictor contract violation: every surviving input must get a
            // score map back. Treat the whole sub-batch as an inference
            // error rather than guessing an alignment.
            failed.extend(jobs_in_batch.iter().map(|j| (j.id, "inference_error")));
            return Ok(());
        }

        for (job, score_map) in jobs_in_batch.into_iter().zip(scores.into_iter()) {
            let top_label = argmax_lexicographic(&score_map);
            self.guard()?;
            match self.jobs.insert_result(job.id, &score_map, &top_label).await {
                Ok(()) => {
                    self.resilience.record_success();
                    self.jobs.set_status(job.id, JobStatus::Completed).await?;
                }
                Err(e) => {
                    self.resilience.record_failure();
                    tracing::error!(job_id = job.id, error = %e, "result insert failed");
                    failed.push((job.id, "result_insert_failed"));
                }
            }
        }

        Ok(())
    }
}

/// `top_label = argmax(output)`, with a lexicographic tiebreak on equal
/// scores for determinism (SPEC_FULL.md §4.4) -- sort label keys
/// lexicographically and take the first attaining the maximum score, rather
/// than the original's `max(scores, key=scores.get)` whose result depends on
/// dict iteration order.
fn argmax_lexicographic(scores: &BTreeMap<String, f64>) -> String {
    scores
        .iter()
        .fold(None::<(&String, f64)>, |best, (label, &score)| match best {
            Some((best_label, best_score)) if best_score >= score => Some((best_label, best_score)),
            _ => Some((label, score)),
        })
        .map(|(label, _)| label.clone())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argmax_breaks_ties_lexicographically() {
        let mut scores = BTreeMap::new();
        scores.insert("zebra".to_string(), 0.9);
        scores.insert("apple".to_string(), 0.9);
        scores.insert("mango".to_string(), 0.1);
        assert_eq!(argmax_lexicographic(&scores), "apple");
    }

    #[test]
    fn argmax_picks_strict_maximum_when_unambiguous() {
        let mut scores = BTreeMap::new();
        scores.insert("cat".to_string(), 0.2);
        scores.insert("dog".to_string(), 0.95);
        assert_eq!(argmax_lexicographic(&scores), "dog");
    }

    #[test]
    fn argmax_of_empty_map_is_empty_string() {
        let scores = BTreeMap::new();
        assert_eq!(argmax_lexicographic(&scores), "");
    }
}
