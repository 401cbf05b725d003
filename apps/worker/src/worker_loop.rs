//! WorkerLoop (spec §4.6): one long-running logical worker. Loads its own
//! `Predictor` once and holds it for the task's lifetime (no shared model
//! memory across workers, per spec §4.7 -- here satisfied by each worker
//! task owning a private `Predictor` instance, the in-process-Supervisor
//! reading of §4.7 that SPEC_FULL.md §4.6 documents as equally valid to a
//! process-per-worker deployment).

use std::sync::Arc;

use batch_worker::ResilienceLayer;
use domain_inference::{BatchExecutor, Predictor, QueueStore};
use tokio::sync::watch;

pub struct WorkerLoop {
    id: usize,
    queue: Arc<dyn QueueStore>,
    executor: Arc<BatchExecutor>,
    first_wait_ms: u64,
    window_ms: u64,
    max_size: usize,
    shutdown: watch::Receiver<bool>,
    resilience: Arc<ResilienceLayer>,
}

impl WorkerLoop {
    pub fn new(
        id: usize,
        queue: Arc<dyn QueueStore>,
        executor: Arc<BatchExecutor>,
        first_wait_ms: u64,
        window_ms: u64,
        max_size: usize,
        shutdown: watch::Receiver<bool>,
        resilience: Arc<ResilienceLayer>,
    ) -> Self {
        Self {
            id,
            queue,
            executor,
            first_wait_ms,
            window_ms,
            max_size,
            shutdown,
            resilience,
        }
    }

    /// Constructs and loads a predictor, then repeats collect -> execute
    /// until the shutdown flag flips. A `FatalBootError` at `load()` time
    /// returns `Err`, which the Supervisor's `JoinSet` observes as a
    /// completed-with-error task and respawns (spec §7).
    pub async fn run(mut self, mut predictor: Box<dyn Predictor>) -> eyre::Result<()> {
        predictor
            .load()
            .await
            .map_err(|e| eyre::eyre!("worker {} predictor failed to load: {e}", self.id))?;

        tracing::info!(worker_id = self.id, "worker loop started");

        loop {
            if self.resilience.check().is_err() {
                tracing::warn!(worker_id = self.id, "resilience layer open, skipping collect this tick");
                tokio::time::sleep(std::time::Duration::from_millis(self.first_wait_ms)).await;
                if *self.shutdown.borrow() {
                    return Ok(());
                }
                continue;
            }

            let batch = match self
                .queue
                .collect_batch(self.first_wait_ms, self.window_ms, self.max_size)
                .await
            {
                Ok(batch) => {
                    self.resilience.record_success();
                    batch
                }
                Err(e) => {
                    self.resilience.record_failure();
                    return Err(e.into());
                }
            };

            if !batch.is_empty() {
                tracing::debug!(worker_id = self.id, batch_size = batch.len(), "collected batch");
                let _timer = batch_worker::metrics::BatchTimer::start();
                batch_worker::metrics::record_batch(batch.len());
                if let Err(e) = self.executor.run(&batch, predictor.as_ref()).await {
                    tracing::error!(worker_id = self.id, error = %e, "batch execution failed");
                }
            }

            if *self.shutdown.borrow() {
                tracing::info!(worker_id = self.id, "shutdown flag observed, exiting loop");
                return Ok(());
            }
        }
    }
}
