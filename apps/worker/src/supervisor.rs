//! Supervisor (spec §4.7): starts `WORKER_COUNT` worker tasks, restarts any
//! that exit non-gracefully, drives StuckJobRecovery on a timer, and runs
//! the SIGINT/SIGTERM shutdown sequence.

use std::sync::Arc;
use std::time::Duration;

use batch_worker::ResilienceLayer;
use domain_inference::{BatchExecutor, Predictor, QueueStore, StuckJobRecovery};
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::stub_predictor::HashPredictor;

const LIVENESS_INTERVAL: Duration = Duration::from_secs(3);
const WORKER_SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

pub struct Supervisor {
    worker_count: usize,
    queue: Arc<dyn QueueStore>,
    executor: Arc<BatchExecutor>,
    recovery: Arc<StuckJobRecovery>,
    first_wait_ms: u64,
    window_ms: u64,
    max_size: usize,
    recovery_interval: Duration,
    resilience: Arc<ResilienceLayer>,
}

impl Supervisor {
    pub fn new(
        worker_count: usize,
        queue: Arc<dyn QueueStore>,
        executor: Arc<BatchExecutor>,
        recovery: Arc<StuckJobRecovery>,
        first_wait_ms: u64,
        window_ms: u64,
        max_size: usize,
        recovery_interval: Duration,
        resilience: Arc<ResilienceLayer>,
    ) -> Self {
        Self {
            worker_count,
            queue,
            executor,
            recovery,
            first_wait_ms,
            window_ms,
            max_size,
            recovery_interval,
            resilience,
        }
    }

    fn spawn_worker(
        &self,
        id: usize,
        shutdown_rx: watch::Receiver<bool>,
        set: &mut JoinSet<eyre::Result<()>>,
    ) {
        let worker = crate::worker_loop::WorkerLoop::new(
            id,
            self.queue.clone(),
            self.executor.clone(),
            self.first_wait_ms,
            self.window_ms,
            self.max_size,
            shutdown_rx,
            self.resilience.clone(),
        );
        // Each worker constructs its own predictor instance -- no shared
        // model memory across workers (spec §4.7).
        let predictor: Box<dyn Predictor> = Box::new(HashPredictor);
        set.spawn(worker.run(predictor));
    }

    pub async fn run(self) -> eyre::Result<()> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut workers: JoinSet<eyre::Result<()>> = JoinSet::new();

        for id in 0..self.worker_count {
            self.spawn_worker(id, shutdown_rx.clone(), &mut workers);
        }

        let mut liveness = tokio::time::interval(LIVENESS_INTERVAL);
        let mut recovery_timer = tokio::time::interval(self.recovery_interval);
        let mut next_worker_id = self.worker_count;

        #[cfg(unix)]
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

        loop {
            tokio::select! {
                biased;

                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("SIGINT received, starting graceful shutdown");
                    break;
                }
                #[cfg(unix)]
                _ = sigterm.recv() => {
                    tracing::info!("SIGTERM received, starting graceful shutdown");
                    break;
                }

                _ = liveness.tick() => {
                    while let Some(result) = workers.try_join_next() {
                        match result {
                            Ok(Ok(())) => {}
                            Ok(Err(e)) => tracing::error!(error = %e, "worker exited with error, respawning"),
                            Err(e) => tracing::error!(error = %e, "worker task panicked, respawning"),
                        }
                        self.spawn_worker(next_worker_id, shutdown_rx.clone(), &mut workers);
                        next_worker_id += 1;
                    }
                }

                _ = recovery_timer.tick() => {
                    if let Err(e) = self.recovery.run_once().await {
                        tracing::error!(error = %e, "stuck-job recovery pass failed");
                    }
                }
            }
        }

        // Step 1+2: flip the shared flag, which doubles as the termination
        // signal every worker checks after its current batch (spec §4.7).
        let _ = shutdown_tx.send(true);

        // Step 3: wait up to 30s per worker, then abort stragglers.
        let deadline = tokio::time::Instant::now() + WORKER_SHUTDOWN_GRACE;
        loop {
            if workers.is_empty() {
                break;
            }
            let now = tokio::time::Instant::now();
            let remaining = if deadline > now { deadline - now } else { Duration::ZERO };
            if remaining.is_zero() {
                tracing::warn!(remaining_workers = workers.len(), "shutdown grace period elapsed, aborting stragglers");
                workers.shutdown().await;
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(remaining) => {
                    workers.shutdown().await;
                    break;
                }
                joined = workers.join_next() => {
                    if joined.is_none() {
                        break;
                    }
                }
            }
        }

        tracing::info!("supervisor shutdown complete");
        Ok(())
    }
}
