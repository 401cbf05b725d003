mod stub_predictor;
mod supervisor;
mod worker_loop;

use std::sync::Arc;
use std::time::Duration;

use batch_worker::{health_router, BatchWorkerConfig, HealthState, ResilienceLayer};
use core_config::{Environment, FromEnv};
use database::postgres::{connect_from_config_with_retry as connect_pg_with_retry, run_migrations, PostgresConfig};
use database::redis::{connect_from_config_with_retry as connect_redis_with_retry, RedisConfig};
use domain_inference::migration::Migrator;
use domain_inference::{BatchExecutor, PgJobRepository, RedisQueueStore, RetryPolicy, StuckJobRecovery};

use crate::supervisor::Supervisor;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    let environment = Environment::from_env();
    core_config::tracing::init_tracing(&environment);

    let worker_config = BatchWorkerConfig::from_env()?;
    let pg_config = PostgresConfig::from_env()?;
    let redis_config = RedisConfig::from_env()?;

    tracing::info!(
        worker_count = worker_config.worker_count,
        max_size = worker_config.max_size,
        window_ms = worker_config.window_ms,
        "starting worker supervisor"
    );

    let db = connect_pg_with_retry(pg_config, None).await?;
    run_migrations::<Migrator>(&db, "worker").await?;
    let redis = connect_redis_with_retry(redis_config, None).await?;

    let _metrics_handle = batch_worker::metrics::init_metrics();

    let jobs = Arc::new(PgJobRepository::new(db));
    let queue = Arc::new(RedisQueueStore::new(redis.clone()));
    let resilience = Arc::new(ResilienceLayer::from_config(&worker_config));

    let retry = Arc::new(RetryPolicy::new(queue.clone(), jobs.clone(), worker_config.max_retries));
    let executor = Arc::new(BatchExecutor::new(
        jobs.clone(),
        queue.clone(),
        retry.clone(),
        worker_config.inference_timeout_secs,
        resilience.clone(),
    ));
    let recovery = Arc::new(StuckJobRecovery::new(jobs.clone(), retry.clone(), resilience.clone()));

    let health_state = HealthState::new(redis, "inference-worker", env!("CARGO_PKG_VERSION"));
    let admin = health_router(health_state);
    let health_listener =
        tokio::net::TcpListener::bind(("0.0.0.0", worker_config.health_port)).await?;
    tokio::spawn(async move {
        if let Err(e) = axum::serve(health_listener, admin).await {
            tracing::error!(error = %e, "worker admin server exited");
        }
    });

    let supervisor = Supervisor::new(
        worker_config.worker_count,
        queue,
        executor,
        recovery,
        worker_config.first_wait_ms,
        worker_config.window_ms,
        worker_config.max_size,
        Duration::from_secs(worker_config.recovery_interval_secs),
        resilience,
    );

    supervisor.run().await
}
