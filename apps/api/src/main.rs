mod routes;
mod state;

use std::sync::Arc;
use std::time::Duration;

use batch_worker::{health_router, HealthState};
use core_config::server::ServerConfig;
use core_config::{env_or_default, Environment, FromEnv};
use database::postgres::{connect_from_config_with_retry as connect_pg_with_retry, run_migrations, PostgresConfig};
use database::redis::{connect_from_config_with_retry as connect_redis_with_retry, RedisConfig};
use domain_inference::migration::Migrator;
use domain_inference::{InferenceService, PgJobRepository, PgModelRepository, RedisQueueStore};
use tower_governor::governor::GovernorConfigBuilder;
use tower_governor::GovernorLayer;

use crate::state::AppState;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    let environment = Environment::from_env();
    core_config::tracing::init_tracing(&environment);

    let server_config = ServerConfig::from_env()?;
    let pg_config = PostgresConfig::from_env()?;
    let redis_config = RedisConfig::from_env()?;
    let health_port: u16 = env_or_default("API_HEALTH_PORT", "8081").parse()?;

    let db = connect_pg_with_retry(pg_config, None).await?;
    run_migrations::<Migrator>(&db, "api").await?;
    let redis = connect_redis_with_retry(redis_config, None).await?;

    let _metrics_handle = batch_worker::metrics::init_metrics();

    let jobs = Arc::new(PgJobRepository::new(db.clone()));
    let models = Arc::new(PgModelRepository::new(db.clone()));
    let queue = Arc::new(RedisQueueStore::new(redis.clone()));
    let service = Arc::new(InferenceService::new(jobs, models, queue));

    let state = AppState::new(service, db, redis.clone());

    // 60 requests/min per client, anonymous -- no API keys in scope (spec §6).
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(1)
            .burst_size(60)
            .finish()
            .ok_or_else(|| eyre::eyre!("invalid rate limiter configuration"))?,
    );

    let app = routes::router(state).layer(GovernorLayer {
        config: governor_conf,
    });

    let health_state = HealthState::new(redis, "inference-api", env!("CARGO_PKG_VERSION"));
    let admin = health_router(health_state);
    let health_listener = tokio::net::TcpListener::bind(("0.0.0.0", health_port)).await?;
    tokio::spawn(async move {
        if let Err(e) = axum::serve(health_listener, admin).await {
            tracing::error!(error = %e, "api admin server exited");
        }
    });

    tracing::info!(address = %server_config.address(), "starting inference API");
    let listener = tokio::net::TcpListener::bind(server_config.address()).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        if let Ok(mut sig) = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            sig.recv().await;
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("shutdown signal received, draining in-flight requests");
    tokio::time::sleep(Duration::from_millis(100)).await;
}
