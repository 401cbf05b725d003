//! Shared handler state: the business-logic service plus the raw Postgres/
//! Redis handles `ops/health` needs to probe directly (the service layer
//! has no "are you alive" operation of its own, by design).

use std::sync::Arc;
use std::time::Duration;

use domain_inference::InferenceService;
use redis::aio::ConnectionManager;
use sea_orm::{ConnectionTrait, DatabaseConnection, Statement};

const OPS_HEALTH_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<InferenceService>,
    db: DatabaseConnection,
    redis: ConnectionManager,
}

impl AppState {
    pub fn new(service: Arc<InferenceService>, db: DatabaseConnection, redis: ConnectionManager) -> Self {
        Self { service, db, redis }
    }

    /// Backs `GET /v1/ops/health` (spec §6): both stores must answer inside
    /// the timeout for the endpoint to report healthy.
    pub async fn probe_dependencies(&self) -> (bool, bool) {
        let pg = tokio::time::timeout(OPS_HEALTH_TIMEOUT, self.db.execute(Statement::from_string(
            self.db.get_database_backend(),
            "SELECT 1",
        )))
        .await
        .map(|r| r.is_ok())
        .unwrap_or(false);

        let redis = tokio::time::timeout(OPS_HEALTH_TIMEOUT, async {
            let mut conn = self.redis.clone();
            redis::cmd("PING").query_async::<String>(&mut conn).await
        })
        .await
        .map(|r| r.is_ok())
        .unwrap_or(false);

        (pg, redis)
    }
}
