//! Postgres-backed `JobRepository`/`ModelRepository`, built directly on
//! `sea_orm::EntityTrait`/`ColumnTrait`/`QueryFilter` rather than the donor
//! workspace's `BaseRepository` wrapper -- that abstraction's implementation
//! is not present anywhere in this workspace's retrieval pack, so direct
//! sea-orm calls are used instead (see DESIGN.md).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::{ArrayType, Expr};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbBackend, DbErr,
    EntityTrait, QueryFilter, QueryOrder, Statement, TransactionTrait, Value,
};
use std::collections::BTreeMap;

use crate::entity::job::{self, JobStatus};
use crate::entity::{model_version, result, JobModel, ModelVersionModel, ResultModel};
use crate::error::{InferenceError, InferenceResult};
use crate::repository::{JobRepository, MetricsWindow, ModelRepository};

pub struct PgJobRepository {
    db: DatabaseConnection,
}

impl PgJobRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

fn ids_array(ids: &[i64]) -> Value {
    let values: Vec<Value> = ids.iter().map(|i| Value::BigInt(Some(*i))).collect();
    Value::Array(ArrayType::BigInt, Some(Box::new(values)))
}

/// Best-effort detection of a unique-constraint violation so `insert_result`
/// can treat a racing duplicate insert as success (spec §4.2, invariant §8.1).
fn is_unique_violation(err: &DbErr) -> bool {
    let msg = err.to_string();
    msg.contains("duplicate key") || msg.contains("unique constraint")
}

#[async_trait]
impl JobRepository for PgJobRepository {
    async fn create_job(&self, model_id: i64, sha256: &str) -> InferenceResult<JobModel> {
        let now = Utc::now().fixed_offset();
        let active = job::ActiveModel {
            model_id: sea_orm::ActiveValue::Set(model_id),
            status: sea_orm::ActiveValue::Set(JobStatus::Queued),
            input_sha256: sea_orm::ActiveValue::Set(sha256.to_string()),
            created_at: sea_orm::ActiveValue::Set(now),
            updated_at: sea_orm::ActiveValue::Set(now),
            ..Default::default()
        };
        let inserted = active.insert(&self.db).await?;
        Ok(inserted)
    }

    async fn get(&self, id: i64) -> InferenceResult<Option<JobModel>> {
        Ok(job::Entity::find_by_id(id).one(&self.db).await?)
    }

    async fn find_active_by_sha(&self, sha256: &str) -> InferenceResult<Option<JobModel>> {
        Ok(job::Entity::find()
            .filter(job::Column::InputSha256.eq(sha256))
            .filter(job::Column::Status.ne(JobStatus::Failed))
            .order_by_desc(job::Column::CreatedAt)
            .one(&self.db)
            .await?)
    }

    async fn lock_and_transition(
        &self,
        ids: &[i64],
        from: JobStatus,
        to: JobStatus,
    ) -> InferenceResult<Vec<JobModel>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }

        let txn = self.db.begin().await?;

        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"SELECT id FROM inference_jobs WHERE id = ANY($1) AND status = $2 FOR UPDATE SKIP LOCKED"#,
            [ids_array(ids), Value::String(Some(Box::new(from.to_string())))],
        );
        let rows = txn.query_all(stmt).await?;
        let locked_ids: Vec<i64> = rows
            .iter()
            .map(|row| row.try_get::<i64>("", "id"))
            .collect::<Result<_, _>>()
            .map_err(|e| InferenceError::TransportError(e.to_string()))?;

        if locked_ids.is_empty() {
            txn.commit().await?;
            return Ok(vec![]);
        }

        let now = Utc::now().fixed_offset();
        job::Entity::update_many()
            .col_expr(job::Column::Status, Expr::value(to.to_string()))
            .col_expr(job::Column::UpdatedAt, Expr::value(now))
            .filter(job::Column::Id.is_in(locked_ids.clone()))
            .exec(&txn)
            .await?;

        let updated = job::Entity::find()
            .filter(job::Column::Id.is_in(locked_ids))
            .all(&txn)
            .await?;

        txn.commit().await?;
        Ok(updated)
    }

    async fn set_status(&self, id: i64, status: JobStatus) -> InferenceResult<()> {
        let now = Utc::now().fixed_offset();
        job::Entity::update_many()
            .col_expr(job::Column::Status, Expr::value(status.to_string()))
            .col_expr(job::Column::UpdatedAt, Expr::value(now))
            .filter(job::Column::Id.eq(id))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    async fn insert_result(
        &self,
        job_id: i64,
        scores: &BTreeMap<String, f64>,
        top_label: &str,
    ) -> InferenceResult<()> {
        let active = result::ActiveModel {
            job_id: sea_orm::ActiveValue::Set(job_id),
            output: sea_orm::ActiveValue::Set(serde_json::to_value(scores).unwrap_or_default()),
            top_label: sea_orm::ActiveValue::Set(top_label.to_string()),
            created_at: sea_orm::ActiveValue::Set(Utc::now().fixed_offset()),
        };
        match result::Entity::insert(active).exec(&self.db).await {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => {
                tracing::debug!(job_id, "result already inserted by another worker, treating as success");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get_result(&self, job_id: i64) -> InferenceResult<Option<ResultModel>> {
        Ok(result::Entity::find_by_id(job_id).one(&self.db).await?)
    }

    async fn query_stuck_in_progress(
        &self,
        older_than: DateTime<Utc>,
    ) -> InferenceResult<Vec<JobModel>> {
        Ok(job::Entity::find()
            .filter(job::Column::Status.eq(JobStatus::InProgress))
            .filter(job::Column::UpdatedAt.lt(older_than.fixed_offset()))
            .all(&self.db)
            .await?)
    }

    async fn query_stuck_queued(&self, older_than: DateTime<Utc>) -> InferenceResult<Vec<JobModel>> {
        Ok(job::Entity::find()
            .filter(job::Column::Status.eq(JobStatus::Queued))
            .filter(job::Column::CreatedAt.lt(older_than.fixed_offset()))
            .all(&self.db)
            .await?)
    }

    async fn rolling_metrics(&self, since: DateTime<Utc>) -> InferenceResult<MetricsWindow> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"
            SELECT
                count(*) FILTER (WHERE j.created_at >= $1) AS total,
                count(*) FILTER (WHERE j.status = 'COMPLETED' AND j.created_at >= $1) AS success,
                count(*) FILTER (WHERE j.status = 'FAILED' AND j.created_at >= $1) AS failed
            FROM inference_jobs j
            WHERE j.created_at >= $1
            "#,
            [Value::ChronoDateTimeUtc(Some(Box::new(since)))],
        );
        let row = self.db.query_one(stmt).await?;

        let (total, success, failed) = match row {
            Some(r) => (
                r.try_get::<i64>("", "total").unwrap_or(0) as u64,
                r.try_get::<i64>("", "success").unwrap_or(0) as u64,
                r.try_get::<i64>("", "failed").unwrap_or(0) as u64,
            ),
            None => (0, 0, 0),
        };

        let latency_stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"
            SELECT EXTRACT(EPOCH FROM (r.created_at - j.created_at)) AS latency_seconds
            FROM inference_results r
            JOIN inference_jobs j ON j.id = r.job_id
            WHERE j.created_at >= $1
            "#,
            [Value::ChronoDateTimeUtc(Some(Box::new(since)))],
        );
        let latency_rows = self.db.query_all(latency_stmt).await?;
        let latencies_seconds = latency_rows
            .iter()
            .filter_map(|r| r.try_get::<f64>("", "latency_seconds").ok())
            .collect();

        Ok(MetricsWindow {
            total_requests: total,
            success_requests: success,
            failed_requests: failed,
            latencies_seconds,
        })
    }
}

pub struct PgModelRepository {
    db: DatabaseConnection,
}

impl PgModelRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ModelRepository for PgModelRepository {
    async fn latest_model(&self) -> InferenceResult<Option<ModelVersionModel>> {
        Ok(model_version::Entity::find()
            .order_by_desc(model_version::Column::CreatedAt)
            .one(&self.db)
            .await?)
    }

    async fn get(&self, id: i64) -> InferenceResult<Option<ModelVersionModel>> {
        Ok(model_version::Entity::find_by_id(id).one(&self.db).await?)
    }
}
