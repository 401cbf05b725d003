//! The `/v1/*` HTTP surface (spec §6): submit, poll, result, and the ops
//! trio. Handlers stay thin -- validation and branching live in
//! `InferenceService`; this module only extracts the request and maps the
//! outcome onto a status code.

use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use domain_inference::{InferenceError, SubmitOutcome};

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/jobs", post(submit))
        .route("/v1/jobs/{id}", get(get_job))
        .route("/v1/jobs/{id}/result", get(get_result))
        .route("/v1/ops/health", get(ops_health))
        .route("/v1/ops/metrics", get(ops_metrics))
        .route("/v1/ops/dlq", get(ops_dlq))
        .with_state(state)
}

impl IntoResponse for SubmitOutcome {
    fn into_response(self) -> Response {
        match self {
            SubmitOutcome::NewJob(job) => (StatusCode::CREATED, Json(job)).into_response(),
            SubmitOutcome::ExistingJob(job) => (StatusCode::OK, Json(job)).into_response(),
            SubmitOutcome::ExistingResult(result) => (StatusCode::OK, Json(result)).into_response(),
        }
    }
}

/// `POST /v1/jobs`: multipart form with a single `image` field. Status codes
/// follow spec §6/§4.8: 201 new job, 200 dedup hit (job or cached result),
/// 400/413/415/422 on validation failure, 503 with no model configured.
async fn submit(State(state): State<AppState>, mut multipart: Multipart) -> Result<SubmitOutcome, InferenceError> {
    let mut content_type = String::new();
    let mut bytes: Vec<u8> = Vec::new();
    let mut found_image_field = false;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| InferenceError::InputError(format!("malformed multipart body: {e}")))?
    {
        if field.name() != Some("image") {
            continue;
        }
        found_image_field = true;
        content_type = field.content_type().unwrap_or("application/octet-stream").to_string();
        bytes = field
            .bytes()
            .await
            .map_err(|e| InferenceError::InputError(format!("failed to read image field: {e}")))?
            .to_vec();
    }

    if !found_image_field {
        return Err(InferenceError::InputError("missing `image` field".to_string()));
    }

    state.service.submit(&content_type, &bytes).await
}

/// `GET /v1/jobs/{id}`: 200 with the current status, 404 if unknown.
async fn get_job(State(state): State<AppState>, Path(id): Path<i64>) -> Result<impl IntoResponse, InferenceError> {
    Ok(Json(state.service.get_job(id).await?))
}

/// `GET /v1/jobs/{id}/result`: 200 once COMPLETED, 404 unknown job, 409 if
/// the job exists but hasn't finished (or failed permanently).
async fn get_result(State(state): State<AppState>, Path(id): Path<i64>) -> Result<impl IntoResponse, InferenceError> {
    Ok(Json(state.service.get_result(id).await?))
}

/// `GET /v1/ops/health`: 200 when both Postgres and Redis answer inside the
/// probe timeout, 503 otherwise.
async fn ops_health(State(state): State<AppState>) -> impl IntoResponse {
    let (postgres, redis) = state.probe_dependencies().await;
    let status = if postgres && redis {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(domain_inference::HealthStatus {
            status: if status == StatusCode::OK { "ok" } else { "degraded" },
            postgres,
            redis,
        }),
    )
}

/// `GET /v1/ops/metrics`: rolling 5-minute throughput/latency/failure-rate
/// summary (spec §6).
async fn ops_metrics(State(state): State<AppState>) -> Result<impl IntoResponse, InferenceError> {
    Ok(Json(state.service.rolling_metrics().await?))
}

/// `GET /v1/ops/dlq`: current dead-letter contents for operator inspection.
async fn ops_dlq(State(state): State<AppState>) -> Result<impl IntoResponse, InferenceError> {
    Ok(Json(state.service.dlq_contents().await?))
}
