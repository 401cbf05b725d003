//! HTTP-facing DTOs (spec §6 "Response shapes"). Kept separate from the
//! sea-orm entities so the wire format doesn't have to track schema columns
//! one-to-one.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::entity::{JobModel, ResultModel};

#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub id: i64,
    pub status: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<&JobModel> for JobSummary {
    fn from(job: &JobModel) -> Self {
        Self {
            id: job.id,
            status: job.status.to_string(),
            created_at: job.created_at.with_timezone(&Utc),
            updated_at: Some(job.updated_at.with_timezone(&Utc)),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ResultView {
    pub job_id: i64,
    pub top_label: String,
    pub output: BTreeMap<String, f64>,
    pub created_at: DateTime<Utc>,
}

impl ResultView {
    pub fn from_model(result: &ResultModel) -> Self {
        let output: BTreeMap<String, f64> =
            serde_json::from_value(result.output.clone()).unwrap_or_default();
        Self {
            job_id: result.job_id,
            top_label: result.top_label.clone(),
            output,
            created_at: result.created_at.with_timezone(&Utc),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LatencyPercentiles {
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSummary {
    pub window_minutes: u32,
    pub throughput_rps: f64,
    pub failure_rate: f64,
    pub end_to_end_latency_seconds: LatencyPercentiles,
    pub total_requests: u64,
    pub success_requests: u64,
    pub failed_requests: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DlqEntry {
    pub job_id: i64,
    pub status: String,
    pub input_sha256: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub postgres: bool,
    pub redis: bool,
}
