pub mod entity;
pub mod error;
pub mod executor;
pub mod migration;
pub mod models;
pub mod postgres;
pub mod predictor;
pub mod queue;
pub mod recovery;
pub mod repository;
pub mod retry;
pub mod service;

pub use entity::{JobEntity, JobModel, JobStatus, ModelVersionEntity, ModelVersionModel, ResultEntity, ResultModel};
pub use error::{InferenceError, InferenceResult};
pub use executor::BatchExecutor;
pub use models::{DlqEntry, HealthStatus, JobSummary, LatencyPercentiles, MetricsSummary, ResultView};
pub use postgres::{PgJobRepository, PgModelRepository};
pub use predictor::{Predictor, PredictorInput, ScoreMap};
pub use queue::{QueueStore, RedisQueueStore};
pub use recovery::StuckJobRecovery;
pub use repository::{JobRepository, MetricsWindow, ModelRepository};
pub use retry::RetryPolicy;
pub use service::{InferenceService, SubmitOutcome};
