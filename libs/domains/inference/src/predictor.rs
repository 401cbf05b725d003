//! The neural-network model itself is out of scope (spec §1) -- `Predictor`
//! is the opaque external capability boundary: `load()` once per worker
//! process, `preprocess` raw bytes into whatever the model needs, and run a
//! batched forward pass. Two concrete implementations (direct native,
//! exported-graph) differ only in their constructor; the scheduler is
//! agnostic (spec §9).

use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::error::InferenceResult;

/// Opaque preprocessed input; the scheduler never inspects its contents.
pub struct PredictorInput(pub Vec<u8>);

/// label -> score, exactly as spec §3 describes `Result.output`.
pub type ScoreMap = BTreeMap<String, f64>;

#[async_trait]
pub trait Predictor: Send + Sync {
    /// Loads model weights; called once at worker startup and held for the
    /// worker's lifetime (spec §4.6). A failure here is `FatalBootError`.
    async fn load(&mut self) -> InferenceResult<()>;

    /// Decodes raw image bytes into the model's input representation. A
    /// failure here is `PreprocessError` and does not abort the batch.
    fn preprocess(&self, bytes: &[u8]) -> InferenceResult<PredictorInput>;

    /// Runs the batched forward pass. Callers apply the deadline
    /// (`INFERENCE_TIMEOUT * batch_size`) externally via
    /// `tokio::time::timeout`; this call itself has no internal timeout.
    async fn predict_batch(&self, inputs: Vec<PredictorInput>) -> InferenceResult<Vec<ScoreMap>>;
}
