//! Error taxonomy from spec §7, mapped onto Rust types. HTTP responses follow
//! the donor workspace's standardized `{code, error, message, details}` JSON
//! shape (folded in directly from the now-retired `axum-helpers::errors`
//! pattern, since this crate has no other use for that heavier crate).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use batch_worker::ErrorCategory;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum InferenceError {
    /// Client-side validation failure. Surfaced as 4xx, never retried.
    #[error("input error: {0}")]
    InputError(String),

    /// Uploaded payload exceeds the 10 MiB limit.
    #[error("payload too large")]
    TooLargeError,

    /// Content-Type does not begin with `image/`.
    #[error("unsupported media type: {0}")]
    UnsupportedMediaError(String),

    /// Content-Type looked like an image but the header failed to parse.
    #[error("unprocessable image: {0}")]
    UnprocessableError(String),

    /// Redis or Postgres unreachable.
    #[error("transport error: {0}")]
    TransportError(String),

    /// Blob present but undecodable by the predictor.
    #[error("preprocess error: {0}")]
    PreprocessError(String),

    /// Forward pass exceeded its deadline.
    #[error("inference timed out after {0:?}")]
    InferenceTimeout(std::time::Duration),

    /// Forward pass raised an error distinct from a timeout.
    #[error("inference error: {0}")]
    InferenceError(String),

    /// Image TTL expired before a worker fetched it.
    #[error("blob missing for job")]
    BlobMissingError,

    /// Predictor failed to load at worker startup.
    #[error("predictor failed to boot: {0}")]
    FatalBootError(String),

    #[error("not found")]
    NotFound,

    /// Job exists but is not in a state the request requires (e.g. `/result`
    /// before completion).
    #[error("job not in required state: {0}")]
    Conflict(String),

    #[error("no model available")]
    ServiceUnavailable,
}

impl InferenceError {
    /// Drives RetryPolicy/StuckJobRecovery eligibility; an implementation
    /// mechanism layered on top of spec §7's taxonomy, not a change to it --
    /// RetryPolicy's MAX_RETRIES counter remains the sole budget (§4.5).
    pub fn category(&self) -> ErrorCategory {
        match self {
            InferenceError::InputError(_)
            | InferenceError::TooLargeError
            | InferenceError::UnsupportedMediaError(_)
            | InferenceError::UnprocessableError(_)
            | InferenceError::NotFound
            | InferenceError::Conflict(_) => ErrorCategory::Permanent,
            InferenceError::TransportError(_) => ErrorCategory::Transient,
            InferenceError::PreprocessError(_) => ErrorCategory::Permanent,
            InferenceError::InferenceTimeout(_) | InferenceError::InferenceError(_) => {
                ErrorCategory::Transient
            }
            InferenceError::BlobMissingError => ErrorCategory::Permanent,
            InferenceError::FatalBootError(_) => ErrorCategory::Permanent,
            InferenceError::ServiceUnavailable => ErrorCategory::Transient,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    code: i32,
    error: &'static str,
    message: String,
}

impl IntoResponse for InferenceError {
    fn into_response(self) -> Response {
        let (status, code, error): (StatusCode, i32, &'static str) = match &self {
            InferenceError::InputError(_) => (StatusCode::BAD_REQUEST, 1000, "INPUT_ERROR"),
            InferenceError::TooLargeError => {
                (StatusCode::PAYLOAD_TOO_LARGE, 1001, "PAYLOAD_TOO_LARGE")
            }
            InferenceError::UnsupportedMediaError(_) => (
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                1002,
                "UNSUPPORTED_MEDIA_TYPE",
            ),
            InferenceError::UnprocessableError(_) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                1003,
                "UNPROCESSABLE_IMAGE",
            ),
            InferenceError::TransportError(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, 2000, "TRANSPORT_ERROR")
            }
            InferenceError::NotFound => (StatusCode::NOT_FOUND, 1004, "NOT_FOUND"),
            InferenceError::Conflict(_) => (StatusCode::CONFLICT, 1005, "CONFLICT"),
            InferenceError::ServiceUnavailable => {
                (StatusCode::SERVICE_UNAVAILABLE, 2001, "NO_MODEL_AVAILABLE")
            }
            InferenceError::PreprocessError(_)
            | InferenceError::InferenceTimeout(_)
            | InferenceError::InferenceError(_)
            | InferenceError::BlobMissingError
            | InferenceError::FatalBootError(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, 5000, "INTERNAL_ERROR")
            }
        };

        match status {
            StatusCode::INTERNAL_SERVER_ERROR | StatusCode::SERVICE_UNAVAILABLE => {
                tracing::error!(error_code = code, error = %self, "request failed");
            }
            _ => {
                tracing::warn!(error_code = code, error = %self, "request rejected");
            }
        }

        let message = match &self {
            // Worker-internal variants never reach an HTTP caller (spec §7);
            // this arm exists only so the match is exhaustive for the enum's
            // full surface and for defensive test coverage.
            InferenceError::PreprocessError(_)
            | InferenceError::InferenceTimeout(_)
            | InferenceError::InferenceError(_)
            | InferenceError::BlobMissingError
            | InferenceError::FatalBootError(_) => "internal error".to_string(),
            other => other.to_string(),
        };

        (status, axum::Json(ErrorBody { code, error, message })).into_response()
    }
}

impl From<sea_orm::DbErr> for InferenceError {
    fn from(e: sea_orm::DbErr) -> Self {
        InferenceError::TransportError(e.to_string())
    }
}

impl From<redis::RedisError> for InferenceError {
    fn from(e: redis::RedisError) -> Self {
        InferenceError::TransportError(e.to_string())
    }
}

pub type InferenceResult<T> = Result<T, InferenceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_error_categorized_as_permanent() {
        assert_eq!(
            InferenceError::InputError("bad".into()).category(),
            ErrorCategory::Permanent
        );
    }

    #[test]
    fn transport_error_categorized_as_transient() {
        assert_eq!(
            InferenceError::TransportError("down".into()).category(),
            ErrorCategory::Transient
        );
    }
}
