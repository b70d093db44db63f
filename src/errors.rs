use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::IntoResponse;
use thiserror::Error;

use crate::models::BatchStatus;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Not found")]
    NotFound,
    #[error("Scan already running")]
    Busy,
    #[error("External error: {0}")]
    External(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        match self {
            AppError::NotFound | AppError::Store(StoreError::NotFound(_)) => {
                (StatusCode::NOT_FOUND, "Not found").into_response()
            }
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
            AppError::Store(StoreError::InvalidTransition { id, from, to }) => (
                StatusCode::CONFLICT,
                format!("Batch {} cannot move from {} to {}", id, from, to),
            )
                .into_response(),
            AppError::Busy => {
                let mut headers = HeaderMap::new();
                headers.insert("Retry-After", HeaderValue::from_static("30"));
                (StatusCode::TOO_MANY_REQUESTS, headers, "Scan already running").into_response()
            }
            AppError::External(msg) => (StatusCode::BAD_GATEWAY, msg).into_response(),
            AppError::Store(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
            }
        }
    }
}

impl From<String> for AppError {
    fn from(value: String) -> Self {
        AppError::Validation(value)
    }
}

/// Failures of the persistence gateway.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("batch {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: i64,
        from: BatchStatus,
        to: BatchStatus,
    },
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// Failures while running one unit of work against the external analysis service.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("job submission failed: {0}")]
    Submission(String),
    #[error("job poll failed: {0}")]
    Poll(String),
    #[error("job {job_id} did not finish after {attempts} polls")]
    Timeout { job_id: String, attempts: u32 },
    #[error("job {job_id} failed remotely")]
    Failed { job_id: String, outputs: Vec<String> },
    #[error("no usable result: {reason}")]
    Unresolved { reason: String, raw: Option<String> },
    #[error("persistence failed: {0}")]
    Persistence(#[from] StoreError),
    #[error("archive write failed: {0}")]
    Archive(#[from] std::io::Error),
}

impl JobError {
    /// Raw text the failed job left behind, if any.
    pub fn raw_evidence(&self) -> Option<String> {
        match self {
            JobError::Failed { outputs, .. } if !outputs.is_empty() => Some(outputs.join("\n\n")),
            JobError::Unresolved { raw, .. } => raw.clone(),
            _ => None,
        }
    }
}

/// Failures of the secondary (repair) LLM call.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM features are disabled")]
    Disabled,
    #[error("rate limited by LLM provider")]
    RateLimited,
    #[error("LLM request timed out")]
    Timeout,
    #[error("network error: {0}")]
    NetworkError(String),
    #[error("API error: {0}")]
    ApiError(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}
