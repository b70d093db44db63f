use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::models::{SymbolList, TaskKind};

#[derive(Debug, Error)]
pub enum AnalysisClientError {
    #[error("network error: {0}")]
    Network(String),

    #[error("bad response: {0}")]
    BadResponse(String),

    #[error("parse error: {0}")]
    Parse(String),
}

/// Opaque request body sent to the analysis service.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisRequest {
    pub kind: TaskKind,
    pub payload: Value,
}

impl AnalysisRequest {
    pub fn individual(symbol: &str, date: NaiveDate) -> Self {
        Self {
            kind: TaskKind::Individual,
            payload: json!({ "symbol": symbol, "date": date }),
        }
    }

    pub fn comparison(symbols: &SymbolList, date: NaiveDate) -> Self {
        Self {
            kind: TaskKind::BatchComparison,
            payload: json!({ "symbols": symbols, "date": date }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    /// Map the service's free-form state names. Anything unrecognized is
    /// treated as still running.
    pub fn from_remote(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "completed" | "complete" | "succeeded" | "success" | "done" => JobStatus::Completed,
            "failed" | "error" | "errored" | "cancelled" | "canceled" => JobStatus::Failed,
            _ => JobStatus::Running,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Running)
    }
}

/// Snapshot of one remote job.
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalJob {
    pub job_id: String,
    pub status: JobStatus,
    /// Raw text outputs in arrival order
    pub outputs: Vec<String>,
}

#[async_trait]
pub trait AnalysisClient: Send + Sync {
    /// Start a job. Returns the remote job id.
    async fn submit(&self, request: &AnalysisRequest) -> Result<String, AnalysisClientError>;

    async fn poll(&self, job_id: &str) -> Result<ExternalJob, AnalysisClientError>;
}
