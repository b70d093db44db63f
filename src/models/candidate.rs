use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Recommendation written on the candidate that wins its batch.
pub const BATCH_WINNER: &str = "BATCH_WINNER";

/// One analyzable symbol for one trading day, as produced by the upstream scanner.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CandidateRecord {
    pub id: i64,
    pub symbol: String,
    pub date: NaiveDate,
    pub score: f64,
    pub recommendation: Option<String>,
    pub batch_id: Option<i64>,
    pub verdict: Option<String>,
    pub conviction: Option<String>,
    pub composite_score: Option<f64>,
    pub analysis_status: Option<String>,
    pub analysis_raw: Option<String>,
    pub analyzed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnalysisStatus {
    Completed,
    Failed,
    ParseError,
}

impl AnalysisStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisStatus::Completed => "COMPLETED",
            AnalysisStatus::Failed => "FAILED",
            AnalysisStatus::ParseError => "PARSE_ERROR",
        }
    }
}

impl std::fmt::Display for AnalysisStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verdict fields written on a candidate after its individual job resolves.
#[derive(Debug, Clone)]
pub struct CandidateVerdictUpdate {
    pub status: AnalysisStatus,
    pub verdict: Option<String>,
    pub conviction: Option<String>,
    pub composite_score: Option<f64>,
    pub raw: Option<String>,
}

impl CandidateVerdictUpdate {
    /// Job never produced output; keep whatever evidence there is.
    pub fn failed(raw: Option<String>) -> Self {
        Self {
            status: AnalysisStatus::Failed,
            verdict: None,
            conviction: None,
            composite_score: None,
            raw,
        }
    }
}
