use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use tracing::info;

use crate::errors::AppError;
use crate::services::batch_scanner::{self, ScanSummary};
use crate::services::recovery_service::{self, RecoverySummary};
use crate::services::scheduler_context::SchedulerStatus;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/status", get(status))
        .route("/scan", post(scan))
        .route("/recover", post(recover))
}

/// GET /api/scheduler/status - Queue depths and worker activity
async fn status(State(state): State<AppState>) -> Json<SchedulerStatus> {
    Json(state.context.status())
}

/// POST /api/scheduler/scan - Run recovery and batch formation now
async fn scan(State(state): State<AppState>) -> Result<Json<ScanSummary>, AppError> {
    info!("POST /api/scheduler/scan - Manual scan");
    let summary = batch_scanner::run_scan(&state.context).await?;
    Ok(Json(summary))
}

/// POST /api/scheduler/recover - Run a recovery pass now
async fn recover(State(state): State<AppState>) -> Result<Json<RecoverySummary>, AppError> {
    info!("POST /api/scheduler/recover - Manual recovery");
    let summary = recovery_service::recover_incomplete_batches(&state.context).await?;
    Ok(Json(summary))
}
