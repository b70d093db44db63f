use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::errors::AppError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/:id/analyze", post(analyze))
}

#[derive(Serialize)]
struct QueuedTask {
    task_id: Uuid,
    label: String,
}

/// POST /api/candidates/:id/analyze - Queue an individual analysis
async fn analyze(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<(StatusCode, Json<QueuedTask>), AppError> {
    info!("POST /api/candidates/{}/analyze", id);
    let task = state.context.enqueue_individual(id).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(QueuedTask {
            task_id: task.id,
            label: task.label(),
        }),
    ))
}
