use axum::{
    extract::{Path, State},
    routing::post,
    Json, Router,
};
use tracing::info;

use crate::errors::AppError;
use crate::models::BatchRecord;
use crate::services::recovery_service;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/:id/requeue", post(requeue))
}

/// POST /api/batches/:id/requeue - Re-trigger a failed or stuck batch
async fn requeue(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<BatchRecord>, AppError> {
    info!("POST /api/batches/{}/requeue", id);
    let batch = recovery_service::requeue_batch(&state.context, id).await?;
    Ok(Json(batch))
}

#[cfg(test)]
mod tests {
    use crate::app::create_app;
    use crate::models::BatchStatus;
    use crate::routes::test_support::{body_json, test_state};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use chrono::{NaiveDate, Utc};
    use tower::ServiceExt;

    fn post(uri: String) -> Request<Body> {
        Request::post(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_requeue_failed_batch() {
        let (state, store) = test_state();
        let date = NaiveDate::from_ymd_opt(2026, 10, 16).unwrap();
        let batch = store.insert_raw_batch("AAPL,MSFT", date, BatchStatus::Failed, Utc::now());
        let app = create_app(state.clone());

        let response = app.clone().oneshot(post(format!("/api/batches/{}/requeue", batch.id))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "STARTED");
        assert_eq!(body["candidate_symbols"], serde_json::json!(["AAPL", "MSFT"]));
        assert!(state.context.queue.contains_batch(batch.id));
    }

    #[tokio::test]
    async fn test_requeue_completed_batch_conflicts() {
        let (state, store) = test_state();
        let date = NaiveDate::from_ymd_opt(2026, 10, 16).unwrap();
        let batch = store.insert_raw_batch("AAPL,MSFT", date, BatchStatus::Completed, Utc::now());
        let app = create_app(state);

        let response = app.clone().oneshot(post(format!("/api/batches/{}/requeue", batch.id))).await.unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = app.oneshot(post("/api/batches/999/requeue".to_string())).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
