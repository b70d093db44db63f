use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::errors::{AppError, StoreError};
use crate::models::{BatchRecord, BatchStatus, Task};
use crate::services::scheduler_context::SchedulerContext;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoverySummary {
    pub pending_found: usize,
    pub zombies_found: usize,
    pub requeued: usize,
    pub skipped_in_flight: usize,
    pub skipped_queued: usize,
    pub errors: usize,
}

pub async fn recover_incomplete_batches(ctx: &SchedulerContext) -> Result<RecoverySummary, StoreError> {
    recover_incomplete_batches_at(ctx, Utc::now()).await
}

/// Re-enqueue PENDING batches and STARTED batches that have not moved for
/// longer than the zombie threshold. Never writes a result.
pub async fn recover_incomplete_batches_at(
    ctx: &SchedulerContext,
    now: DateTime<Utc>,
) -> Result<RecoverySummary, StoreError> {
    let threshold = ctx.config.zombie_threshold_chrono();
    let mut summary = RecoverySummary::default();

    let pending = ctx.store.batches_with_status(BatchStatus::Pending).await?;
    let zombies: Vec<BatchRecord> = ctx
        .store
        .batches_with_status(BatchStatus::Started)
        .await?
        .into_iter()
        .filter(|b| b.is_zombie(now, threshold))
        .collect();

    summary.pending_found = pending.len();
    summary.zombies_found = zombies.len();

    for batch in pending.iter().chain(zombies.iter()) {
        if ctx.is_in_flight(batch.id) {
            summary.skipped_in_flight += 1;
            continue;
        }
        if ctx.queue.contains_batch(batch.id) {
            summary.skipped_queued += 1;
            continue;
        }

        match requeue(ctx, batch).await {
            Ok(()) => summary.requeued += 1,
            Err(e) => {
                warn!("⚠️ Could not recover batch {}: {}", batch.id, e);
                summary.errors += 1;
            }
        }
    }

    if summary.requeued > 0 || summary.errors > 0 {
        info!(
            "♻️ Recovery: {} pending, {} zombies, {} re-queued, {} errors",
            summary.pending_found, summary.zombies_found, summary.requeued, summary.errors
        );
    }

    Ok(summary)
}

/// Operator re-trigger for one batch (FAILED, PENDING or STARTED).
pub async fn requeue_batch(ctx: &SchedulerContext, batch_id: i64) -> Result<BatchRecord, AppError> {
    let batch = ctx
        .store
        .get_batch(batch_id)
        .await?
        .ok_or(AppError::NotFound)?;

    if !batch.status.can_transition_to(BatchStatus::Started) {
        return Err(StoreError::InvalidTransition {
            id: batch.id,
            from: batch.status,
            to: BatchStatus::Started,
        }
        .into());
    }
    if ctx.is_in_flight(batch.id) || ctx.queue.contains_batch(batch.id) {
        return Err(AppError::Validation(format!(
            "Batch {} is already queued or running",
            batch.id
        )));
    }

    requeue(ctx, &batch).await?;
    info!("🔁 Operator re-queued batch {}", batch.id);

    Ok(ctx
        .store
        .get_batch(batch.id)
        .await?
        .unwrap_or(batch))
}

/// Enqueue first, then stamp STARTED so the timestamp reflects the re-queue.
async fn requeue(ctx: &SchedulerContext, batch: &BatchRecord) -> Result<(), StoreError> {
    let task = Task::batch(batch.id, batch.candidate_symbols.clone(), batch.date);
    if !ctx.queue.enqueue(task) {
        return Ok(());
    }
    ctx.store.update_batch_status(batch.id, BatchStatus::Started).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchedulerConfig;
    use crate::external::analysis_client::{
        AnalysisClient, AnalysisClientError, AnalysisRequest, ExternalJob,
    };
    use crate::services::output_parser::OutputParser;
    use crate::store::{MemoryStore, SchedulerStore};
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::sync::Arc;

    struct UnusedClient;

    #[async_trait]
    impl AnalysisClient for UnusedClient {
        async fn submit(&self, _request: &AnalysisRequest) -> Result<String, AnalysisClientError> {
            Err(AnalysisClientError::Network("not in this test".into()))
        }

        async fn poll(&self, _job_id: &str) -> Result<ExternalJob, AnalysisClientError> {
            Err(AnalysisClientError::Network("not in this test".into()))
        }
    }

    fn context(store: Arc<MemoryStore>) -> Arc<SchedulerContext> {
        SchedulerContext::new(
            SchedulerConfig::default(),
            store,
            Arc::new(UnusedClient),
            Arc::new(OutputParser::offline()),
        )
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 16).unwrap()
    }

    #[tokio::test]
    async fn test_fresh_started_batch_is_left_alone() {
        let store = Arc::new(MemoryStore::new());
        store.insert_raw_batch("AAPL,MSFT", day(), BatchStatus::Started, Utc::now());
        let ctx = context(store);

        let first = recover_incomplete_batches(&ctx).await.unwrap();
        let second = recover_incomplete_batches(&ctx).await.unwrap();
        assert_eq!(first.requeued, 0);
        assert_eq!(second.requeued, 0);
        assert!(ctx.queue.is_empty());
    }

    #[tokio::test]
    async fn test_zombie_is_requeued_once_with_fresh_timestamp() {
        let store = Arc::new(MemoryStore::new());
        let stale = Utc::now() - chrono::Duration::minutes(45);
        let batch = store.insert_raw_batch(r#"["AMD","INTC"]"#, day(), BatchStatus::Started, stale);
        let ctx = context(store.clone());

        let first = recover_incomplete_batches(&ctx).await.unwrap();
        let second = recover_incomplete_batches(&ctx).await.unwrap();

        assert_eq!(first.zombies_found, 1);
        assert_eq!(first.requeued, 1);
        assert_eq!(second.requeued, 0);
        assert_eq!(ctx.queue.depths().batch, 1);

        let refreshed = store.get_batch(batch.id).await.unwrap().unwrap();
        assert_eq!(refreshed.status, BatchStatus::Started);
        assert!(refreshed.updated_at > stale);

        let task = ctx.queue.dequeue().unwrap();
        assert_eq!(task.label(), format!("batch#{}[AMD,INTC]", batch.id));
    }

    #[tokio::test]
    async fn test_pending_batch_with_legacy_symbols_is_requeued() {
        let store = Arc::new(MemoryStore::new());
        let batch = store.insert_raw_batch("nvda|amd", day(), BatchStatus::Pending, Utc::now());
        let ctx = context(store.clone());

        let summary = recover_incomplete_batches(&ctx).await.unwrap();
        assert_eq!(summary.pending_found, 1);
        assert_eq!(summary.requeued, 1);
        assert_eq!(
            store.get_batch(batch.id).await.unwrap().unwrap().status,
            BatchStatus::Started
        );
    }

    #[tokio::test]
    async fn test_requeue_batch_rules() {
        let store = Arc::new(MemoryStore::new());
        let failed = store.insert_raw_batch("AAPL,MSFT", day(), BatchStatus::Failed, Utc::now());
        let done = store.insert_raw_batch("AMD,INTC", day(), BatchStatus::Completed, Utc::now());
        let ctx = context(store);

        let requeued = requeue_batch(&ctx, failed.id).await.unwrap();
        assert_eq!(requeued.status, BatchStatus::Started);
        assert!(ctx.queue.contains_batch(failed.id));

        assert!(matches!(
            requeue_batch(&ctx, failed.id).await,
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            requeue_batch(&ctx, done.id).await,
            Err(AppError::Store(StoreError::InvalidTransition { .. }))
        ));
        assert!(matches!(requeue_batch(&ctx, 999).await, Err(AppError::NotFound)));
    }
}
