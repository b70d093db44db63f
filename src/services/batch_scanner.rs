use serde::Serialize;
use tracing::{info, warn};

use crate::errors::{AppError, StoreError};
use crate::models::{CandidateRecord, NewBatch, SymbolList, Task, BATCH_WINNER};
use crate::services::recovery_service::{recover_incomplete_batches, RecoverySummary};
use crate::services::scheduler_context::SchedulerContext;

/// How one day's unbatched candidates split into comparison batches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchPlan {
    pub batches: Vec<SymbolList>,
    /// A lone leftover that wins without a comparison
    pub promoted: Option<String>,
}

/// Chunk candidates in score order (ties broken by symbol). Full chunks of
/// `chunk_size` first; a remainder of 1 is promoted, anything larger becomes
/// one smaller batch.
pub fn plan_batches(candidates: &[CandidateRecord], chunk_size: usize) -> BatchPlan {
    let chunk_size = chunk_size.max(2);

    let mut ranked: Vec<&CandidateRecord> = candidates.iter().collect();
    ranked.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.symbol.cmp(&b.symbol)));

    let mut plan = BatchPlan::default();
    for chunk in ranked.chunks(chunk_size) {
        if chunk.len() == 1 {
            plan.promoted = Some(chunk[0].symbol.clone());
        } else {
            plan.batches.push(chunk.iter().map(|c| c.symbol.clone()).collect());
        }
    }
    plan
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanSummary {
    pub dates_scanned: usize,
    pub batches_formed: usize,
    pub singletons_promoted: usize,
    pub conflicts: usize,
    pub recovery: RecoverySummary,
}

/// One pass of recovery followed by batch formation. Only one pass runs at
/// a time; a concurrent call gets `AppError::Busy`.
pub async fn run_scan(ctx: &SchedulerContext) -> Result<ScanSummary, AppError> {
    let Ok(_guard) = ctx.scan_lock().try_lock() else {
        return Err(AppError::Busy);
    };

    let mut summary = ScanSummary {
        recovery: recover_incomplete_batches(ctx).await?,
        ..ScanSummary::default()
    };

    for date in ctx.store.unbatched_dates().await? {
        summary.dates_scanned += 1;
        let candidates = ctx.store.unbatched_candidates(date).await?;
        let plan = plan_batches(&candidates, ctx.config.chunk_size);

        for symbols in plan.batches {
            match ctx.store.create_batch(&NewBatch::pending(symbols, date)).await {
                Ok(batch) => {
                    info!("📦 Formed batch {} {} for {}", batch.id, batch.candidate_symbols, date);
                    ctx.queue
                        .enqueue(Task::batch(batch.id, batch.candidate_symbols, batch.date));
                    summary.batches_formed += 1;
                }
                Err(StoreError::Conflict(msg)) => {
                    warn!("⚠️ Skipping batch: {}", msg);
                    summary.conflicts += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }

        if let Some(symbol) = plan.promoted {
            match ctx.store.create_batch(&NewBatch::promoted(&symbol, date)).await {
                Ok(_) => {
                    if let Some(candidate) = ctx.store.find_candidate(&symbol, date).await? {
                        ctx.store.set_recommendation(candidate.id, BATCH_WINNER).await?;
                    }
                    info!("🥇 {} promoted as sole remaining candidate for {}", symbol, date);
                    summary.singletons_promoted += 1;
                }
                Err(StoreError::Conflict(msg)) => {
                    warn!("⚠️ Skipping promotion: {}", msg);
                    summary.conflicts += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    if summary.batches_formed > 0 || summary.singletons_promoted > 0 {
        info!(
            "✅ Scan formed {} batches and promoted {} singletons across {} dates",
            summary.batches_formed, summary.singletons_promoted, summary.dates_scanned
        );
    }

    Ok(summary)
}
