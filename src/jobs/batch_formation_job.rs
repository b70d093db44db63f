use crate::errors::AppError;
use crate::services::batch_scanner;
use crate::services::job_scheduler_service::{JobContext, JobResult};
use tracing::info;

/// Periodic pass: recover abandoned batches, then group newly arrived
/// candidates into comparison batches.
pub async fn run_batch_formation(ctx: JobContext) -> Result<JobResult, AppError> {
    info!("🔎 Scanning for unbatched candidates...");

    let summary = batch_scanner::run_scan(&ctx).await?;

    Ok(JobResult {
        items_processed: (summary.batches_formed
            + summary.singletons_promoted
            + summary.recovery.requeued) as i32,
        items_failed: (summary.conflicts + summary.recovery.errors) as i32,
    })
}
