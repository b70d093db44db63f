use crate::errors::AppError;
use crate::services::job_scheduler_service::{JobContext, JobResult};
use tracing::{info, warn};

/// Emit queue depths and how long the current task has been running.
/// Holds no scheduling state.
pub async fn report_queue_status(ctx: JobContext) -> Result<JobResult, AppError> {
    let status = ctx.status();

    match (&status.current_task, status.active_for_seconds) {
        (Some(task), Some(seconds)) => {
            info!(
                "📊 Queue: {} individual, {} batch | running {} for {}s",
                status.queue.individual, status.queue.batch, task, seconds
            );
            let limit = ctx.config.max_poll_duration().as_secs() as i64;
            if seconds > limit {
                warn!("🐢 {} has been running for {}s, longer than the poll budget", task, seconds);
            }
        }
        _ => {
            info!(
                "📊 Queue: {} individual, {} batch | worker idle",
                status.queue.individual, status.queue.batch
            );
        }
    }

    Ok(JobResult {
        items_processed: status.queue.total() as i32,
        items_failed: 0,
    })
}
