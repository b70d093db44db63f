use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::errors::AppError;
use crate::jobs::{batch_formation_job, queue_monitor_job};
use crate::services::scheduler_context::SchedulerContext;
use crate::services::worker;

/// Context passed to job functions
pub type JobContext = Arc<SchedulerContext>;

#[derive(Debug)]
pub struct JobResult {
    pub items_processed: i32,
    pub items_failed: i32,
}

/// Owns the timers and the worker task. `start` brings everything up,
/// `stop` tears it down in order: worker first, then the timers.
pub struct JobSchedulerService {
    scheduler: JobScheduler,
    context: JobContext,
    shutdown: CancellationToken,
    worker: Option<JoinHandle<()>>,
}

impl JobSchedulerService {
    pub async fn new(context: JobContext) -> Result<Self, AppError> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| AppError::External(format!("Failed to create scheduler: {}", e)))?;

        Ok(Self {
            scheduler,
            context,
            shutdown: CancellationToken::new(),
            worker: None,
        })
    }

    pub async fn start(&mut self) -> Result<(), AppError> {
        info!("🚀 Starting analysis scheduler...");

        let scan_schedule = self.context.config.scan_schedule.clone();
        self.schedule_job(
            &scan_schedule,
            "batch_formation",
            "Recovery + batch formation",
            batch_formation_job::run_batch_formation,
        )
        .await?;

        let monitor_schedule = self.context.config.monitor_schedule.clone();
        self.schedule_job(
            &monitor_schedule,
            "queue_monitor",
            "Queue depth and worker activity",
            queue_monitor_job::report_queue_status,
        )
        .await?;

        self.worker = Some(tokio::spawn(worker::run_worker(
            self.context.clone(),
            self.shutdown.child_token(),
        )));

        self.scheduler
            .start()
            .await
            .map_err(|e| AppError::External(format!("Failed to start scheduler: {}", e)))?;

        // Pick up work left behind by a previous process without waiting for the first tick
        let context = self.context.clone();
        tokio::spawn(async move {
            execute_job_with_tracking(
                "startup_recovery",
                context,
                Arc::new(batch_formation_job::run_batch_formation),
            )
            .await;
        });

        info!("✅ Analysis scheduler started with 2 jobs and 1 worker");
        Ok(())
    }

    /// Stop the worker (letting an in-flight job finish) and the timers.
    pub async fn stop(&mut self) -> Result<(), AppError> {
        info!("🛑 Stopping analysis scheduler...");
        self.shutdown.cancel();

        if let Some(handle) = self.worker.take() {
            if let Err(e) = handle.await {
                warn!("Worker task ended abnormally: {}", e);
            }
        }

        self.scheduler
            .shutdown()
            .await
            .map_err(|e| AppError::External(format!("Failed to stop scheduler: {}", e)))?;
        info!("✅ Analysis scheduler stopped");
        Ok(())
    }

    async fn schedule_job<F, Fut>(
        &mut self,
        schedule: &str,
        job_name: &'static str,
        description: &str,
        job_fn: F,
    ) -> Result<(), AppError>
    where
        F: Fn(JobContext) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<JobResult, AppError>> + Send + 'static,
    {
        let context = self.context.clone();
        let job_fn = Arc::new(job_fn);

        let job = Job::new_async(schedule, move |_uuid, _l| {
            let context = context.clone();
            let job_fn = job_fn.clone();
            Box::pin(async move {
                execute_job_with_tracking(job_name, context, job_fn).await;
            })
        })
        .map_err(|e| AppError::External(format!("Failed to create job {}: {}", job_name, e)))?;

        self.scheduler
            .add(job)
            .await
            .map_err(|e| AppError::External(format!("Failed to add job {}: {}", job_name, e)))?;

        info!("📅 Scheduled: {} - {} [cron: {}]", job_name, description, schedule);
        Ok(())
    }
}

async fn execute_job_with_tracking<F, Fut>(job_name: &str, context: JobContext, job_fn: Arc<F>)
where
    F: Fn(JobContext) -> Fut,
    Fut: std::future::Future<Output = Result<JobResult, AppError>>,
{
    let started_at = Utc::now();
    let result = job_fn(context).await;
    let duration_ms = (Utc::now() - started_at).num_milliseconds();

    match result {
        Ok(job_result) => {
            info!(
                "✅ Job completed: {} (processed: {}, failed: {}, duration: {}ms)",
                job_name, job_result.items_processed, job_result.items_failed, duration_ms
            );
        }
        Err(AppError::Busy) => {
            info!("⏭️ Job {} skipped: previous run still in progress", job_name);
        }
        Err(e) => {
            error!("❌ Job failed: {} - {}", job_name, e);
        }
    }
}
