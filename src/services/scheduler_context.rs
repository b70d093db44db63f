use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::info;

use crate::config::SchedulerConfig;
use crate::errors::AppError;
use crate::external::analysis_client::AnalysisClient;
use crate::models::Task;
use crate::services::analysis_runner::{AnalysisRunner, PollPolicy};
use crate::services::artifact_archive::ArtifactArchive;
use crate::services::output_parser::OutputParser;
use crate::services::rate_limiter::RateLimiter;
use crate::services::task_queue::{QueueDepths, TaskQueue};
use crate::store::SchedulerStore;

/// What the single worker is doing right now.
#[derive(Debug, Clone, Default)]
pub struct WorkerState {
    pub active: bool,
    pub current_task: Option<String>,
    pub in_flight_batch: Option<i64>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub worker_active: bool,
    pub current_task: Option<String>,
    pub in_flight_batch: Option<i64>,
    pub active_for_seconds: Option<i64>,
    pub cooldown_remaining_ms: u64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub queue: QueueDepths,
}

/// Everything the worker, the periodic jobs and the HTTP handlers share.
/// Built once at startup and passed around as `Arc<SchedulerContext>`.
pub struct SchedulerContext {
    pub config: SchedulerConfig,
    pub queue: TaskQueue,
    pub limiter: Arc<RateLimiter>,
    pub store: Arc<dyn SchedulerStore>,
    pub runner: AnalysisRunner,
    pub archive: ArtifactArchive,
    worker_state: Mutex<WorkerState>,
    scan_lock: tokio::sync::Mutex<()>,
}

impl SchedulerContext {
    pub fn new(
        config: SchedulerConfig,
        store: Arc<dyn SchedulerStore>,
        client: Arc<dyn AnalysisClient>,
        parser: Arc<OutputParser>,
    ) -> Arc<Self> {
        let limiter = Arc::new(RateLimiter::new(config.cooldown));
        let runner = AnalysisRunner::new(
            client,
            parser,
            limiter.clone(),
            PollPolicy::from_config(&config),
            config.chunk_size,
        );
        let archive = ArtifactArchive::new(config.archive_dir.clone());

        Arc::new(Self {
            config,
            queue: TaskQueue::new(),
            limiter,
            store,
            runner,
            archive,
            worker_state: Mutex::new(WorkerState::default()),
            scan_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn worker_state(&self) -> WorkerState {
        self.worker_state.lock().clone()
    }

    pub fn is_in_flight(&self, batch_id: i64) -> bool {
        self.worker_state.lock().in_flight_batch == Some(batch_id)
    }

    pub(crate) fn begin_task(&self, task: &Task) {
        let mut state = self.worker_state.lock();
        state.active = true;
        state.current_task = Some(task.label());
        state.in_flight_batch = task.batch_id();
        state.started_at = Some(Utc::now());
    }

    pub(crate) fn finish_task(&self, succeeded: bool) {
        let mut state = self.worker_state.lock();
        state.active = false;
        state.current_task = None;
        state.in_flight_batch = None;
        state.started_at = None;
        if succeeded {
            state.completed += 1;
        } else {
            state.failed += 1;
        }
    }

    pub(crate) fn scan_lock(&self) -> &tokio::sync::Mutex<()> {
        &self.scan_lock
    }

    pub fn status(&self) -> SchedulerStatus {
        let state = self.worker_state();
        SchedulerStatus {
            worker_active: state.active,
            active_for_seconds: state
                .started_at
                .map(|started| (Utc::now() - started).num_seconds()),
            current_task: state.current_task,
            in_flight_batch: state.in_flight_batch,
            cooldown_remaining_ms: self.limiter.remaining().as_millis() as u64,
            tasks_completed: state.completed,
            tasks_failed: state.failed,
            queue: self.queue.depths(),
        }
    }

    /// Queue an individual analysis for an existing candidate.
    pub async fn enqueue_individual(&self, candidate_id: i64) -> Result<Task, AppError> {
        let candidate = self
            .store
            .get_candidate(candidate_id)
            .await?
            .ok_or(AppError::NotFound)?;

        let task = Task::individual(candidate.id, candidate.symbol, candidate.date);
        self.queue.enqueue(task.clone());
        info!("📥 Queued {}", task.label());
        Ok(task)
    }
}
