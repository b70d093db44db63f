use std::sync::Arc;

use serde_json::json;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::errors::JobError;
use crate::models::{
    AnalysisStatus, BatchOutcome, BatchRecord, BatchStatus, BatchTask, CandidateVerdictUpdate,
    IndividualTask, ParsedVerdict, Task, TaskPayload, BATCH_WINNER,
};
use crate::services::analysis_runner::TournamentResult;
use crate::services::scheduler_context::SchedulerContext;
use crate::services::verdict_scoring::composite_score;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    /// Individual job finished but its output could not be structured
    ParseError,
    /// Batch had nothing to compare
    Skipped,
    /// Batch was already terminal or gone; a duplicate delivery
    Stale,
}

/// Clears the active flag and starts the cooldown clock however the task
/// ends, panics included.
struct ActiveTask<'a> {
    ctx: &'a SchedulerContext,
    succeeded: bool,
}

impl Drop for ActiveTask<'_> {
    fn drop(&mut self) {
        self.ctx.finish_task(self.succeeded);
        self.ctx.limiter.mark_completed();
    }
}

/// The single consumer. Runs until `shutdown` is cancelled; a job already in
/// flight is allowed to reach its terminal state first.
pub async fn run_worker(ctx: Arc<SchedulerContext>, shutdown: CancellationToken) {
    info!("👷 Analysis worker started (cooldown {:?})", ctx.config.cooldown);

    while !shutdown.is_cancelled() {
        let Some(task) = ctx.queue.dequeue() else {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = sleep(ctx.config.idle_interval) => {}
            }
            continue;
        };

        // Cooldown is checked against the task actually dequeued
        let remaining = ctx.limiter.remaining();
        if !remaining.is_zero() {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("⏹️ Dropping {} on shutdown; recovery picks batches up on restart", task.label());
                    break;
                }
                _ = sleep(remaining) => {}
            }
        }

        execute_task(&ctx, task).await;
    }

    info!("🛑 Analysis worker stopped");
}

/// Run one task to completion. Never returns an error; failures are logged
/// and already reflected in the store.
pub async fn execute_task(ctx: &Arc<SchedulerContext>, task: Task) -> Option<TaskOutcome> {
    let label = task.label();
    ctx.begin_task(&task);
    let mut active = ActiveTask {
        ctx: ctx.as_ref(),
        succeeded: false,
    };

    info!("▶️ Starting {}", label);
    let started = std::time::Instant::now();

    // Spawned so a panic inside the task surfaces as a JoinError
    let handle = tokio::spawn(dispatch(ctx.clone(), task));

    let outcome = match handle.await {
        Ok(Ok(outcome)) => {
            info!("✅ Finished {} ({:?}) in {:?}", label, outcome, started.elapsed());
            active.succeeded = matches!(
                outcome,
                TaskOutcome::Completed | TaskOutcome::Skipped | TaskOutcome::Stale
            );
            Some(outcome)
        }
        Ok(Err(e)) => {
            error!("❌ {} failed after {:?}: {}", label, started.elapsed(), e);
            None
        }
        Err(join_error) => {
            error!("💥 {} panicked: {}", label, join_error);
            None
        }
    };

    drop(active);
    outcome
}

async fn dispatch(ctx: Arc<SchedulerContext>, task: Task) -> Result<TaskOutcome, JobError> {
    match task.payload {
        TaskPayload::Individual(individual) => run_individual(&ctx, individual).await,
        TaskPayload::BatchComparison(batch) => run_batch(&ctx, batch).await,
    }
}

async fn run_individual(ctx: &SchedulerContext, task: IndividualTask) -> Result<TaskOutcome, JobError> {
    let outcome = match ctx.runner.run_individual(&task.symbol, task.date).await {
        Ok(outcome) => outcome,
        Err(e) => {
            ctx.store
                .record_candidate_verdict(task.candidate_id, &CandidateVerdictUpdate::failed(e.raw_evidence()))
                .await?;
            return Err(e);
        }
    };

    let (update, result) = match &outcome.verdict {
        ParsedVerdict::Individual(verdict) => {
            let score = composite_score(verdict);
            info!("📊 {} verdict {} (score {:.1})", task.symbol, verdict.verdict, score);
            let update = CandidateVerdictUpdate {
                status: AnalysisStatus::Completed,
                verdict: Some(verdict.verdict.clone()),
                conviction: verdict.conviction.clone(),
                composite_score: Some(score),
                raw: Some(outcome.raw_text.clone()),
            };
            (update, TaskOutcome::Completed)
        }
        _ => {
            warn!("⚠️ {} output could not be structured", task.symbol);
            let update = CandidateVerdictUpdate {
                status: AnalysisStatus::ParseError,
                verdict: None,
                conviction: None,
                composite_score: None,
                raw: Some(outcome.raw_text.clone()),
            };
            (update, TaskOutcome::ParseError)
        }
    };

    ctx.store.record_candidate_verdict(task.candidate_id, &update).await?;

    let artifact = json!({
        "candidate_id": task.candidate_id,
        "symbol": task.symbol,
        "stage": outcome.stage,
        "verdict": outcome.verdict,
        "composite_score": update.composite_score,
    });
    ctx.archive
        .write(&task.symbol, task.date, &artifact, Some(&outcome.raw_text))
        .await?;

    Ok(result)
}

async fn run_batch(ctx: &SchedulerContext, task: BatchTask) -> Result<TaskOutcome, JobError> {
    let Some(batch) = ctx.store.get_batch(task.batch_id).await? else {
        warn!("⚠️ Batch {} no longer exists, dropping task", task.batch_id);
        return Ok(TaskOutcome::Stale);
    };

    if batch.status.is_terminal() {
        info!("⏭️ Batch {} already {}, dropping duplicate task", batch.id, batch.status);
        return Ok(TaskOutcome::Stale);
    }

    ctx.store.update_batch_status(batch.id, BatchStatus::Started).await?;

    if batch.candidate_symbols.is_empty() {
        warn!("⚠️ Batch {} has no symbols, skipping", batch.id);
        ctx.store.update_batch_status(batch.id, BatchStatus::Skipped).await?;
        return Ok(TaskOutcome::Skipped);
    }

    let result = match ctx.runner.run_tournament(&batch.candidate_symbols, batch.date).await {
        Ok(result) => result,
        Err(e) => {
            fail_batch(ctx, &batch, &e).await;
            return Err(e);
        }
    };

    if let Err(e) = complete_batch(ctx, &batch, &result).await {
        fail_batch(ctx, &batch, &e).await;
        return Err(e);
    }

    info!("🏆 Batch {} winner: {}", batch.id, result.winner);
    Ok(TaskOutcome::Completed)
}

async fn complete_batch(
    ctx: &SchedulerContext,
    batch: &BatchRecord,
    result: &TournamentResult,
) -> Result<(), JobError> {
    let raw_output = result.raw_output();
    let key = batch.candidate_symbols.as_slice().join("-");
    ctx.archive
        .write(&key, batch.date, result, raw_output.as_deref())
        .await?;

    ctx.store
        .record_batch_outcome(
            batch.id,
            &BatchOutcome {
                winner_symbol: Some(result.winner.clone()),
                rationale: result.rationale.clone(),
                raw_output,
            },
        )
        .await?;

    // Only once the outcome is stored
    match ctx.store.find_candidate(&result.winner, batch.date).await? {
        Some(candidate) => ctx.store.set_recommendation(candidate.id, BATCH_WINNER).await?,
        None => warn!("⚠️ Winner {} has no candidate row for {}", result.winner, batch.date),
    }

    ctx.store.update_batch_status(batch.id, BatchStatus::Completed).await?;
    Ok(())
}

/// Keep whatever evidence the failure left and mark the batch FAILED so an
/// operator can re-queue it.
async fn fail_batch(ctx: &SchedulerContext, batch: &BatchRecord, cause: &JobError) {
    let outcome = BatchOutcome {
        winner_symbol: None,
        rationale: Some(cause.to_string()),
        raw_output: cause.raw_evidence(),
    };

    if let Err(e) = ctx.store.record_batch_outcome(batch.id, &outcome).await {
        error!("❌ Could not store failure details for batch {}: {}", batch.id, e);
    }
    if let Err(e) = ctx.store.update_batch_status(batch.id, BatchStatus::Failed).await {
        error!("❌ Could not mark batch {} FAILED: {}", batch.id, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchedulerConfig;
    use crate::external::analysis_client::{
        AnalysisClient, AnalysisClientError, AnalysisRequest, ExternalJob, JobStatus,
    };
    use crate::models::{NewBatch, SymbolList};
    use crate::services::output_parser::OutputParser;
    use crate::store::{MemoryStore, SchedulerStore};
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use parking_lot::Mutex;
    use std::path::PathBuf;
    use std::time::Duration;
    use tokio::time::Instant;

    enum Script {
        /// Every poll returns this terminal state and outputs
        Reply(JobStatus, Vec<String>),
        /// Never leaves `running`
        Stuck,
        /// Blows up inside the worker's task
        Panic,
    }

    struct ScriptedClient {
        script: Script,
        submissions: Mutex<Vec<Instant>>,
    }

    impl ScriptedClient {
        fn new(script: Script) -> Arc<Self> {
            Arc::new(Self {
                script,
                submissions: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl AnalysisClient for ScriptedClient {
        async fn submit(&self, _request: &AnalysisRequest) -> Result<String, AnalysisClientError> {
            if matches!(self.script, Script::Panic) {
                panic!("analysis client crashed");
            }
            let mut subs = self.submissions.lock();
            subs.push(Instant::now());
            Ok(format!("job-{}", subs.len()))
        }

        async fn poll(&self, job_id: &str) -> Result<ExternalJob, AnalysisClientError> {
            let (status, outputs) = match &self.script {
                Script::Reply(status, outputs) => (*status, outputs.clone()),
                _ => (JobStatus::Running, Vec::new()),
            };
            Ok(ExternalJob {
                job_id: job_id.to_string(),
                status,
                outputs,
            })
        }
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 16).unwrap()
    }

    fn context(
        client: Arc<ScriptedClient>,
        archive_dir: PathBuf,
    ) -> (Arc<SchedulerContext>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let config = SchedulerConfig {
            cooldown: Duration::from_secs(60),
            poll_interval: Duration::from_secs(1),
            poll_max_attempts: 3,
            archive_dir,
            ..SchedulerConfig::default()
        };
        let ctx = SchedulerContext::new(
            config,
            store.clone(),
            client,
            Arc::new(OutputParser::offline()),
        );
        (ctx, store)
    }

    async fn seed_batch(store: &MemoryStore) -> BatchRecord {
        store.insert_candidate("AAA", day(), 90.0);
        store.insert_candidate("BBB", day(), 80.0);
        store
            .create_batch(&NewBatch::pending(SymbolList::new(["AAA", "BBB"]), day()))
            .await
            .unwrap()
    }

    fn batch_task(batch: &BatchRecord) -> Task {
        Task::batch(batch.id, batch.candidate_symbols.clone(), batch.date)
    }

    fn winners(store: &MemoryStore) -> Vec<String> {
        store
            .candidates()
            .into_iter()
            .filter(|c| c.recommendation.as_deref() == Some(BATCH_WINNER))
            .map(|c| c.symbol)
            .collect()
    }

    fn assert_released(ctx: &SchedulerContext) {
        let state = ctx.worker_state();
        assert!(!state.active);
        assert!(state.current_task.is_none());
        assert!(state.in_flight_batch.is_none());
        assert_eq!(state.failed, 1);
        assert!(ctx.limiter.last_completion().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_batch_is_failed_and_worker_released() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, store) = context(ScriptedClient::new(Script::Stuck), dir.path().to_path_buf());
        let batch = seed_batch(&store).await;

        assert_eq!(execute_task(&ctx, batch_task(&batch)).await, None);

        let stored = store.get_batch(batch.id).await.unwrap().unwrap();
        assert_eq!(stored.status, BatchStatus::Failed);
        assert!(stored.winner_symbol.is_none());
        assert!(stored.rationale.unwrap().contains("did not finish after 3 polls"));
        assert!(winners(&store).is_empty());
        assert_released(&ctx);
    }

    #[tokio::test(start_paused = true)]
    async fn test_comparison_without_winner_keeps_raw_output() {
        let dir = tempfile::tempdir().unwrap();
        let client = ScriptedClient::new(Script::Reply(
            JobStatus::Completed,
            vec!["Both look fine to me".to_string()],
        ));
        let (ctx, store) = context(client, dir.path().to_path_buf());
        let batch = seed_batch(&store).await;

        assert_eq!(execute_task(&ctx, batch_task(&batch)).await, None);

        let stored = store.get_batch(batch.id).await.unwrap().unwrap();
        assert_eq!(stored.status, BatchStatus::Failed);
        assert_eq!(stored.raw_output.as_deref(), Some("Both look fine to me"));
        assert!(winners(&store).is_empty());
        assert_released(&ctx);
    }

    #[tokio::test(start_paused = true)]
    async fn test_archive_failure_leaves_no_winner_behind() {
        // A regular file where the archive directory should be
        let blocker = tempfile::NamedTempFile::new().unwrap();
        let client = ScriptedClient::new(Script::Reply(
            JobStatus::Completed,
            vec![r#"{"winner": "AAA", "rationale": "stronger trend"}"#.to_string()],
        ));
        let (ctx, store) = context(client, blocker.path().to_path_buf());
        let batch = seed_batch(&store).await;

        assert_eq!(execute_task(&ctx, batch_task(&batch)).await, None);

        let stored = store.get_batch(batch.id).await.unwrap().unwrap();
        assert_eq!(stored.status, BatchStatus::Failed);
        assert!(stored.winner_symbol.is_none());
        assert!(winners(&store).is_empty());
        assert_released(&ctx);
    }

    #[tokio::test(start_paused = true)]
    async fn test_completed_batch_marks_single_winner() {
        let dir = tempfile::tempdir().unwrap();
        let client = ScriptedClient::new(Script::Reply(
            JobStatus::Completed,
            vec![r#"{"winner": "BBB", "rationale": "better risk/reward"}"#.to_string()],
        ));
        let (ctx, store) = context(client, dir.path().to_path_buf());
        let batch = seed_batch(&store).await;

        assert_eq!(execute_task(&ctx, batch_task(&batch)).await, Some(TaskOutcome::Completed));

        let stored = store.get_batch(batch.id).await.unwrap().unwrap();
        assert_eq!(stored.status, BatchStatus::Completed);
        assert_eq!(stored.winner_symbol.as_deref(), Some("BBB"));
        assert_eq!(winners(&store), vec!["BBB"]);
        assert_eq!(ctx.worker_state().completed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_individual_job_failure_records_failed_status() {
        let dir = tempfile::tempdir().unwrap();
        let client = ScriptedClient::new(Script::Reply(
            JobStatus::Failed,
            vec!["partial notes".to_string()],
        ));
        let (ctx, store) = context(client, dir.path().to_path_buf());
        let candidate = store.insert_candidate("CCC", day(), 50.0);

        let task = Task::individual(candidate.id, "CCC", day());
        assert_eq!(execute_task(&ctx, task).await, None);

        let stored = store.get_candidate(candidate.id).await.unwrap().unwrap();
        assert_eq!(stored.analysis_status.as_deref(), Some("FAILED"));
        assert_eq!(stored.analysis_raw.as_deref(), Some("partial notes"));
        assert!(stored.verdict.is_none());
        assert_released(&ctx);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_task_releases_worker() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, store) = context(ScriptedClient::new(Script::Panic), dir.path().to_path_buf());
        let batch = seed_batch(&store).await;

        assert_eq!(execute_task(&ctx, batch_task(&batch)).await, None);

        // Left STARTED for recovery to pick up as a zombie
        let stored = store.get_batch(batch.id).await.unwrap().unwrap();
        assert_eq!(stored.status, BatchStatus::Started);
        assert_released(&ctx);
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_arriving_while_idle_still_waits_for_cooldown() {
        let dir = tempfile::tempdir().unwrap();
        let client = ScriptedClient::new(Script::Reply(
            JobStatus::Completed,
            vec![r#"{"verdict": "HOLD"}"#.to_string()],
        ));
        let (ctx, store) = context(client.clone(), dir.path().to_path_buf());
        let candidate = store.insert_candidate("DDD", day(), 40.0);

        ctx.limiter.mark_completed();
        let completed_at = Instant::now();

        let shutdown = CancellationToken::new();
        let worker = tokio::spawn(run_worker(ctx.clone(), shutdown.clone()));
        sleep(Duration::from_millis(1500)).await;
        ctx.enqueue_individual(candidate.id).await.unwrap();

        for _ in 0..200 {
            if !client.submissions.lock().is_empty() {
                break;
            }
            sleep(Duration::from_secs(1)).await;
        }
        shutdown.cancel();
        worker.await.unwrap();

        let submissions = client.submissions.lock();
        assert_eq!(submissions.len(), 1);
        assert!(submissions[0] - completed_at >= Duration::from_secs(60));
    }
}
