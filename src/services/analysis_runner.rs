use std::sync::Arc;

use chrono::NaiveDate;
use serde::Serialize;
use tokio::time::{sleep, Duration};
use tracing::{info, warn};

use crate::config::SchedulerConfig;
use crate::errors::JobError;
use crate::external::analysis_client::{AnalysisClient, AnalysisRequest, JobStatus};
use crate::models::{ParseOutcome, ParseStage, ParsedVerdict, SymbolList, TaskKind};
use crate::services::output_parser::OutputParser;
use crate::services::rate_limiter::RateLimiter;

#[derive(Debug, Clone, Copy)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl PollPolicy {
    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self {
            interval: config.poll_interval,
            max_attempts: config.poll_max_attempts,
        }
    }
}

/// Outputs of a job that reached `completed`.
#[derive(Debug, Clone)]
pub struct CompletedJob {
    pub job_id: String,
    pub outputs: Vec<String>,
}

/// One comparison inside a tournament round.
#[derive(Debug, Clone, Serialize)]
pub struct GroupResult {
    pub symbols: SymbolList,
    pub winner: String,
    pub rationale: Option<String>,
    /// `None` when the group was a bye and no job ran
    pub stage: Option<ParseStage>,
    pub job_id: Option<String>,
    pub raw_text: Option<String>,
}

impl GroupResult {
    fn bye(symbol: &str) -> Self {
        Self {
            symbols: SymbolList::new([symbol]),
            winner: symbol.to_string(),
            rationale: None,
            stage: None,
            job_id: None,
            raw_text: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TournamentRound {
    pub round: usize,
    pub groups: Vec<GroupResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TournamentResult {
    pub winner: String,
    pub rationale: Option<String>,
    pub rounds: Vec<TournamentRound>,
}

impl TournamentResult {
    pub fn jobs_run(&self) -> usize {
        self.rounds
            .iter()
            .flat_map(|r| r.groups.iter())
            .filter(|g| g.job_id.is_some())
            .count()
    }

    /// Raw text of every comparison job, oldest first.
    pub fn raw_output(&self) -> Option<String> {
        let parts: Vec<&str> = self
            .rounds
            .iter()
            .flat_map(|r| r.groups.iter())
            .filter_map(|g| g.raw_text.as_deref())
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n\n"))
        }
    }
}

/// Drives jobs against the analysis service: submit, poll to a terminal
/// state, parse. Never runs two jobs at once.
pub struct AnalysisRunner {
    client: Arc<dyn AnalysisClient>,
    parser: Arc<OutputParser>,
    limiter: Arc<RateLimiter>,
    policy: PollPolicy,
    chunk_size: usize,
}

impl AnalysisRunner {
    pub fn new(
        client: Arc<dyn AnalysisClient>,
        parser: Arc<OutputParser>,
        limiter: Arc<RateLimiter>,
        policy: PollPolicy,
        chunk_size: usize,
    ) -> Self {
        Self {
            client,
            parser,
            limiter,
            policy,
            chunk_size: chunk_size.max(2),
        }
    }

    /// Submit one job and poll it to a terminal state.
    pub async fn run_job(&self, request: &AnalysisRequest) -> Result<CompletedJob, JobError> {
        let job_id = self
            .client
            .submit(request)
            .await
            .map_err(|e| JobError::Submission(e.to_string()))?;

        info!("🚀 Submitted {} job {}", request.kind, job_id);
        self.await_completion(job_id).await
    }

    async fn await_completion(&self, job_id: String) -> Result<CompletedJob, JobError> {
        for attempt in 1..=self.policy.max_attempts {
            sleep(self.policy.interval).await;

            match self.client.poll(&job_id).await {
                Ok(job) => match job.status {
                    JobStatus::Completed => {
                        info!("✅ Job {} completed after {} polls", job_id, attempt);
                        return Ok(CompletedJob {
                            job_id,
                            outputs: job.outputs,
                        });
                    }
                    JobStatus::Failed => {
                        warn!("❌ Job {} failed remotely", job_id);
                        return Err(JobError::Failed {
                            job_id,
                            outputs: job.outputs,
                        });
                    }
                    JobStatus::Running => {}
                },
                Err(e) => {
                    warn!(
                        "⚠️ Poll {}/{} for job {} failed: {}",
                        attempt, self.policy.max_attempts, job_id, e
                    );
                }
            }
        }

        warn!("⏱️ Job {} timed out after {} polls", job_id, self.policy.max_attempts);
        Err(JobError::Timeout {
            job_id,
            attempts: self.policy.max_attempts,
        })
    }

    pub async fn run_individual(&self, symbol: &str, date: NaiveDate) -> Result<ParseOutcome, JobError> {
        let job = self.run_job(&AnalysisRequest::individual(symbol, date)).await?;
        Ok(self.parser.parse(TaskKind::Individual, &job.outputs).await)
    }

    /// Reduce `symbols` to a single winner in rounds of `chunk_size`. A
    /// group of one advances without a job. The cooldown is honoured
    /// between consecutive jobs; the caller is expected to have waited
    /// before the first.
    pub async fn run_tournament(
        &self,
        symbols: &SymbolList,
        date: NaiveDate,
    ) -> Result<TournamentResult, JobError> {
        if symbols.is_empty() {
            return Err(JobError::Unresolved {
                reason: "batch has no symbols".to_string(),
                raw: None,
            });
        }

        let mut contenders = symbols.clone();
        let mut rounds = Vec::new();
        let mut submitted = false;

        while contenders.len() > 1 {
            let round = rounds.len() + 1;
            let mut groups = Vec::new();

            for group in contenders.chunks(self.chunk_size) {
                if group.len() == 1 {
                    groups.push(GroupResult::bye(&group.as_slice()[0]));
                    continue;
                }

                if submitted {
                    self.limiter.wait().await;
                }
                info!("🏁 Round {}: comparing {}", round, group);
                let result = self.compare(&group, date).await;
                self.limiter.mark_completed();
                submitted = true;

                groups.push(result?);
            }

            contenders = groups.iter().map(|g| g.winner.clone()).collect();
            rounds.push(TournamentRound { round, groups });
        }

        let winner = contenders.as_slice()[0].clone();
        let rationale = rounds
            .last()
            .and_then(|r| r.groups.iter().find(|g| g.winner == winner))
            .and_then(|g| g.rationale.clone());

        Ok(TournamentResult {
            winner,
            rationale,
            rounds,
        })
    }

    async fn compare(&self, group: &SymbolList, date: NaiveDate) -> Result<GroupResult, JobError> {
        let job = self.run_job(&AnalysisRequest::comparison(group, date)).await?;
        let outcome = self.parser.parse(TaskKind::BatchComparison, &job.outputs).await;

        let winner = resolve_winner(group, &outcome.verdict).ok_or_else(|| JobError::Unresolved {
            reason: format!("job {} named no winner from {}", job.job_id, group),
            raw: Some(outcome.raw_text.clone()),
        })?;

        Ok(GroupResult {
            symbols: group.clone(),
            winner,
            rationale: outcome.verdict.as_comparison().and_then(|v| v.rationale.clone()),
            stage: Some(outcome.stage),
            job_id: Some(job.job_id),
            raw_text: Some(outcome.raw_text),
        })
    }
}

/// The parsed winner if it belongs to the group, otherwise the best ranked
/// member of the group.
pub fn resolve_winner(group: &SymbolList, verdict: &ParsedVerdict) -> Option<String> {
    let comparison = verdict.as_comparison()?;

    std::iter::once(&comparison.winner)
        .chain(comparison.ranking.iter())
        .find_map(|candidate| {
            group
                .iter()
                .find(|member| member.eq_ignore_ascii_case(candidate))
                .cloned()
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::analysis_client::{AnalysisClientError, ExternalJob};
    use crate::models::{ComparisonVerdict, ParseFailure};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// Completes every job on its first poll, replying with scripted outputs.
    #[derive(Default)]
    struct ScriptedClient {
        replies: Mutex<VecDeque<(JobStatus, Vec<String>)>>,
        submissions: Mutex<Vec<(AnalysisRequest, tokio::time::Instant)>>,
        failing_polls: Mutex<u32>,
    }

    impl ScriptedClient {
        fn with_replies(replies: Vec<(JobStatus, Vec<String>)>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                ..Default::default()
            })
        }
    }

    #[async_trait]
    impl AnalysisClient for ScriptedClient {
        async fn submit(&self, request: &AnalysisRequest) -> Result<String, AnalysisClientError> {
            let mut subs = self.submissions.lock();
            subs.push((request.clone(), tokio::time::Instant::now()));
            Ok(format!("job-{}", subs.len()))
        }

        async fn poll(&self, job_id: &str) -> Result<ExternalJob, AnalysisClientError> {
            {
                let mut failing = self.failing_polls.lock();
                if *failing > 0 {
                    *failing -= 1;
                    return Err(AnalysisClientError::Network("connection reset".into()));
                }
            }
            let (status, outputs) = self
                .replies
                .lock()
                .pop_front()
                .unwrap_or((JobStatus::Running, Vec::new()));
            Ok(ExternalJob {
                job_id: job_id.to_string(),
                status,
                outputs,
            })
        }
    }

    fn runner(client: Arc<ScriptedClient>, max_attempts: u32) -> AnalysisRunner {
        AnalysisRunner::new(
            client,
            Arc::new(OutputParser::offline()),
            Arc::new(RateLimiter::new(Duration::from_secs(60))),
            PollPolicy {
                interval: Duration::from_secs(10),
                max_attempts,
            },
            4,
        )
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 16).unwrap()
    }

    fn winner(symbol: &str) -> (JobStatus, Vec<String>) {
        (
            JobStatus::Completed,
            vec![format!(r#"{{"winner": "{}", "rationale": "best setup"}}"#, symbol)],
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_errors_count_against_budget_then_timeout() {
        let client = ScriptedClient::with_replies(vec![]);
        *client.failing_polls.lock() = 2;
        let runner = runner(client, 5);

        let err = runner
            .run_job(&AnalysisRequest::individual("AAPL", day()))
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::Timeout { attempts: 5, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_failure_keeps_outputs() {
        let client = ScriptedClient::with_replies(vec![(
            JobStatus::Failed,
            vec!["partial analysis".to_string()],
        )]);
        let err = runner(client, 5)
            .run_job(&AnalysisRequest::individual("AAPL", day()))
            .await
            .unwrap_err();
        assert_eq!(err.raw_evidence().as_deref(), Some("partial analysis"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tournament_of_four_runs_one_job() {
        let client = ScriptedClient::with_replies(vec![winner("MSFT")]);
        let runner = runner(client.clone(), 5);

        let result = runner
            .run_tournament(&SymbolList::new(["AAPL", "MSFT", "NVDA", "AMD"]), day())
            .await
            .unwrap();
        assert_eq!(result.winner, "MSFT");
        assert_eq!(result.rationale.as_deref(), Some("best setup"));
        assert_eq!(result.jobs_run(), 1);
        assert_eq!(client.submissions.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_multi_round_tournament_respects_cooldown() {
        // 9 symbols: [4][4][1 bye] -> [3] -> winner
        let client = ScriptedClient::with_replies(vec![winner("B"), winner("F"), winner("F")]);
        let runner = runner(client.clone(), 5);
        let symbols = SymbolList::new(["A", "B", "C", "D", "E", "F", "G", "H", "I"]);

        let result = runner.run_tournament(&symbols, day()).await.unwrap();
        assert_eq!(result.winner, "F");
        assert_eq!(result.rounds.len(), 2);
        assert_eq!(result.rounds[0].groups[2].stage, None);
        assert_eq!(result.rounds[1].groups[0].symbols, SymbolList::new(["B", "F", "I"]));

        let subs = client.submissions.lock();
        assert_eq!(subs.len(), 3);
        for pair in subs.windows(2) {
            assert!(pair[1].1 - pair[0].1 >= Duration::from_secs(60));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_unparseable_comparison_fails_with_raw_text() {
        let client = ScriptedClient::with_replies(vec![(
            JobStatus::Completed,
            vec!["I like all of them".to_string()],
        )]);
        let err = runner(client, 5)
            .run_tournament(&SymbolList::new(["AAPL", "MSFT"]), day())
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::Unresolved { .. }));
        assert_eq!(err.raw_evidence().as_deref(), Some("I like all of them"));
    }

    #[test]
    fn test_resolve_winner_falls_back_to_ranking() {
        let group = SymbolList::new(["AAPL", "MSFT"]);
        let verdict = ParsedVerdict::Comparison(ComparisonVerdict {
            winner: "TSLA".to_string(),
            rationale: None,
            ranking: vec!["TSLA".to_string(), "msft".to_string()],
        });
        assert_eq!(resolve_winner(&group, &verdict).as_deref(), Some("MSFT"));

        let failure = ParsedVerdict::ParseError(ParseFailure::new(TaskKind::BatchComparison, "x", "y"));
        assert_eq!(resolve_winner(&group, &failure), None);
    }
}
