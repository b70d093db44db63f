use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;

use super::SchedulerStore;
use crate::errors::StoreError;
use crate::models::{
    BatchOutcome, BatchRecord, BatchStatus, CandidateRecord, CandidateVerdictUpdate, NewBatch,
    SymbolList,
};

/// In-process store. Candidate linking is serialized by `link_guard` so two
/// concurrent `create_batch` calls cannot claim the same candidate.
#[derive(Default)]
pub struct MemoryStore {
    candidates: DashMap<i64, CandidateRecord>,
    batches: DashMap<i64, BatchRecord>,
    next_id: AtomicI64,
    link_guard: Mutex<()>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Seed an unbatched candidate, as the upstream scanner would.
    pub fn insert_candidate(&self, symbol: &str, date: NaiveDate, score: f64) -> CandidateRecord {
        let record = CandidateRecord {
            id: self.allocate_id(),
            symbol: symbol.trim().to_ascii_uppercase(),
            date,
            score,
            recommendation: None,
            batch_id: None,
            verdict: None,
            conviction: None,
            composite_score: None,
            analysis_status: None,
            analysis_raw: None,
            analyzed_at: None,
        };
        self.candidates.insert(record.id, record.clone());
        record
    }

    /// Seed a batch row whose symbols are stored in a legacy encoding.
    pub fn insert_raw_batch(
        &self,
        stored_symbols: &str,
        date: NaiveDate,
        status: BatchStatus,
        updated_at: DateTime<Utc>,
    ) -> BatchRecord {
        let record = BatchRecord {
            id: self.allocate_id(),
            candidate_symbols: SymbolList::from_stored(stored_symbols),
            date,
            status,
            winner_symbol: None,
            rationale: None,
            raw_output: None,
            created_at: updated_at,
            updated_at,
        };
        self.batches.insert(record.id, record.clone());
        record
    }

    pub fn set_batch_updated_at(&self, id: i64, updated_at: DateTime<Utc>) {
        if let Some(mut batch) = self.batches.get_mut(&id) {
            batch.updated_at = updated_at;
        }
    }

    pub fn candidates(&self) -> Vec<CandidateRecord> {
        let mut all: Vec<_> = self.candidates.iter().map(|e| e.value().clone()).collect();
        all.sort_by_key(|c| c.id);
        all
    }

    pub fn batches(&self) -> Vec<BatchRecord> {
        let mut all: Vec<_> = self.batches.iter().map(|e| e.value().clone()).collect();
        all.sort_by_key(|b| b.id);
        all
    }
}

#[async_trait]
impl SchedulerStore for MemoryStore {
    async fn unbatched_dates(&self) -> Result<Vec<NaiveDate>, StoreError> {
        let mut dates: Vec<NaiveDate> = self
            .candidates
            .iter()
            .filter(|c| c.batch_id.is_none())
            .map(|c| c.date)
            .collect();
        dates.sort();
        dates.dedup();
        Ok(dates)
    }

    async fn unbatched_candidates(&self, date: NaiveDate) -> Result<Vec<CandidateRecord>, StoreError> {
        let mut rows: Vec<CandidateRecord> = self
            .candidates
            .iter()
            .filter(|c| c.batch_id.is_none() && c.date == date)
            .map(|c| c.value().clone())
            .collect();
        rows.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.symbol.cmp(&b.symbol)));
        Ok(rows)
    }

    async fn get_candidate(&self, id: i64) -> Result<Option<CandidateRecord>, StoreError> {
        Ok(self.candidates.get(&id).map(|c| c.value().clone()))
    }

    async fn find_candidate(
        &self,
        symbol: &str,
        date: NaiveDate,
    ) -> Result<Option<CandidateRecord>, StoreError> {
        let symbol = symbol.trim();
        Ok(self
            .candidates
            .iter()
            .find(|c| c.date == date && c.symbol.eq_ignore_ascii_case(symbol))
            .map(|c| c.value().clone()))
    }

    async fn record_candidate_verdict(
        &self,
        id: i64,
        update: &CandidateVerdictUpdate,
    ) -> Result<(), StoreError> {
        let mut candidate = self
            .candidates
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("candidate {}", id)))?;

        candidate.verdict = update.verdict.clone();
        candidate.conviction = update.conviction.clone();
        candidate.composite_score = update.composite_score;
        candidate.analysis_status = Some(update.status.as_str().to_string());
        candidate.analysis_raw = update.raw.clone();
        candidate.analyzed_at = Some(Utc::now());
        Ok(())
    }

    async fn set_recommendation(&self, id: i64, recommendation: &str) -> Result<(), StoreError> {
        let mut candidate = self
            .candidates
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("candidate {}", id)))?;
        candidate.recommendation = Some(recommendation.to_string());
        Ok(())
    }

    async fn create_batch(&self, batch: &NewBatch) -> Result<BatchRecord, StoreError> {
        let _guard = self.link_guard.lock();

        let members: Vec<i64> = self
            .candidates
            .iter()
            .filter(|c| c.date == batch.date && c.batch_id.is_none() && batch.symbols.contains(&c.symbol))
            .map(|c| c.id)
            .collect();

        if members.len() != batch.symbols.len() {
            return Err(StoreError::Conflict(format!(
                "linked {} of {} candidates for {} on {}",
                members.len(),
                batch.symbols.len(),
                batch.symbols,
                batch.date
            )));
        }

        let now = Utc::now();
        let record = BatchRecord {
            id: self.allocate_id(),
            candidate_symbols: batch.symbols.clone(),
            date: batch.date,
            status: batch.status,
            winner_symbol: batch.winner_symbol.clone(),
            rationale: None,
            raw_output: None,
            created_at: now,
            updated_at: now,
        };

        for id in members {
            if let Some(mut candidate) = self.candidates.get_mut(&id) {
                candidate.batch_id = Some(record.id);
            }
        }
        self.batches.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get_batch(&self, id: i64) -> Result<Option<BatchRecord>, StoreError> {
        Ok(self.batches.get(&id).map(|b| b.value().clone()))
    }

    async fn batches_with_status(&self, status: BatchStatus) -> Result<Vec<BatchRecord>, StoreError> {
        let mut rows: Vec<BatchRecord> = self
            .batches
            .iter()
            .filter(|b| b.status == status)
            .map(|b| b.value().clone())
            .collect();
        rows.sort_by_key(|b| (b.created_at, b.id));
        Ok(rows)
    }

    async fn update_batch_status(
        &self,
        id: i64,
        status: BatchStatus,
    ) -> Result<BatchRecord, StoreError> {
        let mut batch = self
            .batches
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("batch {}", id)))?;

        if !batch.status.can_transition_to(status) {
            return Err(StoreError::InvalidTransition {
                id,
                from: batch.status,
                to: status,
            });
        }

        batch.status = status;
        batch.updated_at = Utc::now();
        Ok(batch.clone())
    }

    async fn record_batch_outcome(&self, id: i64, outcome: &BatchOutcome) -> Result<(), StoreError> {
        let mut batch = self
            .batches
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("batch {}", id)))?;

        batch.winner_symbol = outcome.winner_symbol.clone();
        batch.rationale = outcome.rationale.clone();
        batch.raw_output = outcome.raw_output.clone();
        Ok(())
    }
}
