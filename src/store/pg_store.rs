use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::PgPool;
use tracing::debug;

use super::SchedulerStore;
use crate::db::batch_queries::{self, BatchRow};
use crate::db::candidate_queries;
use crate::errors::StoreError;
use crate::models::{
    BatchOutcome, BatchRecord, BatchStatus, CandidateRecord, CandidateVerdictUpdate, NewBatch,
};

#[derive(Clone)]
pub struct PgSchedulerStore {
    pool: PgPool,
}

impl PgSchedulerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn to_record(row: BatchRow) -> Result<BatchRecord, StoreError> {
    let id = row.id;
    row.into_record()
        .map_err(|e| StoreError::Corrupt(format!("batch {}: {}", id, e)))
}

#[async_trait]
impl SchedulerStore for PgSchedulerStore {
    async fn unbatched_dates(&self) -> Result<Vec<NaiveDate>, StoreError> {
        Ok(candidate_queries::fetch_unbatched_dates(&self.pool).await?)
    }

    async fn unbatched_candidates(&self, date: NaiveDate) -> Result<Vec<CandidateRecord>, StoreError> {
        Ok(candidate_queries::fetch_unbatched_for_date(&self.pool, date).await?)
    }

    async fn get_candidate(&self, id: i64) -> Result<Option<CandidateRecord>, StoreError> {
        Ok(candidate_queries::fetch_candidate(&self.pool, id).await?)
    }

    async fn find_candidate(
        &self,
        symbol: &str,
        date: NaiveDate,
    ) -> Result<Option<CandidateRecord>, StoreError> {
        Ok(candidate_queries::fetch_candidate_by_symbol(&self.pool, symbol, date).await?)
    }

    async fn record_candidate_verdict(
        &self,
        id: i64,
        update: &CandidateVerdictUpdate,
    ) -> Result<(), StoreError> {
        let rows = candidate_queries::update_verdict(&self.pool, id, update).await?;
        if rows == 0 {
            return Err(StoreError::NotFound(format!("candidate {}", id)));
        }
        Ok(())
    }

    async fn set_recommendation(&self, id: i64, recommendation: &str) -> Result<(), StoreError> {
        let rows = candidate_queries::update_recommendation(&self.pool, id, recommendation).await?;
        if rows == 0 {
            return Err(StoreError::NotFound(format!("candidate {}", id)));
        }
        Ok(())
    }

    async fn create_batch(&self, batch: &NewBatch) -> Result<BatchRecord, StoreError> {
        let mut tx = self.pool.begin().await?;

        let row = batch_queries::insert_batch(
            &mut tx,
            &batch.symbols,
            batch.date,
            batch.status,
            batch.winner_symbol.as_deref(),
        )
        .await?;

        let linked =
            candidate_queries::link_to_batch(&mut tx, row.id, batch.date, batch.symbols.as_slice())
                .await?;

        if linked != batch.symbols.len() as u64 {
            tx.rollback().await?;
            return Err(StoreError::Conflict(format!(
                "linked {} of {} candidates for {} on {}",
                linked,
                batch.symbols.len(),
                batch.symbols,
                batch.date
            )));
        }

        tx.commit().await?;
        debug!("Created batch {} for {} on {}", row.id, batch.symbols, batch.date);
        to_record(row)
    }

    async fn get_batch(&self, id: i64) -> Result<Option<BatchRecord>, StoreError> {
        batch_queries::fetch_batch(&self.pool, id)
            .await?
            .map(to_record)
            .transpose()
    }

    async fn batches_with_status(&self, status: BatchStatus) -> Result<Vec<BatchRecord>, StoreError> {
        batch_queries::fetch_batches_by_status(&self.pool, status)
            .await?
            .into_iter()
            .map(to_record)
            .collect()
    }

    async fn update_batch_status(
        &self,
        id: i64,
        status: BatchStatus,
    ) -> Result<BatchRecord, StoreError> {
        let sources = BatchStatus::allowed_sources(status);

        match batch_queries::transition_status(&self.pool, id, sources, status).await? {
            Some(row) => to_record(row),
            None => match self.get_batch(id).await? {
                Some(current) => Err(StoreError::InvalidTransition {
                    id,
                    from: current.status,
                    to: status,
                }),
                None => Err(StoreError::NotFound(format!("batch {}", id))),
            },
        }
    }

    async fn record_batch_outcome(&self, id: i64, outcome: &BatchOutcome) -> Result<(), StoreError> {
        let batch = self
            .get_batch(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("batch {}", id)))?;

        batch_queries::update_outcome(&self.pool, id, &batch.candidate_symbols, outcome).await?;
        Ok(())
    }
}
