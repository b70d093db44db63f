//! Persistence gateway for candidates and batches.
//!
//! The scheduler only talks to [`SchedulerStore`]. `PgSchedulerStore` is the
//! production implementation; `MemoryStore` keeps everything in process and
//! backs the test suite and `STORE_BACKEND=memory` dry runs.

mod memory_store;
mod pg_store;

pub use memory_store::MemoryStore;
pub use pg_store::PgSchedulerStore;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::errors::StoreError;
use crate::models::{
    BatchOutcome, BatchRecord, BatchStatus, CandidateRecord, CandidateVerdictUpdate, NewBatch,
};

#[async_trait]
pub trait SchedulerStore: Send + Sync {
    /// Dates that still have at least one candidate without a batch.
    async fn unbatched_dates(&self) -> Result<Vec<NaiveDate>, StoreError>;

    /// Unbatched candidates for `date`, sorted by score descending.
    async fn unbatched_candidates(&self, date: NaiveDate) -> Result<Vec<CandidateRecord>, StoreError>;

    async fn get_candidate(&self, id: i64) -> Result<Option<CandidateRecord>, StoreError>;

    async fn find_candidate(
        &self,
        symbol: &str,
        date: NaiveDate,
    ) -> Result<Option<CandidateRecord>, StoreError>;

    async fn record_candidate_verdict(
        &self,
        id: i64,
        update: &CandidateVerdictUpdate,
    ) -> Result<(), StoreError>;

    async fn set_recommendation(&self, id: i64, recommendation: &str) -> Result<(), StoreError>;

    /// Create the batch and link every member candidate in one step. Fails
    /// with `Conflict` if any member is already linked elsewhere.
    async fn create_batch(&self, batch: &NewBatch) -> Result<BatchRecord, StoreError>;

    async fn get_batch(&self, id: i64) -> Result<Option<BatchRecord>, StoreError>;

    async fn batches_with_status(&self, status: BatchStatus) -> Result<Vec<BatchRecord>, StoreError>;

    /// Move a batch to `status` and refresh its timestamp. Rejects moves not
    /// allowed by [`BatchStatus::allowed_sources`].
    async fn update_batch_status(&self, id: i64, status: BatchStatus)
        -> Result<BatchRecord, StoreError>;

    async fn record_batch_outcome(&self, id: i64, outcome: &BatchOutcome) -> Result<(), StoreError>;
}
