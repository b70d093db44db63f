use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{FromRow, PgPool, Postgres, Transaction};

use crate::models::{BatchOutcome, BatchRecord, BatchStatus, SymbolList};

/// Raw row as stored. `candidate_symbols` may use either legacy encoding and
/// `status` is plain text, so rows are converted with `into_record`.
#[derive(Debug, FromRow)]
pub struct BatchRow {
    pub id: i64,
    pub candidate_symbols: String,
    pub date: NaiveDate,
    pub status: String,
    pub winner_symbol: Option<String>,
    pub rationale: Option<String>,
    pub raw_output: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BatchRow {
    pub fn into_record(self) -> Result<BatchRecord, String> {
        Ok(BatchRecord {
            id: self.id,
            candidate_symbols: SymbolList::from_stored(&self.candidate_symbols),
            date: self.date,
            status: self.status.parse()?,
            winner_symbol: self.winner_symbol,
            rationale: self.rationale,
            raw_output: self.raw_output,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

const BATCH_COLUMNS: &str = r#"
    id, candidate_symbols, batch_date AS date, status, winner_symbol,
    rationale, raw_output, created_at, updated_at
"#;

pub async fn insert_batch(
    tx: &mut Transaction<'_, Postgres>,
    symbols: &SymbolList,
    date: NaiveDate,
    status: BatchStatus,
    winner_symbol: Option<&str>,
) -> Result<BatchRow, sqlx::Error> {
    sqlx::query_as::<_, BatchRow>(&format!(
        r#"
        INSERT INTO analysis_batches (candidate_symbols, batch_date, status, winner_symbol)
        VALUES ($1, $2, $3, $4)
        RETURNING {BATCH_COLUMNS}
        "#
    ))
    .bind(symbols.to_stored())
    .bind(date)
    .bind(status.as_str())
    .bind(winner_symbol)
    .fetch_one(&mut **tx)
    .await
}

pub async fn fetch_batch(pool: &PgPool, id: i64) -> Result<Option<BatchRow>, sqlx::Error> {
    sqlx::query_as::<_, BatchRow>(&format!(
        "SELECT {BATCH_COLUMNS} FROM analysis_batches WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await
}

pub async fn fetch_batches_by_status(
    pool: &PgPool,
    status: BatchStatus,
) -> Result<Vec<BatchRow>, sqlx::Error> {
    sqlx::query_as::<_, BatchRow>(&format!(
        r#"
        SELECT {BATCH_COLUMNS}
        FROM analysis_batches
        WHERE status = $1
        ORDER BY created_at ASC
        "#
    ))
    .bind(status.as_str())
    .fetch_all(pool)
    .await
}

/// Compare-and-set status update. Only rows currently in one of `from` move,
/// and `updated_at` is refreshed. Returns the updated row if one matched.
pub async fn transition_status(
    pool: &PgPool,
    id: i64,
    from: &[BatchStatus],
    to: BatchStatus,
) -> Result<Option<BatchRow>, sqlx::Error> {
    let from: Vec<&str> = from.iter().map(|s| s.as_str()).collect();

    sqlx::query_as::<_, BatchRow>(&format!(
        r#"
        UPDATE analysis_batches
        SET status = $2, updated_at = NOW()
        WHERE id = $1 AND status = ANY($3)
        RETURNING {BATCH_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(to.as_str())
    .bind(&from)
    .fetch_optional(pool)
    .await
}

/// Store winner/rationale/raw text. Also rewrites `candidate_symbols` in the
/// canonical JSON form so legacy rows converge over time.
pub async fn update_outcome(
    pool: &PgPool,
    id: i64,
    symbols: &SymbolList,
    outcome: &BatchOutcome,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE analysis_batches
        SET winner_symbol = $2,
            rationale = $3,
            raw_output = $4,
            candidate_symbols = $5
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(&outcome.winner_symbol)
    .bind(&outcome.rationale)
    .bind(&outcome.raw_output)
    .bind(symbols.to_stored())
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}
