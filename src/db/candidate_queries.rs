use chrono::NaiveDate;
use sqlx::{PgPool, Postgres, Transaction};

use crate::models::{CandidateRecord, CandidateVerdictUpdate};

const CANDIDATE_COLUMNS: &str = r#"
    id, symbol, candidate_date AS date, score, recommendation, batch_id,
    verdict, conviction, composite_score, analysis_status, analysis_raw, analyzed_at
"#;

/// Distinct dates that still have candidates without a batch
pub async fn fetch_unbatched_dates(pool: &PgPool) -> Result<Vec<NaiveDate>, sqlx::Error> {
    sqlx::query_scalar::<_, NaiveDate>(
        r#"
        SELECT DISTINCT candidate_date
        FROM analysis_candidates
        WHERE batch_id IS NULL
        ORDER BY candidate_date
        "#,
    )
    .fetch_all(pool)
    .await
}

/// Unbatched candidates for one date, best score first
pub async fn fetch_unbatched_for_date(
    pool: &PgPool,
    date: NaiveDate,
) -> Result<Vec<CandidateRecord>, sqlx::Error> {
    sqlx::query_as::<_, CandidateRecord>(&format!(
        r#"
        SELECT {CANDIDATE_COLUMNS}
        FROM analysis_candidates
        WHERE batch_id IS NULL AND candidate_date = $1
        ORDER BY score DESC, symbol ASC
        "#
    ))
    .bind(date)
    .fetch_all(pool)
    .await
}

pub async fn fetch_candidate(
    pool: &PgPool,
    id: i64,
) -> Result<Option<CandidateRecord>, sqlx::Error> {
    sqlx::query_as::<_, CandidateRecord>(&format!(
        "SELECT {CANDIDATE_COLUMNS} FROM analysis_candidates WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await
}

pub async fn fetch_candidate_by_symbol(
    pool: &PgPool,
    symbol: &str,
    date: NaiveDate,
) -> Result<Option<CandidateRecord>, sqlx::Error> {
    sqlx::query_as::<_, CandidateRecord>(&format!(
        r#"
        SELECT {CANDIDATE_COLUMNS}
        FROM analysis_candidates
        WHERE UPPER(symbol) = UPPER($1) AND candidate_date = $2
        "#
    ))
    .bind(symbol)
    .bind(date)
    .fetch_optional(pool)
    .await
}

/// Attach unbatched candidates to a batch. Returns the number of rows linked.
pub async fn link_to_batch(
    tx: &mut Transaction<'_, Postgres>,
    batch_id: i64,
    date: NaiveDate,
    symbols: &[String],
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE analysis_candidates
        SET batch_id = $1
        WHERE candidate_date = $2
          AND UPPER(symbol) = ANY($3)
          AND batch_id IS NULL
        "#,
    )
    .bind(batch_id)
    .bind(date)
    .bind(symbols)
    .execute(&mut **tx)
    .await?;

    Ok(result.rows_affected())
}

pub async fn update_verdict(
    pool: &PgPool,
    id: i64,
    update: &CandidateVerdictUpdate,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE analysis_candidates
        SET verdict = $2,
            conviction = $3,
            composite_score = $4,
            analysis_status = $5,
            analysis_raw = $6,
            analyzed_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(&update.verdict)
    .bind(&update.conviction)
    .bind(update.composite_score)
    .bind(update.status.as_str())
    .bind(&update.raw)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

pub async fn update_recommendation(
    pool: &PgPool,
    id: i64,
    recommendation: &str,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("UPDATE analysis_candidates SET recommendation = $2 WHERE id = $1")
        .bind(id)
        .bind(recommendation)
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}
