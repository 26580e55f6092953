use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
    SqliteSynchronous,
};
use uuid::Uuid;

use super::SessionStore;
use crate::error::StoreError;
use crate::providers::{EndpointRole, TokenUsage};
use crate::session::{
    CriterionResult, CriterionStatus, FailureKind, FeedbackSession, SessionStatus,
};

/// SQLite-backed session store.
///
/// The correlation id is the primary key; inserts use `ON CONFLICT DO
/// NOTHING`, which is what makes duplicate finalize calls no-ops without a
/// read-modify-write race. Criterion results live in their own table keyed
/// by (session, rank) and are reassembled in rank order on read.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        Self::init_schema(&pool).await?;
        Ok(Self { pool })
    }

    async fn init_schema(pool: &SqlitePool) -> Result<(), StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS feedback_sessions (
                correlation_id TEXT PRIMARY KEY,
                feedback_id    TEXT NOT NULL,
                submission     TEXT NOT NULL,
                status         TEXT NOT NULL,
                nps_score      INTEGER,
                created_at     TEXT NOT NULL
            )",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS criterion_results (
                correlation_id    TEXT NOT NULL
                    REFERENCES feedback_sessions(correlation_id) ON DELETE CASCADE,
                rank              INTEGER NOT NULL,
                criterion_id      TEXT NOT NULL,
                title             TEXT NOT NULL,
                status            TEXT NOT NULL,
                text              TEXT,
                error_kind        TEXT,
                model_name        TEXT,
                served_by         TEXT,
                prompt_tokens     INTEGER,
                completion_tokens INTEGER,
                PRIMARY KEY (correlation_id, rank)
            )",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_sessions_feedback_created
             ON feedback_sessions(feedback_id, created_at)",
        )
        .execute(pool)
        .await?;

        Ok(())
    }
}

fn corrupt(correlation_id: Uuid, message: impl Into<String>) -> StoreError {
    StoreError::Corrupt {
        correlation_id,
        message: message.into(),
    }
}

fn parse_enum<T: FromStr>(
    correlation_id: Uuid,
    column: &str,
    raw: &str,
) -> Result<T, StoreError> {
    raw.parse()
        .map_err(|_| corrupt(correlation_id, format!("bad {column} value {raw:?}")))
}

fn result_from_row(correlation_id: Uuid, row: &SqliteRow) -> Result<CriterionResult, StoreError> {
    let rank: i64 = row.try_get("rank")?;
    let rank = u32::try_from(rank)
        .map_err(|_| corrupt(correlation_id, format!("negative rank {rank}")))?;

    let criterion_id: String = row.try_get("criterion_id")?;
    let criterion_id = Uuid::parse_str(&criterion_id)
        .map_err(|_| corrupt(correlation_id, format!("bad criterion id {criterion_id:?}")))?;

    let status: String = row.try_get("status")?;
    let status: CriterionStatus = parse_enum(correlation_id, "status", &status)?;

    let error_kind: Option<String> = row.try_get("error_kind")?;
    let error_kind = error_kind
        .map(|raw| parse_enum::<FailureKind>(correlation_id, "error_kind", &raw))
        .transpose()?;

    let served_by: Option<String> = row.try_get("served_by")?;
    let served_by = served_by
        .map(|raw| parse_enum::<EndpointRole>(correlation_id, "served_by", &raw))
        .transpose()?;

    let prompt_tokens: Option<i64> = row.try_get("prompt_tokens")?;
    let completion_tokens: Option<i64> = row.try_get("completion_tokens")?;
    let usage = match (prompt_tokens, completion_tokens) {
        (Some(prompt), Some(completion)) => Some(TokenUsage {
            prompt_tokens: u64::try_from(prompt)
                .map_err(|_| corrupt(correlation_id, "negative prompt token count"))?,
            completion_tokens: u64::try_from(completion)
                .map_err(|_| corrupt(correlation_id, "negative completion token count"))?,
        }),
        _ => None,
    };

    Ok(CriterionResult {
        rank,
        criterion_id,
        title: row.try_get("title")?,
        status,
        text: row.try_get("text")?,
        error_kind,
        model_name: row.try_get("model_name")?,
        served_by,
        usage,
    })
}

#[async_trait]
impl SessionStore for SqliteStore {
    async fn insert_session(&self, session: &FeedbackSession) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            "INSERT INTO feedback_sessions
                 (correlation_id, feedback_id, submission, status, nps_score, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(correlation_id) DO NOTHING",
        )
        .bind(session.correlation_id.to_string())
        .bind(session.feedback_id.to_string())
        .bind(&session.submission)
        .bind(session.status.to_string())
        .bind(session.nps_score.map(i64::from))
        .bind(session.created_at.to_rfc3339())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted == 0 {
            // First write won earlier; dropping the tx rolls back nothing.
            return Ok(false);
        }

        for result in &session.results {
            sqlx::query(
                "INSERT INTO criterion_results
                     (correlation_id, rank, criterion_id, title, status, text,
                      error_kind, model_name, served_by, prompt_tokens, completion_tokens)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            )
            .bind(session.correlation_id.to_string())
            .bind(i64::from(result.rank))
            .bind(result.criterion_id.to_string())
            .bind(&result.title)
            .bind(result.status.to_string())
            .bind(result.text.as_deref())
            .bind(result.error_kind.map(|kind| kind.to_string()))
            .bind(result.model_name.as_deref())
            .bind(result.served_by.map(|role| role.to_string()))
            .bind(
                result
                    .usage
                    .map(|usage| i64::try_from(usage.prompt_tokens).unwrap_or(i64::MAX)),
            )
            .bind(
                result
                    .usage
                    .map(|usage| i64::try_from(usage.completion_tokens).unwrap_or(i64::MAX)),
            )
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn fetch_session(
        &self,
        correlation_id: Uuid,
    ) -> Result<Option<FeedbackSession>, StoreError> {
        let Some(row) = sqlx::query(
            "SELECT feedback_id, submission, status, nps_score, created_at
             FROM feedback_sessions WHERE correlation_id = ?1",
        )
        .bind(correlation_id.to_string())
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };

        let feedback_id: String = row.try_get("feedback_id")?;
        let feedback_id = Uuid::parse_str(&feedback_id)
            .map_err(|_| corrupt(correlation_id, format!("bad feedback id {feedback_id:?}")))?;

        let status: String = row.try_get("status")?;
        let status: SessionStatus = parse_enum(correlation_id, "status", &status)?;

        let nps_score: Option<i64> = row.try_get("nps_score")?;
        let nps_score = nps_score
            .map(|score| {
                u8::try_from(score)
                    .map_err(|_| corrupt(correlation_id, format!("bad nps score {score}")))
            })
            .transpose()?;

        let created_at: String = row.try_get("created_at")?;
        let created_at = DateTime::parse_from_rfc3339(&created_at)
            .map_err(|_| corrupt(correlation_id, format!("bad timestamp {created_at:?}")))?
            .with_timezone(&Utc);

        let result_rows = sqlx::query(
            "SELECT rank, criterion_id, title, status, text, error_kind,
                    model_name, served_by, prompt_tokens, completion_tokens
             FROM criterion_results
             WHERE correlation_id = ?1
             ORDER BY rank ASC",
        )
        .bind(correlation_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        let results = result_rows
            .iter()
            .map(|row| result_from_row(correlation_id, row))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(FeedbackSession {
            correlation_id,
            feedback_id,
            submission: row.try_get("submission")?,
            results,
            status,
            nps_score,
            created_at,
        }))
    }

    async fn attach_score(&self, correlation_id: Uuid, score: u8) -> Result<bool, StoreError> {
        let updated = sqlx::query(
            "UPDATE feedback_sessions SET nps_score = ?1 WHERE correlation_id = ?2",
        )
        .bind(i64::from(score))
        .bind(correlation_id.to_string())
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(updated > 0)
    }
}
