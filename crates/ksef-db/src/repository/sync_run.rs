//! # Sync Run Repository
//!
//! Journal of sync cycles: one row per cycle, success or failure.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use std::fmt;
use std::str::FromStr;
use tracing::debug;
use uuid::Uuid;

use super::{decode_timestamp, encode_timestamp};
use crate::error::{DbError, DbResult};

/// Final state of a recorded cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Succeeded,
    Failed,
}

impl RunStatus {
    fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "succeeded" => Ok(RunStatus::Succeeded),
            "failed" => Ok(RunStatus::Failed),
            other => Err(DbError::corrupt("sync_runs.status", other, "unknown status")),
        }
    }
}

/// One journal entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRunRecord {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: RunStatus,
    /// Unset when the cycle failed before the window was known.
    pub window_from: Option<DateTime<Utc>>,
    pub window_to: Option<DateTime<Utc>>,
    pub invoice_count: i64,
    /// Error class (`transport`, `auth`, ...) for failed runs.
    pub error_kind: Option<String>,
    pub error_message: Option<String>,
}

impl SyncRunRecord {
    /// A successful run over `[window_from, window_to)`.
    pub fn succeeded(
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        window_from: DateTime<Utc>,
        window_to: DateTime<Utc>,
        invoice_count: i64,
    ) -> Self {
        SyncRunRecord {
            id: Uuid::new_v4().to_string(),
            started_at,
            finished_at,
            status: RunStatus::Succeeded,
            window_from: Some(window_from),
            window_to: Some(window_to),
            invoice_count,
            error_kind: None,
            error_message: None,
        }
    }

    /// A failed run.
    pub fn failed(
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        error_kind: impl Into<String>,
        error_message: impl Into<String>,
    ) -> Self {
        SyncRunRecord {
            id: Uuid::new_v4().to_string(),
            started_at,
            finished_at,
            status: RunStatus::Failed,
            window_from: None,
            window_to: None,
            invoice_count: 0,
            error_kind: Some(error_kind.into()),
            error_message: Some(error_message.into()),
        }
    }
}

#[derive(Debug, FromRow)]
struct SyncRunRow {
    id: String,
    started_at: String,
    finished_at: String,
    status: String,
    window_from: Option<String>,
    window_to: Option<String>,
    invoice_count: i64,
    error_kind: Option<String>,
    error_message: Option<String>,
}

impl TryFrom<SyncRunRow> for SyncRunRecord {
    type Error = DbError;

    fn try_from(row: SyncRunRow) -> Result<Self, Self::Error> {
        let optional = |column: &str, raw: Option<String>| {
            raw.map(|raw| decode_timestamp(column, &raw)).transpose()
        };

        Ok(SyncRunRecord {
            id: row.id,
            started_at: decode_timestamp("sync_runs.started_at", &row.started_at)?,
            finished_at: decode_timestamp("sync_runs.finished_at", &row.finished_at)?,
            status: row.status.parse()?,
            window_from: optional("sync_runs.window_from", row.window_from)?,
            window_to: optional("sync_runs.window_to", row.window_to)?,
            invoice_count: row.invoice_count,
            error_kind: row.error_kind,
            error_message: row.error_message,
        })
    }
}

/// Repository for the `sync_runs` journal.
#[derive(Debug, Clone)]
pub struct SyncRunRepository {
    pool: SqlitePool,
}

impl SyncRunRepository {
    /// Creates a new SyncRunRepository.
    pub fn new(pool: SqlitePool) -> Self {
        SyncRunRepository { pool }
    }

    /// Appends a run to the journal.
    pub async fn record(&self, run: &SyncRunRecord) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_runs (
                id, started_at, finished_at, status,
                window_from, window_to, invoice_count,
                error_kind, error_message
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(&run.id)
        .bind(encode_timestamp(&run.started_at))
        .bind(encode_timestamp(&run.finished_at))
        .bind(run.status.as_str())
        .bind(run.window_from.as_ref().map(encode_timestamp))
        .bind(run.window_to.as_ref().map(encode_timestamp))
        .bind(run.invoice_count)
        .bind(&run.error_kind)
        .bind(&run.error_message)
        .execute(&self.pool)
        .await?;

        debug!(run_id = %run.id, status = %run.status, "Sync run recorded");
        Ok(())
    }

    /// Latest runs first.
    pub async fn recent(&self, limit: u32) -> DbResult<Vec<SyncRunRecord>> {
        let rows = sqlx::query_as::<_, SyncRunRow>(
            r#"
            SELECT id, started_at, finished_at, status, window_from, window_to,
                   invoice_count, error_kind, error_message
            FROM sync_runs
            ORDER BY started_at DESC
            LIMIT ?1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(SyncRunRecord::try_from).collect()
    }

    /// The most recent successful run, if any.
    pub async fn last_success(&self) -> DbResult<Option<SyncRunRecord>> {
        let row = sqlx::query_as::<_, SyncRunRow>(
            r#"
            SELECT id, started_at, finished_at, status, window_from, window_to,
                   invoice_count, error_kind, error_message
            FROM sync_runs
            WHERE status = 'succeeded'
            ORDER BY started_at DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        row.map(SyncRunRecord::try_from).transpose()
    }
}
