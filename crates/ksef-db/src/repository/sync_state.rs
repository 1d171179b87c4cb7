//! # Sync State Repository
//!
//! Key/value rows in `sync_state`. The invoice watermark is one such row.
//!
//! ## Watermark Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  cycle start ── get_timestamp(key) ──► None?  use now - lookback        │
//! │                                                                         │
//! │  ... authenticate, fetch, upsert invoices (committed) ...              │
//! │                                                                         │
//! │  cycle end ──── set_timestamp(key, now)   ← LAST write of the cycle     │
//! │                                                                         │
//! │  A cycle that fails anywhere before the last step never reaches here,  │
//! │  so the next cycle re-queries the same window.                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;

use super::{decode_timestamp, encode_timestamp};
use crate::error::DbResult;

/// Repository for the `sync_state` key/value table.
#[derive(Debug, Clone)]
pub struct SyncStateRepository {
    pool: SqlitePool,
}

impl SyncStateRepository {
    /// Creates a new SyncStateRepository.
    pub fn new(pool: SqlitePool) -> Self {
        SyncStateRepository { pool }
    }

    /// Reads a raw value.
    pub async fn get(&self, key: &str) -> DbResult<Option<String>> {
        let value: Option<String> =
            sqlx::query_scalar("SELECT value FROM sync_state WHERE key = ?1")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;

        Ok(value)
    }

    /// Writes a raw value, replacing any previous one.
    pub async fn set(&self, key: &str, value: &str) -> DbResult<()> {
        let now = encode_timestamp(&Utc::now());

        sqlx::query(
            r#"
            INSERT INTO sync_state (key, value, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(now)
        .execute(&self.pool)
        .await?;

        debug!(key = %key, "Sync state updated");
        Ok(())
    }

    /// Reads a timestamp value. Fails with `CorruptValue` if the stored text
    /// is not a timestamp.
    pub async fn get_timestamp(&self, key: &str) -> DbResult<Option<DateTime<Utc>>> {
        match self.get(key).await? {
            Some(raw) => decode_timestamp("sync_state.value", &raw).map(Some),
            None => Ok(None),
        }
    }

    /// Writes a timestamp value.
    pub async fn set_timestamp(&self, key: &str, at: DateTime<Utc>) -> DbResult<()> {
        self.set(key, &encode_timestamp(&at)).await
    }

    /// Removes a key. Returns true if a row was deleted.
    pub async fn delete(&self, key: &str) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM sync_state WHERE key = ?1")
            .bind(key)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use crate::error::DbError;
    use crate::{Database, DbConfig};
    use chrono::{TimeZone, Utc};

    const KEY: &str = "invoice_sync.last_synced_at";

    async fn db() -> Database {
        Database::new(DbConfig::in_memory()).await.unwrap()
    }

    #[tokio::test]
    async fn test_missing_key_is_none() {
        let db = db().await;
        assert_eq!(db.sync_state().get_timestamp(KEY).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_timestamp_round_trip_and_overwrite() {
        let db = db().await;
        let repo = db.sync_state();
        let first = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        let second = Utc.with_ymd_and_hms(2024, 3, 1, 10, 15, 0).unwrap();

        repo.set_timestamp(KEY, first).await.unwrap();
        assert_eq!(repo.get_timestamp(KEY).await.unwrap(), Some(first));

        repo.set_timestamp(KEY, second).await.unwrap();
        assert_eq!(repo.get_timestamp(KEY).await.unwrap(), Some(second));
    }

    #[tokio::test]
    async fn test_corrupt_value_is_reported() {
        let db = db().await;
        let repo = db.sync_state();
        repo.set(KEY, "not-a-time").await.unwrap();

        assert!(matches!(
            repo.get_timestamp(KEY).await,
            Err(DbError::CorruptValue { .. })
        ));
    }

    #[tokio::test]
    async fn test_delete() {
        let db = db().await;
        let repo = db.sync_state();
        repo.set(KEY, "x").await.unwrap();

        assert!(repo.delete(KEY).await.unwrap());
        assert!(!repo.delete(KEY).await.unwrap());
        assert_eq!(repo.get(KEY).await.unwrap(), None);
    }
}
