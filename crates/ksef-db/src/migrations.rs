//! # Schema Migrations
//!
//! The SQL files under `migrations/sqlite/` are compiled into the binary;
//! nothing is read from disk at runtime.
//!
//! ```text
//!   Database::new ──► apply() ──► _sqlx_migrations bookkeeping
//!                                   └── 001_initial_schema.sql
//!                                         sync_state, invoices, sync_runs
//! ```
//!
//! Applied files are checksummed by sqlx, so a migration is never edited
//! once released; schema changes go into a new `NNN_name.sql`.

use sqlx::migrate::Migrator;
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::error::DbResult;

pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations/sqlite");

/// Brings the schema up to date. A no-op on a current database.
pub async fn apply(pool: &SqlitePool) -> DbResult<()> {
    let before = applied_count(pool).await.unwrap_or(0);
    MIGRATOR.run(pool).await?;
    let after = applied_count(pool).await?;

    if after > before {
        info!(applied = after - before, total = after, "Schema migrated");
    } else {
        debug!(total = after, "Schema up to date");
    }
    Ok(())
}

/// Embedded migrations not yet recorded as applied.
pub async fn pending(pool: &SqlitePool) -> DbResult<usize> {
    let applied = applied_count(pool).await?;
    Ok(MIGRATOR.migrations.len().saturating_sub(applied))
}

async fn applied_count(pool: &SqlitePool) -> DbResult<usize> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations WHERE success = 1")
        .fetch_one(pool)
        .await?;
    Ok(count as usize)
}
