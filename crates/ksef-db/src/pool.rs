//! # Database Handle
//!
//! Opens the SQLite file the sync client keeps its state in.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  DbConfig::new(path)  /  DbConfig::in_memory()                          │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Database::new(config)   create parent dir, WAL, busy timeout,          │
//! │       │                  apply embedded migrations                      │
//! │       │                                                                 │
//! │       ├──► sync_state()   watermark                                     │
//! │       ├──► invoices()     header upserts                                │
//! │       └──► sync_runs()    cycle journal                                 │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::error::{DbError, DbResult};
use crate::migrations;
use crate::repository::invoice::InvoiceRepository;
use crate::repository::sync_run::SyncRunRepository;
use crate::repository::sync_state::SyncStateRepository;

const MEMORY: &str = ":memory:";

/// Where and how to open the database.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// SQLite file, or `:memory:`.
    pub path: PathBuf,

    /// Pool size. A cycle needs one connection; the rest serve readers.
    pub max_connections: u32,

    /// How long a writer waits on a locked database before failing.
    pub busy_timeout: Duration,

    /// Apply pending migrations on open.
    pub migrate: bool,
}

impl DbConfig {
    /// File-backed database at `path`, created if missing.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DbConfig {
            path: path.into(),
            max_connections: 4,
            busy_timeout: Duration::from_secs(5),
            migrate: true,
        }
    }

    /// Private in-memory database. Pinned to one connection: each
    /// connection to `:memory:` would otherwise get its own empty schema.
    pub fn in_memory() -> Self {
        DbConfig {
            max_connections: 1,
            ..Self::new(MEMORY)
        }
    }

    pub fn with_max_connections(mut self, max: u32) -> Self {
        self.max_connections = max.max(1);
        self
    }

    pub fn without_migrations(mut self) -> Self {
        self.migrate = false;
        self
    }

    fn is_memory(&self) -> bool {
        self.path == Path::new(MEMORY)
    }
}

/// Shared handle to the sync database. Clones share one pool.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(config: DbConfig) -> DbResult<Self> {
        let mut options = SqliteConnectOptions::new()
            .busy_timeout(config.busy_timeout)
            .foreign_keys(true);

        if config.is_memory() {
            options = options.in_memory(true);
        } else {
            if let Some(dir) = config.path.parent().filter(|d| !d.as_os_str().is_empty()) {
                std::fs::create_dir_all(dir).map_err(|e| {
                    DbError::ConnectionFailed(format!("{}: {}", dir.display(), e))
                })?;
            }
            options = options
                .filename(&config.path)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal);
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            // an in-memory schema dies with its last connection
            .min_connections(if config.is_memory() { 1 } else { 0 })
            .idle_timeout(if config.is_memory() { None } else { Some(Duration::from_secs(600)) })
            .connect_with(options)
            .await
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?;

        info!(
            path = %config.path.display(),
            max_connections = config.max_connections,
            "Database opened"
        );

        let db = Database { pool };
        if config.migrate {
            migrations::apply(&db.pool).await?;
        }
        Ok(db)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Key/value sync state; the watermark lives here.
    pub fn sync_state(&self) -> SyncStateRepository {
        SyncStateRepository::new(self.pool.clone())
    }

    pub fn invoices(&self) -> InvoiceRepository {
        InvoiceRepository::new(self.pool.clone())
    }

    pub fn sync_runs(&self) -> SyncRunRepository {
        SyncRunRepository::new(self.pool.clone())
    }

    /// Waits for checked-out connections and closes the pool.
    pub async fn close(&self) {
        self.pool.close().await;
        info!("Database closed");
    }

    /// True if a trivial query succeeds.
    pub async fn health_check(&self) -> bool {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .is_ok()
    }
}
