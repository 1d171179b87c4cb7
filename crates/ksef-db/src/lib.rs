//! # ksef-db: Database Layer for the KSeF Sync Client
//!
//! SQLite storage for the sync watermark, invoice headers and the sync run
//! journal, using sqlx for async operations.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        KSeF Sync Data Flow                              │
//! │                                                                         │
//! │  SyncOrchestrator::run_sync_cycle (ksef-sync)                          │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     ksef-db (THIS CRATE)                        │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌────────────────┐    ┌──────────────┐ │   │
//! │  │   │   Database    │    │  Repositories  │    │  Migrations  │ │   │
//! │  │   │   (pool.rs)   │    │                │    │  (embedded)  │ │   │
//! │  │   │               │    │ SyncStateRepo  │    │ 001_initial  │ │   │
//! │  │   │ SqlitePool    │◄───│ InvoiceRepo    │    │   _schema    │ │   │
//! │  │   │ WAL           │    │ SyncRunRepo    │    │              │ │   │
//! │  │   └───────────────┘    └────────────────┘    └──────────────┘ │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     SQLite Database                             │   │
//! │  │   <platform data dir>/ksef-sync.db                              │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Repository implementations
//!
//! ## Usage
//!
//! ```rust,ignore
//! use ksef_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("ksef-sync.db")).await?;
//!
//! let written = db.invoices().upsert_all(&headers).await?;
//! db.sync_state().set_timestamp("invoice_sync.last_synced_at", now).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

pub use repository::invoice::{InvoiceRepository, StoredInvoice};
pub use repository::sync_run::{RunStatus, SyncRunRecord, SyncRunRepository};
pub use repository::sync_state::SyncStateRepository;
