//! # ksef-sync: Sync Engine for the KSeF Client
//!
//! This crate talks to the KSeF e-invoicing API and keeps a local store of
//! received invoice headers up to date, one incremental cycle at a time.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Sync Engine Architecture                         │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                    SyncTrigger (entry point)                     │  │
//! │  │   one cycle at a time • TriggerReport • run journal              │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │  ┌────────────────────────────▼─────────────────────────────────────┐  │
//! │  │                       SyncOrchestrator                           │  │
//! │  │   watermark → authenticate → fetch → upsert → advance            │  │
//! │  └───────────────┬──────────────────────────────────┬───────────────┘  │
//! │                  │                                  │                   │
//! │  ┌───────────────▼───────────────┐  ┌───────────────▼───────────────┐  │
//! │  │  ProtocolClient (trait)       │  │  WatermarkStore / InvoiceStore│  │
//! │  │   ├── V1Client (XML login)    │  │  (ksef-db SQLite)             │  │
//! │  │   └── V2Client (JSON login)   │  │                               │  │
//! │  └───────────────┬───────────────┘  └───────────────────────────────┘  │
//! │                  │                                                      │
//! │  ┌───────────────▼───────────────┐                                     │
//! │  │  HttpTransport (reqwest)      │                                     │
//! │  │  timeouts • fault decoding    │                                     │
//! │  └───────────────────────────────┘                                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`config`] - Sync configuration (file, env overrides, validation)
//! - [`error`] - Sync error types and retry classification
//! - [`transport`] - HTTP client and KSeF exception decoding
//! - [`protocol`] - `ProtocolClient` trait and the v1 / v2 strategies
//! - [`store`] - Persistence traits and their SQLite implementations
//! - [`orchestrator`] - One incremental sync cycle
//! - [`trigger`] - Serialized "sync now" entry point
//!
//! ## Usage
//!
//! ```rust,ignore
//! use ksef_sync::{protocol, SyncConfig, SyncOrchestrator, SyncTrigger};
//! use ksef_db::{Database, DbConfig};
//!
//! let config = SyncConfig::load(None)?;
//! let credential = ksef_sync::config::credential_from_env()?;
//! let database = Database::new(DbConfig::new(config.database_path())).await?;
//!
//! let client = protocol::connect(&config)?;
//! let orchestrator =
//!     SyncOrchestrator::with_database(client, database.clone(), config.load_public_key()?, &config);
//! let trigger = SyncTrigger::new(orchestrator, credential)
//!     .with_journal(std::sync::Arc::new(database));
//!
//! let report = trigger.run_now().await;
//! println!("{}", serde_json::to_string_pretty(&report)?);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod protocol;
pub mod store;
pub mod transport;
pub mod trigger;

#[cfg(test)]
pub(crate) mod test_support;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::SyncConfig;
pub use error::{ErrorKind, FaultDetail, ServerFault, SyncError, SyncResult};
pub use orchestrator::{OrchestratorSettings, SyncOrchestrator};
pub use protocol::{connect, ProtocolClient};
pub use store::{InvoiceStore, RunLog, WatermarkStore};
pub use transport::HttpTransport;
pub use trigger::{SyncTrigger, TriggerReport};
