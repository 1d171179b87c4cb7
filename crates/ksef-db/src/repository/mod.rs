//! # Repository Module
//!
//! Database repository implementations for the KSeF sync client.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Repositories                                         │
//! │                                                                         │
//! │  ksef-sync store adapters                                              │
//! │       │                                                                 │
//! │       │  db.invoices().upsert_all(&headers)                            │
//! │       ▼                                                                 │
//! │  SyncStateRepository   get_timestamp / set_timestamp   (sync_state)    │
//! │  InvoiceRepository     upsert_all / get / count        (invoices)      │
//! │  SyncRunRepository     record / recent / last_success  (sync_runs)     │
//! │       │                                                                 │
//! │       │  SQL Query                                                      │
//! │       ▼                                                                 │
//! │  SQLite Database                                                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Timestamp Encoding
//!
//! Every timestamp column holds RFC 3339 UTC text with microseconds, so
//! string comparison in SQL matches time order.

pub mod invoice;
pub mod sync_run;
pub mod sync_state;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::{DbError, DbResult};

/// Encodes a timestamp for storage.
pub(crate) fn encode_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Decodes a stored timestamp; `column` names the source for error reports.
pub(crate) fn decode_timestamp(column: &str, raw: &str) -> DbResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| DbError::corrupt(column, raw, e))
}
