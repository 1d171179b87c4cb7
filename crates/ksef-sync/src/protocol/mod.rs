//! # Protocol Client
//!
//! The KSeF API operations, one strategy per API generation.
//!
//! ## Login Handshake
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   client                                   KSeF                         │
//! │     │                                        │                          │
//! │     │── get_challenge(tax_id) ──────────────►│                          │
//! │     │◄──────────── {timestamp, challenge} ───│                          │
//! │     │                                        │                          │
//! │     │  encrypt_token(secret, timestamp ms, public key)                  │
//! │     │                                        │                          │
//! │     │── login(challenge, tax_id, token) ────►│   v1: XML InitToken      │
//! │     │                                        │   v2: JSON ksef-token,   │
//! │     │                                        │       poll, redeem       │
//! │     │◄──────────────────── session token ────│                          │
//! │     │                                        │                          │
//! │     │── query pages [from, to) ─────────────►│                          │
//! │     │◄────────────────── invoice headers ────│                          │
//! │     │                                        │                          │
//! │     │── terminate (best effort) ────────────►│                          │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The strategy is picked once from [`ProtocolVersion`] by [`connect`].

pub mod v1;
pub mod v2;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use ksef_core::{
    Challenge, Credential, Environment, InvoiceHeader, ProtocolVersion, PublicKey, SessionToken,
    TimeWindow,
};

/// Upper bound on pages per query; reaching it means the server never said
/// "no more".
pub const MAX_PAGES: u32 = 10_000;

// =============================================================================
// Protocol Client Trait
// =============================================================================

/// Operations every KSeF API generation supports.
#[async_trait]
pub trait ProtocolClient: Send + Sync {
    /// API generation implemented by this client.
    fn version(&self) -> ProtocolVersion;

    /// Environment this client is bound to.
    fn environment(&self) -> Environment;

    /// Requests a fresh authorisation challenge for `tax_id`.
    async fn get_challenge(&self, tax_id: &str) -> SyncResult<Challenge>;

    /// Runs the full login handshake and returns a session token.
    ///
    /// A 4xx answer to the login exchange is `AuthRejected`.
    async fn authenticate(
        &self,
        credential: &Credential,
        public_key: &PublicKey,
    ) -> SyncResult<SessionToken>;

    /// Fetches every header acquired in `[from, to)`, pages concatenated in
    /// server order. A "no results" fault yields an empty list.
    async fn fetch_invoices_since(
        &self,
        token: &SessionToken,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> SyncResult<Vec<InvoiceHeader>>;

    /// True only if a public endpoint answers 2xx. Never errors.
    async fn check_connectivity(&self) -> bool;

    /// Closes the server side session.
    async fn terminate_session(&self, token: &SessionToken) -> SyncResult<()>;
}

/// Builds the strategy selected by `config.ksef.protocol_version`.
pub fn connect(config: &SyncConfig) -> SyncResult<Arc<dyn ProtocolClient>> {
    let client: Arc<dyn ProtocolClient> = match config.ksef.protocol_version {
        ProtocolVersion::V1 => Arc::new(v1::V1Client::new(config)?),
        ProtocolVersion::V2 => Arc::new(v2::V2Client::new(config)?),
    };

    info!(
        environment = %client.environment(),
        version = %client.version(),
        "KSeF protocol client ready"
    );
    Ok(client)
}

// =============================================================================
// Shared Helpers
// =============================================================================

/// One page of query results.
#[derive(Debug)]
pub(crate) struct Page {
    pub headers: Vec<InvoiceHeader>,
    pub has_more: bool,
}

/// Walks pages `0, 1, 2, ...` until the server reports no more.
///
/// - a "no results" fault ends the walk (empty list on page 0)
/// - headers outside `[from, to)` are dropped
pub(crate) async fn collect_pages<F, Fut>(
    window: TimeWindow,
    no_results_codes: &[i64],
    mut fetch_page: F,
) -> SyncResult<Vec<InvoiceHeader>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = SyncResult<Page>>,
{
    let mut collected = Vec::new();
    let mut dropped = 0usize;
    let mut page_offset = 0u32;

    loop {
        if page_offset >= MAX_PAGES {
            return Err(SyncError::InvalidResponse(format!(
                "pagination did not terminate after {} pages",
                MAX_PAGES
            )));
        }

        let page = match fetch_page(page_offset).await {
            Ok(page) => page,
            Err(e) if e.is_no_results(no_results_codes) => {
                debug!(page_offset, "Query returned no results");
                break;
            }
            Err(e) => return Err(e),
        };

        for header in page.headers {
            if window.contains(header.acquired_at) {
                collected.push(header);
            } else {
                dropped += 1;
            }
        }

        if !page.has_more {
            break;
        }
        page_offset += 1;
    }

    debug!(
        count = collected.len(),
        dropped,
        pages = page_offset + 1,
        "Invoice query complete"
    );
    Ok(collected)
}

/// Maps a failed login step: a 4xx answer means the credential or token
/// was rejected.
pub(crate) fn login_failure(err: SyncError) -> SyncError {
    match err {
        SyncError::Server(fault) if fault.is_client_error() => {
            SyncError::AuthRejected(fault.reason())
        }
        other => other,
    }
}

/// Parses the challenge response fields.
pub(crate) fn parse_challenge(
    timestamp: Option<String>,
    challenge: Option<String>,
) -> SyncResult<Challenge> {
    let (timestamp, value) = match (timestamp, challenge) {
        (Some(t), Some(c)) if !t.is_empty() && !c.is_empty() => (t, c),
        (None, None) => {
            return Err(SyncError::InvalidResponse(
                "challenge response has neither timestamp nor challenge".into(),
            ))
        }
        (t, _) if t.as_deref().map_or(true, str::is_empty) => {
            return Err(SyncError::InvalidResponse(
                "challenge response has no timestamp".into(),
            ))
        }
        _ => {
            return Err(SyncError::InvalidResponse(
                "challenge response has no challenge".into(),
            ))
        }
    };

    Ok(Challenge {
        issued_at: parse_timestamp("timestamp", &timestamp)?,
        value,
    })
}

/// Parses an RFC 3339 server timestamp.
pub(crate) fn parse_timestamp(field: &str, raw: &str) -> SyncResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| SyncError::InvalidResponse(format!("{} '{}': {}", field, raw, e)))
}

/// Parses a date that may arrive as `2024-03-01` or as a full timestamp.
pub(crate) fn parse_date(field: &str, raw: &str) -> SyncResult<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| parse_timestamp(field, raw).map(|at| at.date_naive()))
        .map_err(|_| SyncError::InvalidResponse(format!("{} '{}' is not a date", field, raw)))
}

/// Formats a window bound for query bodies.
pub(crate) fn format_query_time(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Field that must be present in a response.
pub(crate) fn required<T>(value: Option<T>, what: &str) -> SyncResult<T> {
    value.ok_or_else(|| SyncError::InvalidResponse(format!("response has no {}", what)))
}
