//! # Sync Orchestrator
//!
//! Runs one incremental sync cycle.
//!
//! ## Cycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  1. load watermark ──── absent / unreadable ──► now - lookback          │
//! │  2. now = clock (ms precision)                                          │
//! │  3. authenticate ─────────────────────────────┐                         │
//! │  4. fetch [watermark, now) ───────────────────┤  any failure:           │
//! │  5. terminate session (best effort)           │  return the error,      │
//! │  6. upsert headers (one transaction) ─────────┤  watermark untouched    │
//! │  7. watermark := now, if now > stored ────────┘                         │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The watermark write is the last step, so a cycle that fails or is
//! dropped part way re-fetches the same window next time. Upserts are
//! keyed by reference number, which makes the overlap harmless.

use chrono::{DateTime, Duration, SubsecRound, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::error::SyncResult;
use crate::protocol::ProtocolClient;
use crate::store::{InvoiceStore, WatermarkStore};
use ksef_core::{Credential, PublicKey, SyncOutcome, SyncWatermark};
use ksef_db::Database;

/// Orchestrator knobs taken from [`SyncConfig`].
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// `sync_state` key of the watermark.
    pub watermark_key: String,
    /// Window start offset when no watermark is stored.
    pub initial_lookback: Duration,
    /// Close the session after fetching.
    pub terminate_session: bool,
}

impl OrchestratorSettings {
    pub fn from_config(config: &SyncConfig) -> Self {
        OrchestratorSettings {
            watermark_key: config.query.watermark_key.clone(),
            initial_lookback: config.query.initial_lookback(),
            terminate_session: config.auth.terminate_session,
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default())
    }
}

/// Drives authenticate, fetch, persist and watermark advance.
pub struct SyncOrchestrator {
    client: Arc<dyn ProtocolClient>,
    watermarks: Arc<dyn WatermarkStore>,
    invoices: Arc<dyn InvoiceStore>,
    public_key: PublicKey,
    settings: OrchestratorSettings,
}

impl SyncOrchestrator {
    pub fn new(
        client: Arc<dyn ProtocolClient>,
        watermarks: Arc<dyn WatermarkStore>,
        invoices: Arc<dyn InvoiceStore>,
        public_key: PublicKey,
        settings: OrchestratorSettings,
    ) -> Self {
        SyncOrchestrator {
            client,
            watermarks,
            invoices,
            public_key,
            settings,
        }
    }

    /// Orchestrator backed by one SQLite database for both stores.
    pub fn with_database(
        client: Arc<dyn ProtocolClient>,
        database: Database,
        public_key: PublicKey,
        config: &SyncConfig,
    ) -> Self {
        let database = Arc::new(database);
        Self::new(
            client,
            database.clone(),
            database,
            public_key,
            OrchestratorSettings::from_config(config),
        )
    }

    pub fn client(&self) -> &Arc<dyn ProtocolClient> {
        &self.client
    }

    /// Runs one cycle for `credential`.
    ///
    /// The first failure is returned as-is; nothing is retried here.
    pub async fn run_sync_cycle(&self, credential: &Credential) -> SyncResult<SyncOutcome> {
        let key = self.settings.watermark_key.as_str();
        let stored = match self.watermarks.load(key).await {
            Ok(stored) => stored,
            Err(e) => {
                warn!(key, error = %e, "Watermark unreadable, using initial lookback");
                None
            }
        };

        let now = Utc::now().trunc_subsecs(3);
        let from = stored
            .unwrap_or_else(|| SyncWatermark::initial(now, self.settings.initial_lookback))
            .last_synced_at;

        info!(
            environment = %self.client.environment(),
            version = %self.client.version(),
            from = %from,
            to = %now,
            resumed = stored.is_some(),
            "Sync cycle started"
        );

        let token = self.client.authenticate(credential, &self.public_key).await?;
        let fetched = self.client.fetch_invoices_since(&token, from, now).await;

        if self.settings.terminate_session {
            if let Err(e) = self.client.terminate_session(&token).await {
                warn!(error = %e, "Session termination failed, ignoring");
            }
        }

        let invoices = fetched?;
        if !invoices.is_empty() {
            let rows = self.invoices.upsert_all(&invoices).await?;
            debug!(rows, "Invoice headers persisted");
        }

        self.advance_watermark(stored, now).await?;

        info!(
            count = invoices.len(),
            synced_at = %now,
            "Sync cycle complete"
        );

        Ok(SyncOutcome {
            synced_at: now,
            window_from: from,
            new_invoice_count: invoices.len(),
            invoices,
        })
    }

    async fn advance_watermark(
        &self,
        stored: Option<SyncWatermark>,
        now: DateTime<Utc>,
    ) -> SyncResult<()> {
        let key = self.settings.watermark_key.as_str();
        match stored {
            Some(previous) if previous.last_synced_at >= now => {
                warn!(
                    key,
                    stored = %previous.last_synced_at,
                    now = %now,
                    "Stored watermark is ahead of the clock, leaving it"
                );
                Ok(())
            }
            _ => {
                self.watermarks.store(key, SyncWatermark::new(now)).await?;
                Ok(())
            }
        }
    }
}
