//! # Sync Trigger
//!
//! Entry point for "sync now" requests, from the runner's schedule or from
//! an operator.
//!
//! ```text
//!   run_now() ──► lock ──► orchestrator.run_sync_cycle() ──► TriggerReport
//!                  │                                             │
//!           one cycle at a time                      journal (best effort)
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::error::ErrorKind;
use crate::orchestrator::SyncOrchestrator;
use crate::store::RunLog;
use ksef_core::{Credential, SyncOutcome};
use ksef_db::SyncRunRecord;

/// Result of one triggered cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerReport {
    pub success: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<SyncOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl TriggerReport {
    /// True for failures that may clear up on a later attempt.
    pub fn is_retryable(&self) -> bool {
        self.error_kind.map_or(false, |kind| kind.is_retryable())
    }
}

/// Serializes sync cycles for one credential.
pub struct SyncTrigger {
    orchestrator: SyncOrchestrator,
    credential: Credential,
    journal: Option<Arc<dyn RunLog>>,
    cycle_lock: Mutex<()>,
}

impl SyncTrigger {
    pub fn new(orchestrator: SyncOrchestrator, credential: Credential) -> Self {
        SyncTrigger {
            orchestrator,
            credential,
            journal: None,
            cycle_lock: Mutex::new(()),
        }
    }

    /// Records every finished cycle in `journal`.
    pub fn with_journal(mut self, journal: Arc<dyn RunLog>) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Runs one cycle now, waiting for any cycle already in flight.
    pub async fn run_now(&self) -> TriggerReport {
        let _guard = self.cycle_lock.lock().await;

        let started_at = Utc::now();
        let result = self.orchestrator.run_sync_cycle(&self.credential).await;
        let finished_at = Utc::now();

        let (report, record) = match result {
            Ok(outcome) => {
                let record = SyncRunRecord::succeeded(
                    started_at,
                    finished_at,
                    outcome.window_from,
                    outcome.synced_at,
                    outcome.new_invoice_count as i64,
                );
                let report = TriggerReport {
                    success: true,
                    started_at,
                    finished_at,
                    outcome: Some(outcome),
                    error_kind: None,
                    message: None,
                };
                (report, record)
            }
            Err(e) => {
                let kind = e.kind();
                error!(kind = %kind, retryable = kind.is_retryable(), error = %e, "Sync cycle failed");
                let message = e.to_string();
                let record =
                    SyncRunRecord::failed(started_at, finished_at, kind.as_str(), message.clone());
                let report = TriggerReport {
                    success: false,
                    started_at,
                    finished_at,
                    outcome: None,
                    error_kind: Some(kind),
                    message: Some(message),
                };
                (report, record)
            }
        };

        if let Some(ref journal) = self.journal {
            if let Err(e) = journal.record(&record).await {
                warn!(run_id = %record.id, error = %e, "Failed to journal sync run");
            }
        }

        info!(
            success = report.success,
            elapsed_ms = (finished_at - started_at).num_milliseconds(),
            "Sync trigger finished"
        );
        report
    }

    /// Probes the KSeF endpoint without logging in.
    pub async fn check_connectivity(&self) -> bool {
        self.orchestrator.client().check_connectivity().await
    }
}
