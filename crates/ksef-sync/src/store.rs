//! # Stores
//!
//! Persistence seams used by the orchestrator and the trigger. The SQLite
//! implementations live on [`ksef_db::Database`]; tests substitute their own.

use async_trait::async_trait;
use tracing::debug;

use ksef_core::{InvoiceHeader, SyncWatermark};
use ksef_db::{Database, DbResult, SyncRunRecord};

/// Durable watermark storage under a logical key.
#[async_trait]
pub trait WatermarkStore: Send + Sync {
    async fn load(&self, key: &str) -> DbResult<Option<SyncWatermark>>;

    async fn store(&self, key: &str, watermark: SyncWatermark) -> DbResult<()>;
}

/// Durable invoice header storage.
#[async_trait]
pub trait InvoiceStore: Send + Sync {
    /// Inserts or refreshes every header in one transaction, keyed by
    /// reference number. Returns the number of rows written.
    async fn upsert_all(&self, invoices: &[InvoiceHeader]) -> DbResult<u64>;
}

/// Journal of finished cycles.
#[async_trait]
pub trait RunLog: Send + Sync {
    async fn record(&self, run: &SyncRunRecord) -> DbResult<()>;
}

// =============================================================================
// SQLite Implementations
// =============================================================================

#[async_trait]
impl WatermarkStore for Database {
    async fn load(&self, key: &str) -> DbResult<Option<SyncWatermark>> {
        let stored = self.sync_state().get_timestamp(key).await?;
        Ok(stored.map(SyncWatermark::new))
    }

    async fn store(&self, key: &str, watermark: SyncWatermark) -> DbResult<()> {
        self.sync_state()
            .set_timestamp(key, watermark.last_synced_at)
            .await?;
        debug!(key, at = %watermark.last_synced_at, "Watermark stored");
        Ok(())
    }
}

#[async_trait]
impl InvoiceStore for Database {
    async fn upsert_all(&self, invoices: &[InvoiceHeader]) -> DbResult<u64> {
        self.invoices().upsert_all(invoices).await
    }
}

#[async_trait]
impl RunLog for Database {
    async fn record(&self, run: &SyncRunRecord) -> DbResult<()> {
        self.sync_runs().record(run).await
    }
}
