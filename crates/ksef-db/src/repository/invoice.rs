//! # Invoice Repository
//!
//! Idempotent persistence of invoice headers, keyed by KSeF reference number.
//!
//! ## Upsert Semantics
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                   SINGLE TRANSACTION per batch                          │
//! │                                                                         │
//! │  for header in batch:                                                   │
//! │     INSERT INTO invoices (...) VALUES (...)                             │
//! │     ON CONFLICT(reference_number) DO UPDATE SET                         │
//! │        <header columns> = excluded.<header columns>,                    │
//! │        last_seen_at     = excluded.last_seen_at                         │
//! │        (first_seen_at is left alone)                                    │
//! │                                                                         │
//! │  COMMIT ← all rows or none                                              │
//! │                                                                         │
//! │  Overlapping query windows return the same reference number more than  │
//! │  once; it always ends up as exactly one row.                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use sqlx::{FromRow, SqlitePool};
use tracing::debug;

use super::{decode_timestamp, encode_timestamp};
use crate::error::{DbError, DbResult};
use ksef_core::{Amount, InvoiceHeader};

/// An invoice header together with its bookkeeping timestamps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredInvoice {
    pub header: InvoiceHeader,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct InvoiceRow {
    reference_number: String,
    invoice_number: Option<String>,
    issuer_tax_id: String,
    issuer_name: Option<String>,
    net_minor: Option<i64>,
    vat_minor: Option<i64>,
    gross_minor: i64,
    currency: String,
    invoice_date: String,
    acquired_at: String,
    first_seen_at: String,
    last_seen_at: String,
}

impl TryFrom<InvoiceRow> for StoredInvoice {
    type Error = DbError;

    fn try_from(row: InvoiceRow) -> Result<Self, Self::Error> {
        let invoice_date = NaiveDate::parse_from_str(&row.invoice_date, "%Y-%m-%d")
            .map_err(|e| DbError::corrupt("invoices.invoice_date", &row.invoice_date, e))?;

        Ok(StoredInvoice {
            header: InvoiceHeader {
                reference_number: row.reference_number,
                invoice_number: row.invoice_number,
                issuer_tax_id: row.issuer_tax_id,
                issuer_name: row.issuer_name,
                net_amount: row.net_minor.map(Amount::from_minor),
                vat_amount: row.vat_minor.map(Amount::from_minor),
                gross_amount: Amount::from_minor(row.gross_minor),
                currency: row.currency,
                invoice_date,
                acquired_at: decode_timestamp("invoices.acquired_at", &row.acquired_at)?,
            },
            first_seen_at: decode_timestamp("invoices.first_seen_at", &row.first_seen_at)?,
            last_seen_at: decode_timestamp("invoices.last_seen_at", &row.last_seen_at)?,
        })
    }
}

const SELECT_COLUMNS: &str = r#"
    SELECT
        reference_number, invoice_number, issuer_tax_id, issuer_name,
        net_minor, vat_minor, gross_minor, currency,
        invoice_date, acquired_at, first_seen_at, last_seen_at
    FROM invoices
"#;

/// Repository for invoice header operations.
#[derive(Debug, Clone)]
pub struct InvoiceRepository {
    pool: SqlitePool,
}

impl InvoiceRepository {
    /// Creates a new InvoiceRepository.
    pub fn new(pool: SqlitePool) -> Self {
        InvoiceRepository { pool }
    }

    /// Inserts or refreshes every header in one transaction.
    ///
    /// ## Returns
    /// Number of rows written (inserted or updated). Duplicates inside the
    /// batch count once per occurrence.
    pub async fn upsert_all(&self, headers: &[InvoiceHeader]) -> DbResult<u64> {
        if headers.is_empty() {
            return Ok(0);
        }

        let seen_at = encode_timestamp(&Utc::now());
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;

        let mut written = 0u64;
        for header in headers {
            let result = sqlx::query(
                r#"
                INSERT INTO invoices (
                    reference_number, invoice_number, issuer_tax_id, issuer_name,
                    net_minor, vat_minor, gross_minor, currency,
                    invoice_date, acquired_at, first_seen_at, last_seen_at
                ) VALUES (
                    ?1, ?2, ?3, ?4,
                    ?5, ?6, ?7, ?8,
                    ?9, ?10, ?11, ?11
                )
                ON CONFLICT(reference_number) DO UPDATE SET
                    invoice_number = excluded.invoice_number,
                    issuer_tax_id  = excluded.issuer_tax_id,
                    issuer_name    = excluded.issuer_name,
                    net_minor      = excluded.net_minor,
                    vat_minor      = excluded.vat_minor,
                    gross_minor    = excluded.gross_minor,
                    currency       = excluded.currency,
                    invoice_date   = excluded.invoice_date,
                    acquired_at    = excluded.acquired_at,
                    last_seen_at   = excluded.last_seen_at
                "#,
            )
            .bind(&header.reference_number)
            .bind(&header.invoice_number)
            .bind(&header.issuer_tax_id)
            .bind(&header.issuer_name)
            .bind(header.net_amount.map(|a| a.minor()))
            .bind(header.vat_amount.map(|a| a.minor()))
            .bind(header.gross_amount.minor())
            .bind(&header.currency)
            .bind(header.invoice_date.format("%Y-%m-%d").to_string())
            .bind(encode_timestamp(&header.acquired_at))
            .bind(&seen_at)
            .execute(&mut *tx)
            .await?;

            written += result.rows_affected();
        }

        tx.commit()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;

        debug!(count = headers.len(), written, "Invoice headers upserted");
        Ok(written)
    }

    /// Looks up one invoice by reference number.
    pub async fn get(&self, reference_number: &str) -> DbResult<Option<StoredInvoice>> {
        let sql = format!("{SELECT_COLUMNS} WHERE reference_number = ?1");
        let row = sqlx::query_as::<_, InvoiceRow>(&sql)
            .bind(reference_number)
            .fetch_optional(&self.pool)
            .await?;

        row.map(StoredInvoice::try_from).transpose()
    }

    /// Most recently acquired invoices first.
    pub async fn list_recent(&self, limit: u32) -> DbResult<Vec<StoredInvoice>> {
        let sql = format!("{SELECT_COLUMNS} ORDER BY acquired_at DESC, reference_number LIMIT ?1");
        let rows = sqlx::query_as::<_, InvoiceRow>(&sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(StoredInvoice::try_from).collect()
    }

    /// Counts stored invoices.
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM invoices")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};
    use chrono::TimeZone;

    fn header(reference: &str, gross: i64) -> InvoiceHeader {
        InvoiceHeader {
            reference_number: reference.to_string(),
            invoice_number: Some(format!("FV/{reference}")),
            issuer_tax_id: "5260250274".to_string(),
            issuer_name: Some("ACME Sp. z o.o.".to_string()),
            net_amount: Some(Amount::from_minor(gross * 100 / 123)),
            vat_amount: None,
            gross_amount: Amount::from_minor(gross),
            currency: "PLN".to_string(),
            invoice_date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            acquired_at: Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap(),
        }
    }

    async fn db() -> Database {
        Database::new(DbConfig::in_memory()).await.unwrap()
    }

    #[tokio::test]
    async fn test_upsert_and_get() {
        let db = db().await;
        let repo = db.invoices();
        let h = header("5260250274-20240301-0001", 12300);

        assert_eq!(repo.upsert_all(std::slice::from_ref(&h)).await.unwrap(), 1);

        let stored = repo.get(&h.reference_number).await.unwrap().unwrap();
        assert_eq!(stored.header, h);
        assert_eq!(stored.first_seen_at, stored.last_seen_at);
        assert!(repo.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_twice_is_idempotent() {
        let db = db().await;
        let repo = db.invoices();
        let batch = vec![header("REF-1", 100), header("REF-2", 200)];

        repo.upsert_all(&batch).await.unwrap();
        let first = repo.list_recent(10).await.unwrap();
        repo.upsert_all(&batch).await.unwrap();
        let second = repo.list_recent(10).await.unwrap();

        assert_eq!(repo.count().await.unwrap(), 2);
        let headers = |rows: &[StoredInvoice]| {
            rows.iter().map(|r| r.header.clone()).collect::<Vec<_>>()
        };
        assert_eq!(headers(&first), headers(&second));
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.first_seen_at, b.first_seen_at);
            assert!(b.last_seen_at >= a.last_seen_at);
        }
    }

    #[tokio::test]
    async fn test_duplicate_reference_in_batch_is_one_row() {
        let db = db().await;
        let repo = db.invoices();
        let batch = vec![header("REF-1", 100), header("REF-1", 150)];

        repo.upsert_all(&batch).await.unwrap();

        assert_eq!(repo.count().await.unwrap(), 1);
        let stored = repo.get("REF-1").await.unwrap().unwrap();
        assert_eq!(stored.header.gross_amount, Amount::from_minor(150));
    }

    #[tokio::test]
    async fn test_empty_batch_is_noop() {
        let db = db().await;
        assert_eq!(db.invoices().upsert_all(&[]).await.unwrap(), 0);
        assert_eq!(db.invoices().count().await.unwrap(), 0);
    }
}
