//! # Receipt Repository
//!
//! Database operations for fiscal documents and their line snapshots.
//!
//! ## Guarded Updates
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Status Updates                                    │
//! │                                                                         │
//! │  begin_attempt   PENDING | SUBMITTED | FAILED(retryable) → SUBMITTED   │
//! │                  WHERE status = <seen> AND updated_at = <seen>         │
//! │                                                                         │
//! │  confirm_sale    SUBMITTED → CONFIRMED   (+ progressive, transaction)  │
//! │  confirm_void    SUBMITTED → CONFIRMED   ┐ one transaction             │
//! │                  sale CONFIRMED → VOIDED ┘                             │
//! │  mark_failed     SUBMITTED → FAILED      (+ retryable, reason)         │
//! │                                                                         │
//! │  0 rows affected → DbError::StaleTransition                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Totals are never stored: they are recomputed from the line snapshots on
//! every read with the same rounding used at creation.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::{FromRow, QueryBuilder, Sqlite, SqlitePool};
use tracing::{debug, warn};

use scontrino_core::cart::receipt_total;
use scontrino_core::{DocumentKind, DocumentStatus, ReceiptDocument, ReceiptLineItem};

use crate::error::{DbError, DbResult};

/// `SELECT <document columns> FROM receipt_documents <tail>`
macro_rules! select_documents {
    ($tail:literal) => {
        concat!(
            "SELECT id, business_id, kind, status, ade_progressive, ade_transaction_id, ",
            "submission_token, attempts, retryable, failure_reason, void_of_document_id, ",
            "idempotency_key, created_at, updated_at FROM receipt_documents ",
            $tail
        )
    };
}
pub(crate) use select_documents;

// =============================================================================
// Row Types
// =============================================================================

/// A `receipt_documents` row, before its lines are attached.
#[derive(Debug, FromRow)]
pub(crate) struct DocumentRow {
    id: String,
    business_id: String,
    kind: DocumentKind,
    status: DocumentStatus,
    ade_progressive: Option<String>,
    ade_transaction_id: Option<String>,
    submission_token: String,
    attempts: i64,
    retryable: bool,
    failure_reason: Option<String>,
    void_of_document_id: Option<String>,
    idempotency_key: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl DocumentRow {
    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    fn into_document(self, lines: Vec<ReceiptLineItem>) -> DbResult<ReceiptDocument> {
        let total = receipt_total(&lines)?;

        Ok(ReceiptDocument {
            id: self.id,
            business_id: self.business_id,
            kind: self.kind,
            status: self.status,
            ade_progressive: self.ade_progressive,
            ade_transaction_id: self.ade_transaction_id,
            lines,
            total,
            submission_token: self.submission_token,
            attempts: self.attempts,
            retryable: self.retryable,
            failure_reason: self.failure_reason,
            void_of_document_id: self.void_of_document_id,
            idempotency_key: self.idempotency_key,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct LineRow {
    document_id: String,
    description: String,
    quantity: String,
    gross_unit_price: String,
    vat_code: String,
}

/// Loads the line snapshots of `ids`, grouped by document, in position order.
pub(crate) async fn load_lines(
    pool: &SqlitePool,
    ids: &[&str],
) -> DbResult<HashMap<String, Vec<ReceiptLineItem>>> {
    let mut grouped: HashMap<String, Vec<ReceiptLineItem>> = HashMap::new();
    if ids.is_empty() {
        return Ok(grouped);
    }

    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
        "SELECT document_id, description, quantity, gross_unit_price, vat_code \
         FROM receipt_lines WHERE document_id IN (",
    );
    let mut separated = qb.separated(", ");
    for id in ids {
        separated.push_bind(id.to_string());
    }
    separated.push_unseparated(") ORDER BY document_id, position");

    let rows: Vec<LineRow> = qb.build_query_as().fetch_all(pool).await?;

    for row in rows {
        grouped
            .entry(row.document_id)
            .or_default()
            .push(ReceiptLineItem {
                description: row.description,
                quantity: row.quantity,
                gross_unit_price: row.gross_unit_price,
                vat_code: row.vat_code,
            });
    }

    Ok(grouped)
}

/// Attaches lines to document rows, preserving row order.
pub(crate) async fn hydrate(
    pool: &SqlitePool,
    rows: Vec<DocumentRow>,
) -> DbResult<Vec<ReceiptDocument>> {
    let ids: Vec<&str> = rows.iter().map(|r| r.id()).collect();
    let mut lines = load_lines(pool, &ids).await?;

    rows.into_iter()
        .map(|row| {
            let doc_lines = lines.remove(row.id()).unwrap_or_default();
            row.into_document(doc_lines)
        })
        .collect()
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for fiscal document database operations.
#[derive(Debug, Clone)]
pub struct ReceiptRepository {
    pool: SqlitePool,
}

impl ReceiptRepository {
    /// Creates a new ReceiptRepository.
    pub fn new(pool: SqlitePool) -> Self {
        ReceiptRepository { pool }
    }

    /// Inserts a document and all of its line snapshots in one transaction.
    ///
    /// ## Errors
    /// - `UniqueViolation` on `void_of_document_id`: the SALE already has a
    ///   live or confirmed VOID
    /// - `UniqueViolation` on `idempotency_key`: the key already created a VOID
    pub async fn insert_document(&self, doc: &ReceiptDocument) -> DbResult<()> {
        debug!(
            id = %doc.id,
            kind = doc.kind.as_str(),
            lines = doc.lines.len(),
            "Inserting receipt document"
        );

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO receipt_documents (
                id, business_id, kind, status,
                ade_progressive, ade_transaction_id, submission_token,
                attempts, retryable, failure_reason,
                void_of_document_id, idempotency_key,
                created_at, updated_at
            ) VALUES (
                ?1, ?2, ?3, ?4,
                ?5, ?6, ?7,
                ?8, ?9, ?10,
                ?11, ?12,
                ?13, ?14
            )
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.business_id)
        .bind(doc.kind)
        .bind(doc.status)
        .bind(&doc.ade_progressive)
        .bind(&doc.ade_transaction_id)
        .bind(&doc.submission_token)
        .bind(doc.attempts)
        .bind(doc.retryable)
        .bind(&doc.failure_reason)
        .bind(&doc.void_of_document_id)
        .bind(&doc.idempotency_key)
        .bind(doc.created_at)
        .bind(doc.updated_at)
        .execute(&mut *tx)
        .await?;

        for (position, line) in doc.lines.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO receipt_lines (
                    document_id, position, description,
                    quantity, gross_unit_price, vat_code
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
            )
            .bind(&doc.id)
            .bind(position as i64)
            .bind(&line.description)
            .bind(&line.quantity)
            .bind(&line.gross_unit_price)
            .bind(&line.vat_code)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(())
    }

    /// Gets a document by ID, scoped to its owning business.
    pub async fn get_by_id(&self, business_id: &str, id: &str) -> DbResult<Option<ReceiptDocument>> {
        let row: Option<DocumentRow> =
            sqlx::query_as(select_documents!("WHERE id = ?1 AND business_id = ?2"))
                .bind(id)
                .bind(business_id)
                .fetch_optional(&self.pool)
                .await?;

        match row {
            Some(row) => Ok(hydrate(&self.pool, vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    /// Finds the VOID created under a client idempotency key.
    pub async fn find_void_by_key(
        &self,
        business_id: &str,
        idempotency_key: &str,
    ) -> DbResult<Option<ReceiptDocument>> {
        let row: Option<DocumentRow> = sqlx::query_as(select_documents!(
            "WHERE business_id = ?1 AND idempotency_key = ?2 AND kind = 'void'"
        ))
        .bind(business_id)
        .bind(idempotency_key)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(hydrate(&self.pool, vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    /// Finds a VOID of `sale_id` that is live (still in progress or
    /// retryable) or already confirmed.
    ///
    /// Uses the same predicate as the partial unique index, so `None` means
    /// an insert is allowed.
    pub async fn find_blocking_void(
        &self,
        business_id: &str,
        sale_id: &str,
    ) -> DbResult<Option<ReceiptDocument>> {
        let row: Option<DocumentRow> = sqlx::query_as(select_documents!(
            r#"
            WHERE business_id = ?1
              AND void_of_document_id = ?2
              AND kind = 'void'
              AND (status IN ('pending', 'submitted', 'confirmed')
                   OR (status = 'failed' AND retryable = 1))
            LIMIT 1
            "#
        ))
        .bind(business_id)
        .bind(sale_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(hydrate(&self.pool, vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    /// Every VOID ever created for `sale_id`, oldest first.
    pub async fn voids_of(&self, business_id: &str, sale_id: &str) -> DbResult<Vec<ReceiptDocument>> {
        let rows: Vec<DocumentRow> = sqlx::query_as(select_documents!(
            "WHERE business_id = ?1 AND void_of_document_id = ?2 ORDER BY created_at, id"
        ))
        .bind(business_id)
        .bind(sale_id)
        .fetch_all(&self.pool)
        .await?;

        hydrate(&self.pool, rows).await
    }

    /// Moves `doc` to SUBMITTED for one more authority attempt.
    ///
    /// Compare-and-set on the status and `updated_at` the caller read, so two
    /// requests racing on the same document cannot both submit it.
    /// Clears any previous failure and bumps `attempts`.
    pub async fn begin_attempt(&self, doc: &ReceiptDocument, now: DateTime<Utc>) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE receipt_documents SET
                status = 'submitted',
                attempts = attempts + 1,
                retryable = 0,
                failure_reason = NULL,
                updated_at = ?4
            WHERE id = ?1
              AND status = ?2
              AND updated_at = ?3
              AND status IN ('pending', 'submitted', 'failed')
              AND (status <> 'failed' OR retryable = 1)
            "#,
        )
        .bind(&doc.id)
        .bind(doc.status)
        .bind(doc.updated_at)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::stale(&doc.id, doc.status.as_str()));
        }

        debug!(id = %doc.id, attempt = doc.attempts + 1, "Submission attempt started");
        Ok(())
    }

    /// Records the authority's acceptance of a SALE.
    pub async fn confirm_sale(
        &self,
        id: &str,
        ade_progressive: &str,
        ade_transaction_id: &str,
        now: DateTime<Utc>,
    ) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE receipt_documents SET
                status = 'confirmed',
                ade_progressive = ?2,
                ade_transaction_id = ?3,
                retryable = 0,
                failure_reason = NULL,
                updated_at = ?4
            WHERE id = ?1 AND kind = 'sale' AND status = 'submitted'
            "#,
        )
        .bind(id)
        .bind(ade_progressive)
        .bind(ade_transaction_id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::stale(id, "submitted"));
        }

        Ok(())
    }

    /// Records the authority's acceptance of a VOID and marks its SALE
    /// VOIDED, atomically.
    pub async fn confirm_void(
        &self,
        void_id: &str,
        sale_id: &str,
        ade_progressive: &str,
        ade_transaction_id: &str,
        now: DateTime<Utc>,
    ) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;

        let void_updated = sqlx::query(
            r#"
            UPDATE receipt_documents SET
                status = 'confirmed',
                ade_progressive = ?3,
                ade_transaction_id = ?4,
                retryable = 0,
                failure_reason = NULL,
                updated_at = ?5
            WHERE id = ?1 AND void_of_document_id = ?2 AND kind = 'void' AND status = 'submitted'
            "#,
        )
        .bind(void_id)
        .bind(sale_id)
        .bind(ade_progressive)
        .bind(ade_transaction_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        if void_updated.rows_affected() == 0 {
            return Err(DbError::stale(void_id, "submitted"));
        }

        let sale_updated = sqlx::query(
            r#"
            UPDATE receipt_documents SET
                status = 'voided',
                updated_at = ?2
            WHERE id = ?1 AND kind = 'sale' AND status = 'confirmed'
            "#,
        )
        .bind(sale_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        if sale_updated.rows_affected() == 0 {
            // Dropping the transaction rolls back the VOID update as well
            warn!(void_id, sale_id, "Voided sale is no longer confirmed");
            return Err(DbError::stale(sale_id, "confirmed"));
        }

        tx.commit().await?;

        Ok(())
    }

    /// Records a failed attempt.
    ///
    /// `retryable` documents keep their submission token and may be sent
    /// again; the others need operator attention.
    pub async fn mark_failed(
        &self,
        id: &str,
        retryable: bool,
        reason: &str,
        now: DateTime<Utc>,
    ) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE receipt_documents SET
                status = 'failed',
                retryable = ?2,
                failure_reason = ?3,
                updated_at = ?4
            WHERE id = ?1 AND status = 'submitted'
            "#,
        )
        .bind(id)
        .bind(retryable)
        .bind(reason)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::stale(id, "submitted"));
        }

        Ok(())
    }

    /// Documents whose outcome is still open and that nobody touched since
    /// `untouched_since`, oldest first, across all businesses.
    ///
    /// Open means PENDING, SUBMITTED or a retryable FAILED.
    pub async fn list_unresolved(
        &self,
        untouched_since: DateTime<Utc>,
        limit: u32,
    ) -> DbResult<Vec<ReceiptDocument>> {
        let rows: Vec<DocumentRow> = sqlx::query_as(select_documents!(
            r#"
            WHERE (status IN ('pending', 'submitted') OR (status = 'failed' AND retryable = 1))
              AND updated_at < ?1
            ORDER BY updated_at, id
            LIMIT ?2
            "#
        ))
        .bind(untouched_since)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        hydrate(&self.pool, rows).await
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
