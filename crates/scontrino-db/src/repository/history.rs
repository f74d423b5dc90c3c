//! # History Repository
//!
//! Read side of the receipt history view.
//!
//! ## Query Shape
//! ```text
//! SELECT … FROM receipt_documents
//! WHERE business_id = ?                  always
//!   AND status <> 'pending'              never reached the authority
//!   AND created_at >= ?                  optional lower bound (inclusive)
//!   AND created_at <  ?                  optional upper bound (exclusive)
//!   AND ade_progressive LIKE ? ESCAPE    optional fragment match
//! ORDER BY created_at DESC, id DESC
//! LIMIT ?
//! ```

use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use scontrino_core::ReceiptListItem;

use crate::error::DbResult;
use crate::repository::receipt::{hydrate, select_documents, DocumentRow};

/// Already-validated history filters, expressed as instants.
#[derive(Debug, Clone)]
pub struct HistoryQuery {
    /// Inclusive lower bound on `created_at`.
    pub created_from: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `created_at`.
    pub created_before: Option<DateTime<Utc>>,
    /// Substring the progressive must contain, matched literally.
    pub progressive_contains: Option<String>,
    pub limit: u32,
}

/// Repository for the receipt history view.
#[derive(Debug, Clone)]
pub struct HistoryRepository {
    pool: SqlitePool,
}

impl HistoryRepository {
    /// Creates a new HistoryRepository.
    pub fn new(pool: SqlitePool) -> Self {
        HistoryRepository { pool }
    }

    /// Lists a business's documents matching `query`, newest first.
    pub async fn list(&self, business_id: &str, query: &HistoryQuery) -> DbResult<Vec<ReceiptListItem>> {
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new(select_documents!("WHERE business_id = "));
        qb.push_bind(business_id.to_string());
        qb.push(" AND status <> 'pending'");

        if let Some(from) = query.created_from {
            qb.push(" AND created_at >= ").push_bind(from);
        }

        if let Some(before) = query.created_before {
            qb.push(" AND created_at < ").push_bind(before);
        }

        if let Some(fragment) = &query.progressive_contains {
            qb.push(" AND ade_progressive LIKE ")
                .push_bind(like_contains(fragment))
                .push(" ESCAPE '\\'");
        }

        qb.push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(query.limit as i64);

        let rows: Vec<DocumentRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        let docs = hydrate(&self.pool, rows).await?;

        Ok(docs.iter().map(ReceiptListItem::from).collect())
    }
}

/// `%fragment%` with LIKE wildcards in the fragment escaped.
fn like_contains(fragment: &str) -> String {
    let mut pattern = String::with_capacity(fragment.len() + 2);
    pattern.push('%');
    for c in fragment.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use chrono::TimeZone;
    use scontrino_core::{DocumentStatus, Money, ReceiptDocument, ReceiptLineItem};

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, hour, 0, 0).unwrap()
    }

    fn query() -> HistoryQuery {
        HistoryQuery {
            created_from: None,
            created_before: None,
            progressive_contains: None,
            limit: 200,
        }
    }

    /// Inserts a confirmed SALE created at `created_at` with `progressive`.
    async fn confirmed(db: &Database, business_id: &str, created_at: DateTime<Utc>, progressive: &str) -> String {
        let lines = vec![ReceiptLineItem {
            description: "Caffè".to_string(),
            quantity: "1".to_string(),
            gross_unit_price: "1.20".to_string(),
            vat_code: "22%".to_string(),
        }];
        let sale = ReceiptDocument::new_sale(business_id, lines, Money::from_cents(120), created_at);
        let repo = db.receipts();
        repo.insert_document(&sale).await.unwrap();
        repo.begin_attempt(&sale, created_at).await.unwrap();
        repo.confirm_sale(&sale.id, progressive, "tx", created_at)
            .await
            .unwrap();
        sale.id
    }

    #[tokio::test]
    async fn test_lists_newest_first_without_pending() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let older = confirmed(&db, "biz-1", at(3, 9), "DCW2024/0001").await;
        let newer = confirmed(&db, "biz-1", at(5, 9), "DCW2024/0002").await;

        let pending = ReceiptDocument::new_sale("biz-1", Vec::new(), Money::zero(), at(6, 9));
        db.receipts().insert_document(&pending).await.unwrap();
        confirmed(&db, "biz-2", at(4, 9), "DCW2024/0003").await;

        let items = db.history().list("biz-1", &query()).await.unwrap();
        let ids: Vec<&str> = items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec![newer.as_str(), older.as_str()]);
        assert!(items.iter().all(|i| i.status == DocumentStatus::Confirmed));
        assert_eq!(items[0].total, Money::from_cents(120));
    }

    #[tokio::test]
    async fn test_bounds_and_limit() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        confirmed(&db, "biz-1", at(1, 0), "A1").await;
        let inside = confirmed(&db, "biz-1", at(2, 23), "A2").await;
        confirmed(&db, "biz-1", at(3, 0), "A3").await;

        let q = HistoryQuery {
            created_from: Some(at(2, 0)),
            created_before: Some(at(3, 0)),
            ..query()
        };
        let items = db.history().list("biz-1", &q).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, inside);

        let q = HistoryQuery { limit: 2, ..query() };
        assert_eq!(db.history().list("biz-1", &q).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_progressive_fragment_is_literal() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let plain = confirmed(&db, "biz-1", at(1, 9), "DCW2024/0042").await;
        let underscored = confirmed(&db, "biz-1", at(2, 9), "DCW2024_0042").await;

        let q = HistoryQuery {
            progressive_contains: Some("0042".to_string()),
            ..query()
        };
        assert_eq!(db.history().list("biz-1", &q).await.unwrap().len(), 2);

        // `_` must not act as a single-character wildcard
        let q = HistoryQuery {
            progressive_contains: Some("2024_".to_string()),
            ..query()
        };
        let items = db.history().list("biz-1", &q).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, underscored);

        let q = HistoryQuery {
            progressive_contains: Some("2024/".to_string()),
            ..query()
        };
        let items = db.history().list("biz-1", &q).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, plain);
    }

    #[test]
    fn test_like_contains_escapes_wildcards() {
        assert_eq!(like_contains("0042"), "%0042%");
        assert_eq!(like_contains("10%_"), "%10\\%\\_%");
        assert_eq!(like_contains("a\\b"), "%a\\\\b%");
    }
}
