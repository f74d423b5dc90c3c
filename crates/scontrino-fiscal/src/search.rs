//! # Receipt Search
//!
//! Read-only history view over documents that have left PENDING.
//!
//! Date filters are inclusive calendar days, interpreted as UTC days:
//! `dateTo = 2024-01-31` means "created before 2024-02-01T00:00:00Z".

use chrono::{DateTime, Days, NaiveDate, Utc};

use scontrino_core::validation::{validate_date_range, validate_progressive_query};
use scontrino_core::{ReceiptListItem, SearchFilters, ValidationError};
use scontrino_db::{Database, HistoryQuery};

use crate::error::{FiscalError, FiscalResult};

/// Rows returned when the caller sets no limit.
pub const DEFAULT_SEARCH_LIMIT: u32 = 200;

/// Largest limit a caller may ask for.
pub const MAX_SEARCH_LIMIT: u32 = 1000;

/// History search scoped to one business.
#[derive(Debug, Clone)]
pub struct ReceiptSearchEngine {
    db: Database,
}

impl ReceiptSearchEngine {
    pub fn new(db: Database) -> Self {
        ReceiptSearchEngine { db }
    }

    /// Lists a business's submitted documents matching `filters`, newest first.
    pub async fn search(
        &self,
        business_id: &str,
        filters: &SearchFilters,
    ) -> FiscalResult<Vec<ReceiptListItem>> {
        let query = to_history_query(business_id, filters)?;
        Ok(self.db.history().list(business_id, &query).await?)
    }
}

fn to_history_query(business_id: &str, filters: &SearchFilters) -> FiscalResult<HistoryQuery> {
    if business_id.trim().is_empty() {
        return Err(ValidationError::required("business_id").into());
    }

    validate_date_range(filters.date_from, filters.date_to)?;
    let progressive_contains = validate_progressive_query(filters.progressivo.as_deref())?;

    let limit = filters.limit.unwrap_or(DEFAULT_SEARCH_LIMIT);
    if !(1..=MAX_SEARCH_LIMIT).contains(&limit) {
        return Err(FiscalError::Validation(format!(
            "limit must be between 1 and {}",
            MAX_SEARCH_LIMIT
        )));
    }

    let created_before = match filters.date_to {
        Some(day) => Some(
            day.checked_add_days(Days::new(1))
                .map(start_of_day)
                .ok_or_else(|| FiscalError::Validation(format!("dateTo {} is out of range", day)))?,
        ),
        None => None,
    };

    Ok(HistoryQuery {
        created_from: filters.date_from.map(start_of_day),
        created_before,
        progressive_contains,
        limit,
    })
}

fn start_of_day(day: NaiveDate) -> DateTime<Utc> {
    day.and_time(chrono::NaiveTime::MIN).and_utc()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use scontrino_core::{DocumentStatus, Money, ReceiptDocument, ReceiptLineItem};
    use scontrino_db::DbConfig;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn filters() -> SearchFilters {
        SearchFilters::default()
    }

    /// Stores a sale created at `created_at`, confirmed unless `pending`.
    async fn store(db: &Database, business_id: &str, created_at: DateTime<Utc>, pending: bool) -> String {
        let lines = vec![ReceiptLineItem {
            description: "Caffè".to_string(),
            quantity: "1".to_string(),
            gross_unit_price: "1.20".to_string(),
            vat_code: "22%".to_string(),
        }];
        let sale = ReceiptDocument::new_sale(business_id, lines, Money::from_cents(120), created_at);
        let repo = db.receipts();
        repo.insert_document(&sale).await.unwrap();

        if !pending {
            repo.begin_attempt(&sale, created_at).await.unwrap();
            let progressive = format!("DCW2024/{}", created_at.format("%m%d%H"));
            repo.confirm_sale(&sale.id, &progressive, "tx", created_at)
                .await
                .unwrap();
        }

        sale.id
    }

    #[tokio::test]
    async fn test_search_january() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let engine = ReceiptSearchEngine::new(db.clone());

        store(&db, "biz-1", Utc.with_ymd_and_hms(2023, 12, 31, 23, 59, 59).unwrap(), false).await;
        let first = store(&db, "biz-1", Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(), false).await;
        let last = store(&db, "biz-1", Utc.with_ymd_and_hms(2024, 1, 31, 23, 59, 59).unwrap(), false).await;
        store(&db, "biz-1", Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap(), false).await;
        store(&db, "biz-1", Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap(), true).await;
        store(&db, "biz-2", Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap(), false).await;

        let january = SearchFilters {
            date_from: Some(day(1)),
            date_to: Some(day(31)),
            ..filters()
        };
        let items = engine.search("biz-1", &january).await.unwrap();

        let ids: Vec<&str> = items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec![last.as_str(), first.as_str()]);
        assert!(items.iter().all(|i| i.status != DocumentStatus::Pending));
    }

    #[tokio::test]
    async fn test_search_by_progressive_fragment() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let engine = ReceiptSearchEngine::new(db.clone());

        let wanted = store(&db, "biz-1", Utc.with_ymd_and_hms(2024, 1, 5, 9, 0, 0).unwrap(), false).await;
        store(&db, "biz-1", Utc.with_ymd_and_hms(2024, 1, 6, 9, 0, 0).unwrap(), false).await;

        let by_progressive = SearchFilters {
            progressivo: Some("  010509 ".to_string()),
            ..filters()
        };
        let items = engine.search("biz-1", &by_progressive).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, wanted);
    }

    #[test]
    fn test_filters_become_utc_day_bounds() {
        let query = to_history_query(
            "biz-1",
            &SearchFilters {
                date_from: Some(day(1)),
                date_to: Some(day(31)),
                ..filters()
            },
        )
        .unwrap();

        assert_eq!(query.created_from, Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()));
        assert_eq!(query.created_before, Some(Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap()));
        assert_eq!(query.limit, DEFAULT_SEARCH_LIMIT);
        assert!(query.progressive_contains.is_none());
    }

    #[test]
    fn test_invalid_filters() {
        let reversed = SearchFilters {
            date_from: Some(day(31)),
            date_to: Some(day(1)),
            ..filters()
        };
        assert!(matches!(
            to_history_query("biz-1", &reversed),
            Err(FiscalError::Validation(_))
        ));

        let too_long = SearchFilters {
            progressivo: Some("9".repeat(51)),
            ..filters()
        };
        assert!(to_history_query("biz-1", &too_long).is_err());

        let zero = SearchFilters {
            limit: Some(0),
            ..filters()
        };
        assert!(to_history_query("biz-1", &zero).is_err());

        let huge = SearchFilters {
            limit: Some(MAX_SEARCH_LIMIT + 1),
            ..filters()
        };
        assert!(to_history_query("biz-1", &huge).is_err());

        assert!(to_history_query(" ", &filters()).is_err());
    }
}
