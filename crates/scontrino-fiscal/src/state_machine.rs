//! # Receipt State Machine
//!
//! Drives SALE and VOID documents through submission to the authority.
//!
//! ## Document Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   PENDING ──► SUBMITTED ──┬──► CONFIRMED ───(VOID confirmed)──► VOIDED │
//! │                  ▲        │    progressive + transaction id   (SALE)   │
//! │                  │        │                                            │
//! │                  │        └──► FAILED ──(retryable = false)── final    │
//! │                  │               │                                     │
//! │                  └───────────────┘  retryable = true                   │
//! │                    same submission token                               │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Crash Windows
//! Every transition is one guarded write. The authority call sits between
//! two of them, so a crash can leave a document SUBMITTED with an unknown
//! outcome. The reconciliation sweep resolves it by asking the authority
//! about the document's submission token, which the authority deduplicates.
//!
//! No in-process lock is held across an authority or storage call.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info, warn};

use scontrino_core::{
    CartCalculator, CartLine, DocumentKind, DocumentStatus, ReceiptDocument, ValidationError,
};
use scontrino_db::{Database, DbError};

use crate::authority::{bounded, AuthorityAck, AuthorityError, FiscalAuthorityClient};
use crate::config::FiscalConfig;
use crate::error::{FiscalError, FiscalResult};
use crate::idempotency::IdempotencyGuard;
use crate::reconcile::SweepOutcome;

/// Orchestrates the fiscal lifecycle of receipts.
///
/// Owns every document status transition. Persistence and the authority
/// client are injected at construction.
pub struct ReceiptStateMachine {
    db: Database,
    authority: Arc<dyn FiscalAuthorityClient>,
    guard: IdempotencyGuard,
    authority_timeout: Duration,
}

impl ReceiptStateMachine {
    pub fn new(
        db: Database,
        authority: Arc<dyn FiscalAuthorityClient>,
        config: &FiscalConfig,
    ) -> Self {
        ReceiptStateMachine {
            guard: IdempotencyGuard::new(db.clone(), config.in_flight_lease()),
            db,
            authority,
            authority_timeout: config.authority_timeout(),
        }
    }

    /// Overrides the bound on each authority call.
    pub fn with_authority_timeout(mut self, timeout: Duration) -> Self {
        self.authority_timeout = timeout;
        self
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// Turns a cart into a SALE and submits it.
    ///
    /// ## Outcomes
    /// - `Ok(doc)`: CONFIRMED, with progressive and transaction id
    /// - `InvalidCart`: nothing was persisted
    /// - `Rejected`: the document is FAILED for good
    /// - `Transient`: the document is FAILED(retryable); retry it by id
    pub async fn create_sale(
        &self,
        business_id: &str,
        cart: &[CartLine],
    ) -> FiscalResult<ReceiptDocument> {
        require_business(business_id)?;

        let totals = CartCalculator::calculate(cart)?;
        let sale = ReceiptDocument::new_sale(business_id, totals.lines, totals.total, Utc::now());

        self.db.receipts().insert_document(&sale).await?;

        info!(
            document_id = %sale.id,
            business_id,
            total = %sale.total,
            lines = sale.lines.len(),
            "Sale created"
        );

        self.attempt(sale).await
    }

    /// Cancels a CONFIRMED SALE with a VOID document.
    ///
    /// Client retries with the same `idempotency_key` replay the first
    /// outcome, or resume the same VOID if that outcome was transient.
    pub async fn void_sale(
        &self,
        business_id: &str,
        document_id: &str,
        idempotency_key: &str,
    ) -> FiscalResult<ReceiptDocument> {
        require_business(business_id)?;

        let operation = format!("void:{}", document_id);
        self.guard
            .execute(business_id, idempotency_key, &operation, || {
                self.void_once(business_id, document_id, idempotency_key)
            })
            .await
    }

    /// Resubmits a FAILED(retryable) document with its original token.
    pub async fn retry_submission(
        &self,
        business_id: &str,
        document_id: &str,
    ) -> FiscalResult<ReceiptDocument> {
        let doc = self.get_document(business_id, document_id).await?;

        if !doc.is_retryable_failure() {
            return Err(FiscalError::NotRetryable {
                document_id: doc.id,
                status: doc.status.to_string(),
            });
        }

        info!(
            document_id = %doc.id,
            business_id,
            attempts = doc.attempts,
            "Retrying submission"
        );

        self.attempt(doc).await
    }

    /// Loads a document owned by `business_id`.
    pub async fn get_document(
        &self,
        business_id: &str,
        document_id: &str,
    ) -> FiscalResult<ReceiptDocument> {
        require_business(business_id)?;

        self.db
            .receipts()
            .get_by_id(business_id, document_id)
            .await?
            .ok_or_else(|| FiscalError::DocumentNotFound {
                document_id: document_id.to_string(),
            })
    }

    // =========================================================================
    // Void
    // =========================================================================

    async fn void_once(
        &self,
        business_id: &str,
        document_id: &str,
        idempotency_key: &str,
    ) -> FiscalResult<ReceiptDocument> {
        let repo = self.db.receipts();

        if let Some(existing) = repo.find_void_by_key(business_id, idempotency_key).await? {
            return self.resume_void(existing, document_id).await;
        }

        let sale = repo
            .get_by_id(business_id, document_id)
            .await?
            .ok_or_else(|| FiscalError::invalid_void_target(document_id, "document not found"))?;

        if sale.kind != DocumentKind::Sale {
            return Err(FiscalError::invalid_void_target(
                document_id,
                "only sales can be voided",
            ));
        }

        if sale.status == DocumentStatus::Voided {
            return Err(FiscalError::AlreadyVoided {
                document_id: sale.id,
            });
        }

        if let Some(blocking) = repo.find_blocking_void(business_id, &sale.id).await? {
            info!(
                document_id = %sale.id,
                void_id = %blocking.id,
                void_status = %blocking.status,
                "Sale already has a void"
            );
            return Err(FiscalError::AlreadyVoided {
                document_id: sale.id,
            });
        }

        if sale.status != DocumentStatus::Confirmed {
            return Err(FiscalError::invalid_void_target(
                document_id,
                format!("status is {}", sale.status),
            ));
        }

        let void = ReceiptDocument::new_void(&sale, idempotency_key, Utc::now());
        match repo.insert_document(&void).await {
            Ok(()) => {}
            // Lost the race against a void with another key
            Err(e) if e.is_unique_violation_on("void_of_document_id") => {
                info!(document_id = %sale.id, "Concurrent void won the race");
                return Err(FiscalError::AlreadyVoided {
                    document_id: sale.id,
                });
            }
            Err(e) if e.is_unique_violation_on("idempotency_key") => {
                return Err(FiscalError::ConcurrentRetry {
                    resource: format!("idempotency key {}", idempotency_key),
                });
            }
            Err(e) => return Err(e.into()),
        }

        info!(
            void_id = %void.id,
            document_id = %sale.id,
            business_id,
            "Void created"
        );

        self.attempt(void).await
    }

    /// Continues the VOID an earlier request created under the same key.
    async fn resume_void(
        &self,
        existing: ReceiptDocument,
        document_id: &str,
    ) -> FiscalResult<ReceiptDocument> {
        if existing.void_of_document_id.as_deref() != Some(document_id) {
            return Err(FiscalError::IdempotencyKeyConflict {
                idempotency_key: existing.idempotency_key.unwrap_or_default(),
            });
        }

        match existing.status {
            DocumentStatus::Confirmed => Ok(existing),
            DocumentStatus::Pending => self.attempt(existing).await,
            DocumentStatus::Failed if existing.retryable => {
                info!(void_id = %existing.id, "Resuming void with its original token");
                self.attempt(existing).await
            }
            DocumentStatus::Failed => Err(FiscalError::Rejected {
                reason: existing
                    .failure_reason
                    .unwrap_or_else(|| "rejected by the authority".to_string()),
                document_id: existing.id,
            }),
            DocumentStatus::Submitted => Err(FiscalError::ConcurrentRetry {
                resource: format!("document {}", existing.id),
            }),
            DocumentStatus::Voided => Err(FiscalError::Persistence(format!(
                "void {} has sale-only status voided",
                existing.id
            ))),
        }
    }

    // =========================================================================
    // Submission
    // =========================================================================

    /// One submission attempt: SUBMITTED, authority call, outcome.
    async fn attempt(&self, doc: ReceiptDocument) -> FiscalResult<ReceiptDocument> {
        let sale = self.void_target(&doc).await?;

        match self.db.receipts().begin_attempt(&doc, Utc::now()).await {
            Ok(()) => {}
            Err(DbError::StaleTransition { .. }) => {
                return Err(FiscalError::ConcurrentRetry {
                    resource: format!("document {}", doc.id),
                });
            }
            Err(e) => return Err(e.into()),
        }

        let result = self.call_authority(&doc, sale.as_ref()).await;
        self.record_outcome(doc, result).await
    }

    /// The SALE a VOID cancels; `None` for a SALE.
    async fn void_target(&self, doc: &ReceiptDocument) -> FiscalResult<Option<ReceiptDocument>> {
        let Some(sale_id) = doc.void_of_document_id.as_deref() else {
            return Ok(None);
        };

        self.db
            .receipts()
            .get_by_id(&doc.business_id, sale_id)
            .await?
            .map(Some)
            .ok_or_else(|| {
                FiscalError::Persistence(format!("void {} references missing sale {}", doc.id, sale_id))
            })
    }

    async fn call_authority(
        &self,
        doc: &ReceiptDocument,
        sale: Option<&ReceiptDocument>,
    ) -> Result<AuthorityAck, AuthorityError> {
        match sale {
            None => bounded(self.authority_timeout, self.authority.submit(doc)).await,
            Some(sale) => bounded(self.authority_timeout, self.authority.cancel(doc, sale)).await,
        }
    }

    async fn record_outcome(
        &self,
        doc: ReceiptDocument,
        result: Result<AuthorityAck, AuthorityError>,
    ) -> FiscalResult<ReceiptDocument> {
        let repo = self.db.receipts();

        match result {
            Ok(ack) => self.commit_confirmation(&doc, &ack).await,
            Err(AuthorityError::Rejected(reason)) => {
                warn!(
                    document_id = %doc.id,
                    kind = doc.kind.as_str(),
                    reason = %reason,
                    "Authority rejected document"
                );
                repo.mark_failed(&doc.id, false, &reason, Utc::now()).await?;
                Err(FiscalError::Rejected {
                    document_id: doc.id,
                    reason,
                })
            }
            Err(AuthorityError::Transient(reason)) => {
                warn!(
                    document_id = %doc.id,
                    kind = doc.kind.as_str(),
                    submission_token = %doc.submission_token,
                    reason = %reason,
                    "Authority outcome unknown, document pending retry"
                );
                repo.mark_failed(&doc.id, true, &reason, Utc::now()).await?;
                Err(FiscalError::Transient {
                    document_id: doc.id,
                    reason,
                })
            }
        }
    }

    /// Stores an authority acceptance and returns the CONFIRMED document.
    async fn commit_confirmation(
        &self,
        doc: &ReceiptDocument,
        ack: &AuthorityAck,
    ) -> FiscalResult<ReceiptDocument> {
        let repo = self.db.receipts();
        let now = Utc::now();

        let committed = match doc.void_of_document_id.as_deref() {
            None => {
                repo.confirm_sale(&doc.id, &ack.ade_progressive, &ack.ade_transaction_id, now)
                    .await
            }
            Some(sale_id) => {
                repo.confirm_void(&doc.id, sale_id, &ack.ade_progressive, &ack.ade_transaction_id, now)
                    .await
            }
        };

        if let Err(e) = committed {
            // The authority holds the document; the sweep will find it by token
            error!(
                document_id = %doc.id,
                submission_token = %doc.submission_token,
                ade_progressive = %ack.ade_progressive,
                error = %e,
                "Authority accepted document but local commit failed"
            );
            return Err(e.into());
        }

        info!(
            document_id = %doc.id,
            kind = doc.kind.as_str(),
            ade_progressive = %ack.ade_progressive,
            "Document confirmed"
        );

        self.get_document(&doc.business_id, &doc.id).await
    }

    // =========================================================================
    // Reconciliation
    // =========================================================================

    /// Resolves one document with an open outcome.
    ///
    /// Asks the authority about the document's token first and only
    /// resubmits when the authority has never accepted it.
    pub(crate) async fn reconcile(
        &self,
        doc: ReceiptDocument,
        max_attempts: i64,
    ) -> FiscalResult<SweepOutcome> {
        let repo = self.db.receipts();
        let sale = self.void_target(&doc).await?;

        match repo.begin_attempt(&doc, Utc::now()).await {
            Ok(()) => {}
            // A live request moved it first
            Err(DbError::StaleTransition { .. }) => return Ok(SweepOutcome::Skipped),
            Err(e) => return Err(e.into()),
        }

        let known = bounded(
            self.authority_timeout,
            self.authority.lookup(&doc.submission_token),
        )
        .await;

        match known {
            Ok(Some(ack)) => {
                info!(
                    document_id = %doc.id,
                    submission_token = %doc.submission_token,
                    "Authority already holds document, recovering confirmation"
                );
                self.commit_confirmation(&doc, &ack).await?;
                Ok(SweepOutcome::Recovered)
            }
            Ok(None) if doc.attempts >= max_attempts => {
                let reason = format!("gave up after {} attempts", doc.attempts + 1);
                repo.mark_failed(&doc.id, false, &reason, Utc::now()).await?;
                error!(
                    document_id = %doc.id,
                    business_id = %doc.business_id,
                    kind = doc.kind.as_str(),
                    attempts = doc.attempts + 1,
                    "Document needs operator attention"
                );
                Ok(SweepOutcome::Exhausted)
            }
            Ok(None) => {
                let result = self.call_authority(&doc, sale.as_ref()).await;
                match self.record_outcome(doc, result).await {
                    Ok(_) => Ok(SweepOutcome::Confirmed),
                    Err(FiscalError::Transient { .. }) => Ok(SweepOutcome::Retrying),
                    Err(FiscalError::Rejected { .. }) => Ok(SweepOutcome::Rejected),
                    Err(e) => Err(e),
                }
            }
            Err(e) => {
                warn!(document_id = %doc.id, error = %e, "Authority lookup failed");
                repo.mark_failed(&doc.id, true, &e.to_string(), Utc::now()).await?;
                Ok(SweepOutcome::Retrying)
            }
        }
    }
}

fn require_business(business_id: &str) -> FiscalResult<()> {
    if business_id.trim().is_empty() {
        return Err(ValidationError::required("business_id").into());
    }
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Scripted, ScriptedAuthority};
    use rust_decimal_macros::dec;
    use scontrino_core::Money;
    use scontrino_db::{DbConfig, HistoryQuery};
    use uuid::Uuid;

    struct Fixture {
        machine: ReceiptStateMachine,
        authority: Arc<ScriptedAuthority>,
        db: Database,
    }

    async fn setup_with(authority: ScriptedAuthority) -> Fixture {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let authority = Arc::new(authority);
        let machine = ReceiptStateMachine::new(
            db.clone(),
            authority.clone(),
            &FiscalConfig::default(),
        );
        Fixture {
            machine,
            authority,
            db,
        }
    }

    async fn setup() -> Fixture {
        setup_with(ScriptedAuthority::new()).await
    }

    fn cart() -> Vec<CartLine> {
        vec![
            CartLine::new("Caffè", dec!(1), dec!(1.20), "22%"),
            CartLine::new("Acqua", dec!(2), dec!(0.50), "10%"),
        ]
    }

    fn key() -> String {
        Uuid::new_v4().to_string()
    }

    async fn history(db: &Database, business_id: &str) -> Vec<scontrino_core::ReceiptListItem> {
        let query = HistoryQuery {
            created_from: None,
            created_before: None,
            progressive_contains: None,
            limit: 100,
        };
        db.history().list(business_id, &query).await.unwrap()
    }

    // -------------------------------------------------------------------------
    // Sales
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_create_sale_confirms() {
        let f = setup().await;

        let sale = f.machine.create_sale("biz-1", &cart()).await.unwrap();

        assert_eq!(sale.status, DocumentStatus::Confirmed);
        assert_eq!(sale.total, Money::from_cents(220));
        assert_eq!(sale.ade_progressive.as_deref(), Some("DCW2024/0001"));
        assert_eq!(sale.ade_transaction_id.as_deref(), Some("tx-1"));
        assert_eq!(sale.attempts, 1);
        assert_eq!(f.authority.submit_calls(), 1);
    }

    #[tokio::test]
    async fn test_invalid_cart_persists_nothing() {
        let f = setup().await;

        let err = f.machine.create_sale("biz-1", &[]).await.unwrap_err();
        assert!(matches!(err, FiscalError::InvalidCart(_)));

        let bad_quantity = vec![CartLine::new("Caffè", dec!(0), dec!(1.20), "22%")];
        let err = f.machine.create_sale("biz-1", &bad_quantity).await.unwrap_err();
        assert!(matches!(err, FiscalError::InvalidCart(_)));

        let bad_vat = vec![CartLine::new("Caffè", dec!(1), dec!(1.20), "23%")];
        let err = f.machine.create_sale("biz-1", &bad_vat).await.unwrap_err();
        assert!(matches!(err, FiscalError::InvalidCart(_)));

        let open = f
            .db
            .receipts()
            .list_unresolved(Utc::now() + chrono::Duration::hours(1), 10)
            .await
            .unwrap();
        assert!(open.is_empty());
        assert!(history(&f.db, "biz-1").await.is_empty());
        assert_eq!(f.authority.submit_calls(), 0);
    }

    #[tokio::test]
    async fn test_rejected_sale_is_final() {
        let f = setup().await;
        f.authority.script([Scripted::Reject("malformed payload")]);

        let err = f.machine.create_sale("biz-1", &cart()).await.unwrap_err();
        let document_id = match err {
            FiscalError::Rejected {
                document_id,
                reason,
            } => {
                assert_eq!(reason, "malformed payload");
                document_id
            }
            other => panic!("expected rejection, got {:?}", other),
        };

        let doc = f.machine.get_document("biz-1", &document_id).await.unwrap();
        assert_eq!(doc.status, DocumentStatus::Failed);
        assert!(!doc.retryable);
        assert!(doc.ade_progressive.is_none());

        let err = f
            .machine
            .retry_submission("biz-1", &document_id)
            .await
            .unwrap_err();
        assert!(matches!(err, FiscalError::NotRetryable { .. }));
    }

    #[tokio::test]
    async fn test_transient_failure_then_retry_confirms() {
        let f = setup().await;
        f.authority.script([Scripted::Transient("authority unavailable")]);

        let err = f.machine.create_sale("biz-1", &cart()).await.unwrap_err();
        assert!(err.is_retryable());
        let document_id = err.document_id().unwrap().to_string();

        let failed = f.machine.get_document("biz-1", &document_id).await.unwrap();
        assert!(failed.is_retryable_failure());

        let confirmed = f
            .machine
            .retry_submission("biz-1", &document_id)
            .await
            .unwrap();

        assert_eq!(confirmed.id, document_id);
        assert_eq!(confirmed.status, DocumentStatus::Confirmed);
        assert_eq!(confirmed.submission_token, failed.submission_token);
        assert_eq!(confirmed.ade_progressive.as_deref(), Some("DCW2024/0001"));
        assert_eq!(confirmed.attempts, 2);

        // One document locally, one at the authority
        assert_eq!(history(&f.db, "biz-1").await.len(), 1);
        assert_eq!(f.authority.registered(), 1);
    }

    #[tokio::test]
    async fn test_lost_response_is_not_registered_twice() {
        let f = setup().await;
        f.authority.script([Scripted::AcceptButLoseResponse]);

        let err = f.machine.create_sale("biz-1", &cart()).await.unwrap_err();
        let document_id = err.document_id().unwrap().to_string();

        let confirmed = f
            .machine
            .retry_submission("biz-1", &document_id)
            .await
            .unwrap();

        assert_eq!(confirmed.ade_progressive.as_deref(), Some("DCW2024/0001"));
        assert_eq!(f.authority.registered(), 1);
    }

    #[tokio::test]
    async fn test_authority_timeout_is_transient() {
        let f = setup().await;
        let machine = ReceiptStateMachine::new(
            f.db.clone(),
            f.authority.clone(),
            &FiscalConfig::default(),
        )
        .with_authority_timeout(Duration::from_millis(50));
        f.authority.script([Scripted::Hang]);

        let err = machine.create_sale("biz-1", &cart()).await.unwrap_err();
        assert!(matches!(err, FiscalError::Transient { .. }));

        let doc = machine
            .get_document("biz-1", err.document_id().unwrap())
            .await
            .unwrap();
        assert!(doc.is_retryable_failure());
    }

    #[tokio::test]
    async fn test_retry_requires_retryable_failure() {
        let f = setup().await;
        let sale = f.machine.create_sale("biz-1", &cart()).await.unwrap();

        let err = f.machine.retry_submission("biz-1", &sale.id).await.unwrap_err();
        assert!(matches!(err, FiscalError::NotRetryable { .. }));

        let err = f.machine.retry_submission("biz-2", &sale.id).await.unwrap_err();
        assert!(matches!(err, FiscalError::DocumentNotFound { .. }));
    }

    // -------------------------------------------------------------------------
    // Voids
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_void_with_same_key_has_one_effect() {
        let f = setup().await;
        let sale = f.machine.create_sale("biz-1", &cart()).await.unwrap();
        let void_key = key();

        let first = f.machine.void_sale("biz-1", &sale.id, &void_key).await.unwrap();
        let second = f.machine.void_sale("biz-1", &sale.id, &void_key).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.ade_progressive, second.ade_progressive);
        assert_eq!(first.kind, DocumentKind::Void);
        assert_eq!(first.status, DocumentStatus::Confirmed);
        assert_eq!(first.void_of_document_id.as_deref(), Some(sale.id.as_str()));
        assert_eq!(f.authority.cancel_calls(), 1);

        let sale = f.machine.get_document("biz-1", &sale.id).await.unwrap();
        assert_eq!(sale.status, DocumentStatus::Voided);
    }

    #[tokio::test]
    async fn test_concurrent_voids_with_different_keys() {
        let f = setup_with(ScriptedAuthority::with_latency(Duration::from_millis(20))).await;
        let sale = f.machine.create_sale("biz-1", &cart()).await.unwrap();
        let (key_a, key_b) = (key(), key());

        let (a, b) = tokio::join!(
            f.machine.void_sale("biz-1", &sale.id, &key_a),
            f.machine.void_sale("biz-1", &sale.id, &key_b),
        );

        let outcomes = [a, b];
        let confirmed: Vec<_> = outcomes.iter().filter_map(|r| r.as_ref().ok()).collect();
        assert_eq!(confirmed.len(), 1);
        assert_eq!(confirmed[0].status, DocumentStatus::Confirmed);
        assert!(outcomes
            .iter()
            .any(|r| matches!(r, Err(FiscalError::AlreadyVoided { .. }))));

        let voids = f.db.receipts().voids_of("biz-1", &sale.id).await.unwrap();
        assert_eq!(voids.len(), 1);
        assert_eq!(f.authority.cancel_calls(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_voids_with_same_key() {
        let f = setup_with(ScriptedAuthority::with_latency(Duration::from_millis(20))).await;
        let sale = f.machine.create_sale("biz-1", &cart()).await.unwrap();
        let void_key = key();

        let (a, b) = tokio::join!(
            f.machine.void_sale("biz-1", &sale.id, &void_key),
            f.machine.void_sale("biz-1", &sale.id, &void_key),
        );

        let winner = match (&a, &b) {
            (Ok(doc), Err(FiscalError::ConcurrentRetry { .. }))
            | (Err(FiscalError::ConcurrentRetry { .. }), Ok(doc)) => doc.clone(),
            other => panic!("expected one void and one concurrent retry, got {:?}", other),
        };

        // The client's retry sees the first outcome
        let replay = f.machine.void_sale("biz-1", &sale.id, &void_key).await.unwrap();
        assert_eq!(replay.id, winner.id);
        assert_eq!(f.authority.cancel_calls(), 1);
    }

    #[tokio::test]
    async fn test_void_requires_confirmed_sale() {
        let f = setup().await;
        let repo = f.db.receipts();

        // PENDING
        let totals = CartCalculator::calculate(&cart()).unwrap();
        let pending = ReceiptDocument::new_sale("biz-1", totals.lines.clone(), totals.total, Utc::now());
        repo.insert_document(&pending).await.unwrap();

        // SUBMITTED
        let submitted = ReceiptDocument::new_sale("biz-1", totals.lines, totals.total, Utc::now());
        repo.insert_document(&submitted).await.unwrap();
        repo.begin_attempt(&submitted, Utc::now()).await.unwrap();

        // FAILED
        f.authority.script([Scripted::Transient("timeout")]);
        let failed = f.machine.create_sale("biz-1", &cart()).await.unwrap_err();
        let failed_id = failed.document_id().unwrap().to_string();

        for target in [&pending.id, &submitted.id, &failed_id] {
            let err = f.machine.void_sale("biz-1", target, &key()).await.unwrap_err();
            assert!(
                matches!(err, FiscalError::InvalidVoidTarget { .. }),
                "unexpected {:?}",
                err
            );
            assert!(repo.voids_of("biz-1", target).await.unwrap().is_empty());
        }

        // VOIDED
        let sale = f.machine.create_sale("biz-1", &cart()).await.unwrap();
        f.machine.void_sale("biz-1", &sale.id, &key()).await.unwrap();
        let err = f.machine.void_sale("biz-1", &sale.id, &key()).await.unwrap_err();
        assert!(matches!(err, FiscalError::AlreadyVoided { .. }));
        assert_eq!(repo.voids_of("biz-1", &sale.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_void_target_checks() {
        let f = setup().await;
        let sale = f.machine.create_sale("biz-1", &cart()).await.unwrap();

        // Another business cannot see the sale
        let err = f.machine.void_sale("biz-2", &sale.id, &key()).await.unwrap_err();
        assert!(matches!(err, FiscalError::InvalidVoidTarget { .. }));

        let err = f.machine.void_sale("biz-1", "missing", &key()).await.unwrap_err();
        assert!(matches!(err, FiscalError::InvalidVoidTarget { .. }));

        // A void is not voidable
        let void = f.machine.void_sale("biz-1", &sale.id, &key()).await.unwrap();
        let err = f.machine.void_sale("biz-1", &void.id, &key()).await.unwrap_err();
        assert!(matches!(err, FiscalError::InvalidVoidTarget { .. }));
    }

    #[tokio::test]
    async fn test_transient_void_resumes_same_document() {
        let f = setup().await;
        let sale = f.machine.create_sale("biz-1", &cart()).await.unwrap();
        let void_key = key();
        f.authority.script([Scripted::Transient("gateway timeout")]);

        let err = f.machine.void_sale("biz-1", &sale.id, &void_key).await.unwrap_err();
        let void_id = err.document_id().unwrap().to_string();

        // The sale stays confirmed until the void is
        let still = f.machine.get_document("biz-1", &sale.id).await.unwrap();
        assert_eq!(still.status, DocumentStatus::Confirmed);

        // A different key cannot start a second void meanwhile
        let err = f.machine.void_sale("biz-1", &sale.id, &key()).await.unwrap_err();
        assert!(matches!(err, FiscalError::AlreadyVoided { .. }));

        let void = f.machine.void_sale("biz-1", &sale.id, &void_key).await.unwrap();
        assert_eq!(void.id, void_id);
        assert_eq!(void.status, DocumentStatus::Confirmed);
        assert_eq!(f.authority.cancel_calls(), 2);
        assert_eq!(f.db.receipts().voids_of("biz-1", &sale.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rejected_void_is_replayed() {
        let f = setup().await;
        let sale = f.machine.create_sale("biz-1", &cart()).await.unwrap();
        let void_key = key();
        f.authority.script([Scripted::Reject("sale not found at authority")]);

        let first = f.machine.void_sale("biz-1", &sale.id, &void_key).await.unwrap_err();
        let second = f.machine.void_sale("biz-1", &sale.id, &void_key).await.unwrap_err();

        assert!(matches!(first, FiscalError::Rejected { .. }));
        assert_eq!(first.to_string(), second.to_string());
        assert_eq!(f.authority.cancel_calls(), 1);

        // A final failure does not block a fresh attempt with a new key
        let void = f.machine.void_sale("biz-1", &sale.id, &key()).await.unwrap();
        assert_eq!(void.status, DocumentStatus::Confirmed);
    }
}
