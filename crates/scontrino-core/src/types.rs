//! # Domain Types
//!
//! Core domain types used throughout Scontrino.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌──────────────────────┐   ┌─────────────────┐  │
//! │  │    CartLine     │   │   ReceiptDocument    │   │ ReceiptLineItem │  │
//! │  │  ─────────────  │   │  ──────────────────  │   │  ─────────────  │  │
//! │  │  description    │──►│  id, business_id     │◄──│  description    │  │
//! │  │  quantity (dec) │   │  kind  SALE | VOID   │   │  quantity "1.5" │  │
//! │  │  gross price    │   │  status              │   │  price "1.20"   │  │
//! │  │  vat_code       │   │  ade_progressive     │   │  vat_code "22%" │  │
//! │  │  (ephemeral)    │   │  submission_token    │   │  (immutable)    │  │
//! │  └─────────────────┘   └──────────────────────┘   └─────────────────┘  │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌──────────────────────┐                        │
//! │  │    VatCode      │   │   DocumentStatus     │                        │
//! │  │  22% 10% 5% 4%  │   │  Pending → Submitted │                        │
//! │  │  N1 … N6        │   │  → Confirmed|Failed  │                        │
//! │  └─────────────────┘   │  Confirmed → Voided  │                        │
//! │                        └──────────────────────┘                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::money::Money;

// =============================================================================
// VAT Rate
// =============================================================================

/// VAT rate represented in basis points (bps).
///
/// 2200 bps = 22% (aliquota ordinaria).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct VatRate(u32);

impl VatRate {
    /// Creates a VAT rate from basis points.
    #[inline]
    pub const fn from_bps(bps: u32) -> Self {
        VatRate(bps)
    }

    /// Returns the rate in basis points.
    #[inline]
    pub const fn bps(&self) -> u32 {
        self.0
    }

    /// Zero VAT rate.
    #[inline]
    pub const fn zero() -> Self {
        VatRate(0)
    }

    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

// =============================================================================
// VAT Code
// =============================================================================

/// VAT codes accepted by the authority on a sales receipt.
///
/// Rates carry VAT; the `N*` natures are zero-rated for different legal
/// reasons and must be reported separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub enum VatCode {
    #[serde(rename = "22%")]
    Vat22,
    #[serde(rename = "10%")]
    Vat10,
    #[serde(rename = "5%")]
    Vat5,
    #[serde(rename = "4%")]
    Vat4,
    /// Escluse ex art. 15
    N1,
    /// Non soggette
    N2,
    /// Non imponibili
    N3,
    /// Esenti
    N4,
    /// Regime del margine
    N5,
    /// Inversione contabile
    N6,
}

impl VatCode {
    /// Every code, in the order the authority lists them.
    pub const ALL: [VatCode; 10] = [
        VatCode::Vat22,
        VatCode::Vat10,
        VatCode::Vat5,
        VatCode::Vat4,
        VatCode::N1,
        VatCode::N2,
        VatCode::N3,
        VatCode::N4,
        VatCode::N5,
        VatCode::N6,
    ];

    /// Canonical string form, as stored on a [`ReceiptLineItem`].
    pub const fn as_str(&self) -> &'static str {
        match self {
            VatCode::Vat22 => "22%",
            VatCode::Vat10 => "10%",
            VatCode::Vat5 => "5%",
            VatCode::Vat4 => "4%",
            VatCode::N1 => "N1",
            VatCode::N2 => "N2",
            VatCode::N3 => "N3",
            VatCode::N4 => "N4",
            VatCode::N5 => "N5",
            VatCode::N6 => "N6",
        }
    }

    /// The VAT rate applied under this code.
    pub const fn rate(&self) -> VatRate {
        match self {
            VatCode::Vat22 => VatRate::from_bps(2200),
            VatCode::Vat10 => VatRate::from_bps(1000),
            VatCode::Vat5 => VatRate::from_bps(500),
            VatCode::Vat4 => VatRate::from_bps(400),
            _ => VatRate::zero(),
        }
    }
}

impl fmt::Display for VatCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VatCode {
    type Err = ValidationError;

    /// Accepts `"22%"`, `"22"`, `" n4 "` and friends.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().trim_end_matches('%').trim().to_uppercase();

        let code = match normalized.as_str() {
            "22" => VatCode::Vat22,
            "10" => VatCode::Vat10,
            "5" => VatCode::Vat5,
            "4" => VatCode::Vat4,
            "N1" => VatCode::N1,
            "N2" => VatCode::N2,
            "N3" => VatCode::N3,
            "N4" => VatCode::N4,
            "N5" => VatCode::N5,
            "N6" => VatCode::N6,
            _ => {
                return Err(ValidationError::NotAllowed {
                    field: "vat_code".to_string(),
                    allowed: VatCode::ALL.iter().map(|c| c.as_str().to_string()).collect(),
                })
            }
        };

        Ok(code)
    }
}

// =============================================================================
// Cart Line
// =============================================================================

/// One line of the in-progress cart, as produced by the UI.
///
/// Never persisted on its own: it is flattened into a [`ReceiptLineItem`]
/// when the document is created.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
    pub description: String,
    #[ts(as = "String")]
    pub quantity: Decimal,
    /// Unit price, VAT included.
    #[ts(as = "String")]
    pub gross_unit_price: Decimal,
    /// Raw code from the UI; parsed (and possibly rejected) by the calculator.
    pub vat_code: String,
}

impl CartLine {
    pub fn new(
        description: impl Into<String>,
        quantity: Decimal,
        gross_unit_price: Decimal,
        vat_code: impl Into<String>,
    ) -> Self {
        CartLine {
            description: description.into(),
            quantity,
            gross_unit_price,
            vat_code: vat_code.into(),
        }
    }
}

// =============================================================================
// Receipt Line Item
// =============================================================================

/// Immutable snapshot of a cart line at document creation.
///
/// Decimals are kept as strings so that what was sent to the authority is
/// exactly what is stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptLineItem {
    pub description: String,
    pub quantity: String,
    pub gross_unit_price: String,
    pub vat_code: String,
}

impl ReceiptLineItem {
    /// Parses the stored quantity.
    pub fn quantity(&self) -> CoreResult<Decimal> {
        parse_stored_decimal("quantity", &self.quantity)
    }

    /// Parses the stored gross unit price.
    pub fn gross_unit_price(&self) -> CoreResult<Decimal> {
        parse_stored_decimal("gross_unit_price", &self.gross_unit_price)
    }

    /// Parses the stored VAT code.
    pub fn vat_code(&self) -> CoreResult<VatCode> {
        self.vat_code
            .parse()
            .map_err(|e: ValidationError| CoreError::CorruptLine(e.to_string()))
    }
}

fn parse_stored_decimal(field: &str, raw: &str) -> CoreResult<Decimal> {
    Decimal::from_str(raw)
        .map_err(|e| CoreError::CorruptLine(format!("{} '{}': {}", field, raw, e)))
}

// =============================================================================
// Document Kind
// =============================================================================

/// Whether a document records a sale or cancels one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentKind {
    Sale,
    Void,
}

impl DocumentKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::Sale => "sale",
            DocumentKind::Void => "void",
        }
    }
}

// =============================================================================
// Document Status
// =============================================================================

/// Lifecycle status of a fiscal document.
///
/// ## Transition Table
/// ```text
/// ┌─────────────────────────────────────────────────────────────────────────┐
/// │                                                                         │
/// │   PENDING ──► SUBMITTED ──┬──► CONFIRMED ──► VOIDED   (SALE only, when │
/// │                  ▲        │                            its VOID is      │
/// │                  │        └──► FAILED                  confirmed)       │
/// │                  │               │                                      │
/// │                  └───────────────┘  retry (retryable failures only)     │
/// │                                                                         │
/// │   No transition ever leaves CONFIRMED (except SALE → VOIDED) or VOIDED │
/// └─────────────────────────────────────────────────────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentStatus {
    /// Persisted locally, not yet sent to the authority.
    Pending,
    /// Sent (or being sent) to the authority; outcome unknown.
    Submitted,
    /// Accepted by the authority; has a progressive number.
    Confirmed,
    /// Refused or not reachable; see `retryable`.
    Failed,
    /// SALE whose VOID has been confirmed.
    Voided,
}

impl DocumentStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Pending => "pending",
            DocumentStatus::Submitted => "submitted",
            DocumentStatus::Confirmed => "confirmed",
            DocumentStatus::Failed => "failed",
            DocumentStatus::Voided => "voided",
        }
    }

    /// Checks a transition against the lifecycle table.
    pub fn can_transition_to(&self, next: DocumentStatus, kind: DocumentKind) -> bool {
        use DocumentStatus::*;

        match (self, next) {
            (Pending, Submitted) => true,
            (Submitted, Confirmed) | (Submitted, Failed) => true,
            (Failed, Submitted) => true,
            (Confirmed, Voided) => kind == DocumentKind::Sale,
            _ => false,
        }
    }

    /// True once the document has reached the authority's books for good.
    pub const fn is_terminal(&self) -> bool {
        matches!(self, DocumentStatus::Confirmed | DocumentStatus::Voided)
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Receipt Document
// =============================================================================

/// A fiscal document: the central entity.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ReceiptDocument {
    pub id: String,
    /// Owning merchant; every access is scoped to it.
    pub business_id: String,
    pub kind: DocumentKind,
    pub status: DocumentStatus,
    /// Set together with `ade_transaction_id`, once, on confirmation.
    pub ade_progressive: Option<String>,
    pub ade_transaction_id: Option<String>,
    pub lines: Vec<ReceiptLineItem>,
    /// Derived from `lines`; never stored.
    pub total: Money,
    /// Sent on every submit/cancel attempt so the authority can deduplicate.
    pub submission_token: String,
    /// Submission attempts so far.
    pub attempts: i64,
    /// Meaningful only when `status == Failed`.
    pub retryable: bool,
    pub failure_reason: Option<String>,
    /// VOID only: the SALE being cancelled.
    pub void_of_document_id: Option<String>,
    /// VOID only: the client key that requested it.
    pub idempotency_key: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl ReceiptDocument {
    /// Builds a new PENDING sale from already-validated line snapshots.
    pub fn new_sale(
        business_id: impl Into<String>,
        lines: Vec<ReceiptLineItem>,
        total: Money,
        now: DateTime<Utc>,
    ) -> Self {
        ReceiptDocument {
            id: Uuid::new_v4().to_string(),
            business_id: business_id.into(),
            kind: DocumentKind::Sale,
            status: DocumentStatus::Pending,
            ade_progressive: None,
            ade_transaction_id: None,
            lines,
            total,
            submission_token: Uuid::new_v4().to_string(),
            attempts: 0,
            retryable: false,
            failure_reason: None,
            void_of_document_id: None,
            idempotency_key: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Builds a new PENDING void for `sale`.
    ///
    /// The void repeats the sale's lines: the authority cancels whole
    /// documents, never single lines.
    pub fn new_void(
        sale: &ReceiptDocument,
        idempotency_key: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        ReceiptDocument {
            id: Uuid::new_v4().to_string(),
            business_id: sale.business_id.clone(),
            kind: DocumentKind::Void,
            status: DocumentStatus::Pending,
            ade_progressive: None,
            ade_transaction_id: None,
            lines: sale.lines.clone(),
            total: sale.total,
            submission_token: Uuid::new_v4().to_string(),
            attempts: 0,
            retryable: false,
            failure_reason: None,
            void_of_document_id: Some(sale.id.clone()),
            idempotency_key: Some(idempotency_key.into()),
            created_at: now,
            updated_at: now,
        }
    }

    #[inline]
    pub fn is_confirmed(&self) -> bool {
        self.status == DocumentStatus::Confirmed
    }

    /// FAILED with an unknown outcome: safe to resubmit with the same token.
    #[inline]
    pub fn is_retryable_failure(&self) -> bool {
        self.status == DocumentStatus::Failed && self.retryable
    }

    /// Checks `next` against the lifecycle table for this document.
    pub fn check_transition(&self, next: DocumentStatus) -> CoreResult<()> {
        if self.status.can_transition_to(next, self.kind) {
            Ok(())
        } else {
            Err(CoreError::InvalidTransition {
                document_id: self.id.clone(),
                from: self.status.to_string(),
                to: next.to_string(),
            })
        }
    }
}

// =============================================================================
// Idempotency Record
// =============================================================================

/// State of an idempotency claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum IdempotencyState {
    /// The first request holding this key is still running.
    InFlight,
    /// The outcome is cached in `result`.
    Completed,
}

/// One client-supplied idempotency key, scoped to a business.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub business_id: String,
    pub idempotency_key: String,
    /// Fingerprint of the guarded operation, e.g. `void:<document id>`.
    pub operation: String,
    pub state: IdempotencyState,
    /// Identifies the request currently holding the claim.
    pub claim_token: String,
    /// Serialized outcome once completed.
    pub result: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// Search Types
// =============================================================================

/// Filters for the receipt history view. All filters are conjunctive.
#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct SearchFilters {
    /// Inclusive first calendar day (UTC) of `created_at`.
    #[ts(as = "Option<String>")]
    pub date_from: Option<NaiveDate>,
    /// Inclusive last calendar day (UTC) of `created_at`.
    #[ts(as = "Option<String>")]
    pub date_to: Option<NaiveDate>,
    /// Partial match on the authority progressive.
    pub progressivo: Option<String>,
    pub limit: Option<u32>,
}

/// One row of the receipt history.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptListItem {
    pub id: String,
    pub kind: DocumentKind,
    pub status: DocumentStatus,
    pub ade_progressive: Option<String>,
    pub ade_transaction_id: Option<String>,
    pub total: Money,
    pub void_of_document_id: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

impl From<&ReceiptDocument> for ReceiptListItem {
    fn from(doc: &ReceiptDocument) -> Self {
        ReceiptListItem {
            id: doc.id.clone(),
            kind: doc.kind,
            status: doc.status,
            ade_progressive: doc.ade_progressive.clone(),
            ade_transaction_id: doc.ade_transaction_id.clone(),
            total: doc.total,
            void_of_document_id: doc.void_of_document_id.clone(),
            created_at: doc.created_at,
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
