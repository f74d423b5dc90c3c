//! # Receipt API
//!
//! The surface the merchant UI calls. Every operation returns a camelCase
//! payload or a tagged [`ApiError`]; nothing panics across this boundary.
//!
//! ## Error Handling Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Error Flow in Scontrino                              │
//! │                                                                         │
//! │  Frontend                    Rust Backend                               │
//! │  ────────                    ────────────                               │
//! │                                                                         │
//! │  emetti scontrino                                                       │
//! │         │                                                               │
//! │         ▼                                                               │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │  ReceiptApi::create_sale                                         │  │
//! │  │  Result<ReceiptResponse, ApiError>                               │  │
//! │  │         │                                                        │  │
//! │  │         ▼                                                        │  │
//! │  │  FiscalError::Transient ──► { code: "PENDING_RETRY",            │  │
//! │  │                               documentId: "..." }  ─────────────►│  │
//! │  │  FiscalError::Persistence ─► logged, generic message ───────────►│  │
//! │  │  Ok(doc) ──► { confirmed: true, adeProgressive: "..." } ────────►│  │
//! │  └──────────────────────────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use scontrino_core::{
    CartLine, DocumentKind, DocumentStatus, Money, ReceiptDocument, ReceiptLineItem,
    ReceiptListItem, SearchFilters,
};

use crate::error::{ErrorCode, FiscalError};
use crate::search::ReceiptSearchEngine;
use crate::state_machine::ReceiptStateMachine;

/// Result type alias for API calls.
pub type ApiResult<T> = Result<T, ApiError>;

// =============================================================================
// Responses
// =============================================================================

/// A receipt as the merchant sees it.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptResponse {
    pub id: String,
    pub kind: DocumentKind,
    pub status: DocumentStatus,
    /// Accepted by the authority (has a progressive number).
    pub confirmed: bool,
    /// Failed with an unknown outcome; `retry_submission` may be called.
    pub retry_available: bool,
    pub ade_progressive: Option<String>,
    pub ade_transaction_id: Option<String>,
    pub total: Money,
    pub lines: Vec<ReceiptLineItem>,
    pub void_of_document_id: Option<String>,
    pub failure_reason: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

impl From<ReceiptDocument> for ReceiptResponse {
    fn from(doc: ReceiptDocument) -> Self {
        ReceiptResponse {
            confirmed: doc.ade_progressive.is_some(),
            retry_available: doc.is_retryable_failure(),
            id: doc.id,
            kind: doc.kind,
            status: doc.status,
            ade_progressive: doc.ade_progressive,
            ade_transaction_id: doc.ade_transaction_id,
            total: doc.total,
            lines: doc.lines,
            void_of_document_id: doc.void_of_document_id,
            failure_reason: doc.failure_reason,
            created_at: doc.created_at,
        }
    }
}

// =============================================================================
// API Error
// =============================================================================

/// Error returned to the UI.
///
/// ## Serialization
/// ```json
/// {
///   "code": "PENDING_RETRY",
///   "message": "Document 7f3c… is pending retry: no response within 15s",
///   "documentId": "7f3c…"
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct ApiError {
    /// Machine-readable error code for programmatic handling
    pub code: ErrorCode,

    /// Human-readable error message for display
    pub message: String,

    /// The document the error concerns, when one exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
}

impl ApiError {
    /// Creates a new API error.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        ApiError {
            code,
            message: message.into(),
            document_id: None,
        }
    }
}

/// Converts fiscal errors to API errors.
///
/// Storage and configuration details are logged, never shown.
impl From<FiscalError> for ApiError {
    fn from(err: FiscalError) -> Self {
        let code = err.code();
        let document_id = err.document_id().map(str::to_string);

        let message = match &err {
            FiscalError::Persistence(detail) => {
                tracing::error!(error = %detail, "Persistence failure");
                "Database operation failed".to_string()
            }
            FiscalError::Config(detail) => {
                tracing::error!(error = %detail, "Configuration failure");
                "Internal error".to_string()
            }
            other => other.to_string(),
        };

        ApiError {
            code,
            message,
            document_id,
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{:?}] {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

// =============================================================================
// Receipt API
// =============================================================================

/// Entry point for the merchant UI.
#[derive(Clone)]
pub struct ReceiptApi {
    machine: Arc<ReceiptStateMachine>,
    search: ReceiptSearchEngine,
}

impl ReceiptApi {
    pub fn new(machine: Arc<ReceiptStateMachine>) -> Self {
        let search = ReceiptSearchEngine::new(machine.database().clone());
        ReceiptApi { machine, search }
    }

    /// Issues a receipt for the cart.
    pub async fn create_sale(
        &self,
        business_id: &str,
        lines: &[CartLine],
    ) -> ApiResult<ReceiptResponse> {
        let doc = self.machine.create_sale(business_id, lines).await?;
        Ok(doc.into())
    }

    /// Voids a confirmed receipt. Safe to call again with the same key.
    pub async fn void_sale(
        &self,
        business_id: &str,
        document_id: &str,
        idempotency_key: &str,
    ) -> ApiResult<ReceiptResponse> {
        let doc = self
            .machine
            .void_sale(business_id, document_id, idempotency_key)
            .await?;
        Ok(doc.into())
    }

    /// Resubmits a receipt whose outcome was unknown.
    pub async fn retry_submission(
        &self,
        business_id: &str,
        document_id: &str,
    ) -> ApiResult<ReceiptResponse> {
        let doc = self.machine.retry_submission(business_id, document_id).await?;
        Ok(doc.into())
    }

    pub async fn get_receipt(
        &self,
        business_id: &str,
        document_id: &str,
    ) -> ApiResult<ReceiptResponse> {
        let doc = self.machine.get_document(business_id, document_id).await?;
        Ok(doc.into())
    }

    /// Receipt history, newest first.
    pub async fn search(
        &self,
        business_id: &str,
        filters: &SearchFilters,
    ) -> ApiResult<Vec<ReceiptListItem>> {
        Ok(self.search.search(business_id, filters).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FiscalConfig;
    use crate::testing::{Scripted, ScriptedAuthority};
    use rust_decimal_macros::dec;
    use scontrino_db::{Database, DbConfig};

    async fn setup() -> (ReceiptApi, Arc<ScriptedAuthority>) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let authority = Arc::new(ScriptedAuthority::new());
        let machine = ReceiptStateMachine::new(db, authority.clone(), &FiscalConfig::default());
        (ReceiptApi::new(Arc::new(machine)), authority)
    }

    fn cart() -> Vec<CartLine> {
        vec![CartLine::new("Pizza margherita", dec!(1), dec!(7.50), "10%")]
    }

    #[tokio::test]
    async fn test_confirmed_receipt_response() {
        let (api, _authority) = setup().await;

        let receipt = api.create_sale("biz-1", &cart()).await.unwrap();
        assert!(receipt.confirmed);
        assert!(!receipt.retry_available);

        let json = serde_json::to_value(&receipt).unwrap();
        assert_eq!(json["status"], "CONFIRMED");
        assert_eq!(json["adeProgressive"], "DCW2024/0001");
        assert_eq!(json["retryAvailable"], false);
    }

    #[tokio::test]
    async fn test_pending_retry_is_distinguishable() {
        let (api, authority) = setup().await;
        authority.script([Scripted::Transient("timeout")]);

        let err = api.create_sale("biz-1", &cart()).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::PendingRetry);
        let document_id = err.document_id.clone().unwrap();

        let receipt = api.get_receipt("biz-1", &document_id).await.unwrap();
        assert!(!receipt.confirmed);
        assert!(receipt.retry_available);

        let receipt = api.retry_submission("biz-1", &document_id).await.unwrap();
        assert!(receipt.confirmed);
        assert_eq!(api.search("biz-1", &SearchFilters::default()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_tagged_errors() {
        let (api, _authority) = setup().await;

        let err = api.create_sale("biz-1", &[]).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidCart);
        assert!(err.document_id.is_none());

        let key = uuid::Uuid::new_v4().to_string();
        let err = api.void_sale("biz-1", "missing", &key).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidVoidTarget);

        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["code"], "INVALID_VOID_TARGET");
        assert_eq!(json["documentId"], "missing");
    }

    #[test]
    fn test_persistence_details_are_hidden() {
        let err: ApiError =
            FiscalError::Persistence("UNIQUE constraint failed: secret_table.col".into()).into();
        assert_eq!(err.code, ErrorCode::DatabaseError);
        assert_eq!(err.message, "Database operation failed");

        let json = serde_json::to_value(&err).unwrap();
        assert!(json.get("documentId").is_none());
    }
}
