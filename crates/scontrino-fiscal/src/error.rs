//! # Fiscal Error Types
//!
//! The error taxonomy of the receipt lifecycle.
//!
//! ## Error Categories
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Fiscal Error Categories                            │
//! │                                                                         │
//! │  ┌─────────────────────┐  ┌──────────────────────┐  ┌────────────────┐ │
//! │  │  Caller input       │  │  Business rules      │  │  Authority     │ │
//! │  │                     │  │                      │  │                │ │
//! │  │  InvalidCart        │  │  InvalidVoidTarget   │  │  Rejected      │ │
//! │  │  Validation         │  │  AlreadyVoided       │  │  Transient  ⟳  │ │
//! │  │  DocumentNotFound   │  │  NotRetryable        │  │                │ │
//! │  │  IdempotencyKey-    │  │                      │  │                │ │
//! │  │    Conflict         │  │                      │  │                │ │
//! │  └─────────────────────┘  └──────────────────────┘  └────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────────┐  ┌──────────────────────┐                     │
//! │  │  Concurrency        │  │  Infrastructure      │   ⟳ = retryable     │
//! │  │  ConcurrentRetry ⟳  │  │  Persistence, Config │                     │
//! │  └─────────────────────┘  └──────────────────────┘                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Errors are `Serialize`/`Deserialize` so that a definitive outcome can be
//! cached under an idempotency key and replayed verbatim.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use ts_rs::TS;

use scontrino_core::{CoreError, ValidationError};
use scontrino_db::DbError;

/// Result type alias for fiscal operations.
pub type FiscalResult<T> = Result<T, FiscalError>;

/// Everything that can go wrong while creating, voiding, retrying or
/// searching receipts.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
pub enum FiscalError {
    // =========================================================================
    // Caller Input
    // =========================================================================
    /// The cart cannot become a fiscal document. Nothing was persisted.
    #[error("Invalid cart: {0}")]
    InvalidCart(String),

    /// Malformed identifier, key or search filter.
    #[error("Validation error: {0}")]
    Validation(String),

    /// No document with this id for this business.
    #[error("Document not found: {document_id}")]
    DocumentNotFound { document_id: String },

    /// The idempotency key was already used for a different operation.
    #[error("Idempotency key {idempotency_key} was used for a different request")]
    IdempotencyKeyConflict { idempotency_key: String },

    // =========================================================================
    // Business Rules
    // =========================================================================
    /// The VOID target is missing, foreign, not a SALE or not CONFIRMED.
    #[error("Document {document_id} cannot be voided: {reason}")]
    InvalidVoidTarget { document_id: String, reason: String },

    /// The SALE already has a VOID (confirmed or still in progress).
    #[error("Document {document_id} is already voided")]
    AlreadyVoided { document_id: String },

    /// Only FAILED documents with a retryable failure can be resubmitted.
    #[error("Document {document_id} cannot be retried in status {status}")]
    NotRetryable { document_id: String, status: String },

    // =========================================================================
    // Concurrency
    // =========================================================================
    /// Another request is working on the same key or document right now.
    #[error("Another request is already processing {resource}")]
    ConcurrentRetry { resource: String },

    // =========================================================================
    // Authority Outcomes
    // =========================================================================
    /// The authority definitively refused the document.
    #[error("Authority rejected document {document_id}: {reason}")]
    Rejected { document_id: String, reason: String },

    /// Outcome unknown (timeout, network, authority unavailable).
    /// The document is FAILED(retryable) and keeps its submission token.
    #[error("Document {document_id} is pending retry: {reason}")]
    Transient { document_id: String, reason: String },

    // =========================================================================
    // Infrastructure
    // =========================================================================
    /// Storage failure. Details are logged, never shown to the merchant.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Invalid or unreadable configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Machine-readable error codes for the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidCart,
    ValidationError,
    NotFound,
    IdempotencyKeyConflict,
    InvalidVoidTarget,
    AlreadyVoided,
    NotRetryable,
    ConcurrentRetry,
    Rejected,
    /// Outcome unknown; the receipt will be retried.
    PendingRetry,
    DatabaseError,
    Internal,
}

// =============================================================================
// Error Categorization
// =============================================================================

impl FiscalError {
    /// Returns true if repeating the same request may succeed.
    ///
    /// ## Retryable Errors
    /// - `Transient`: same document, same submission token
    /// - `ConcurrentRetry`: once the in-flight request completes
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FiscalError::Transient { .. } | FiscalError::ConcurrentRetry { .. }
        )
    }

    /// Returns true if this outcome is final for the request that produced
    /// it and may be replayed to a client retrying with the same key.
    pub fn is_definitive(&self) -> bool {
        !matches!(
            self,
            FiscalError::Transient { .. }
                | FiscalError::ConcurrentRetry { .. }
                | FiscalError::Persistence(_)
                | FiscalError::Config(_)
        )
    }

    /// The document this error is about, if any.
    pub fn document_id(&self) -> Option<&str> {
        match self {
            FiscalError::DocumentNotFound { document_id }
            | FiscalError::InvalidVoidTarget { document_id, .. }
            | FiscalError::AlreadyVoided { document_id }
            | FiscalError::NotRetryable { document_id, .. }
            | FiscalError::Rejected { document_id, .. }
            | FiscalError::Transient { document_id, .. } => Some(document_id),
            _ => None,
        }
    }

    /// The code reported to the UI.
    pub fn code(&self) -> ErrorCode {
        match self {
            FiscalError::InvalidCart(_) => ErrorCode::InvalidCart,
            FiscalError::Validation(_) => ErrorCode::ValidationError,
            FiscalError::DocumentNotFound { .. } => ErrorCode::NotFound,
            FiscalError::IdempotencyKeyConflict { .. } => ErrorCode::IdempotencyKeyConflict,
            FiscalError::InvalidVoidTarget { .. } => ErrorCode::InvalidVoidTarget,
            FiscalError::AlreadyVoided { .. } => ErrorCode::AlreadyVoided,
            FiscalError::NotRetryable { .. } => ErrorCode::NotRetryable,
            FiscalError::ConcurrentRetry { .. } => ErrorCode::ConcurrentRetry,
            FiscalError::Rejected { .. } => ErrorCode::Rejected,
            FiscalError::Transient { .. } => ErrorCode::PendingRetry,
            FiscalError::Persistence(_) => ErrorCode::DatabaseError,
            FiscalError::Config(_) => ErrorCode::Internal,
        }
    }

    pub(crate) fn invalid_void_target(document_id: &str, reason: impl Into<String>) -> Self {
        FiscalError::InvalidVoidTarget {
            document_id: document_id.to_string(),
            reason: reason.into(),
        }
    }
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<CoreError> for FiscalError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InvalidCart(e) => FiscalError::InvalidCart(e.to_string()),
            CoreError::Validation(e) => FiscalError::Validation(e.to_string()),
            // Lines were validated on the way in; unreadable ones mean the
            // stored data is damaged
            CoreError::CorruptLine(msg) => FiscalError::Persistence(msg),
            CoreError::InvalidTransition { .. } => FiscalError::Persistence(err.to_string()),
        }
    }
}

impl From<ValidationError> for FiscalError {
    fn from(err: ValidationError) -> Self {
        FiscalError::Validation(err.to_string())
    }
}

impl From<DbError> for FiscalError {
    fn from(err: DbError) -> Self {
        FiscalError::Persistence(err.to_string())
    }
}

impl From<std::io::Error> for FiscalError {
    fn from(err: std::io::Error) -> Self {
        FiscalError::Config(err.to_string())
    }
}

impl From<toml::de::Error> for FiscalError {
    fn from(err: toml::de::Error) -> Self {
        FiscalError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transient() -> FiscalError {
        FiscalError::Transient {
            document_id: "doc-1".into(),
            reason: "timeout".into(),
        }
    }

    #[test]
    fn test_retryable_errors() {
        assert!(transient().is_retryable());
        assert!(FiscalError::ConcurrentRetry {
            resource: "key-1".into()
        }
        .is_retryable());

        assert!(!FiscalError::InvalidCart("empty".into()).is_retryable());
        assert!(!FiscalError::Rejected {
            document_id: "doc-1".into(),
            reason: "malformed".into()
        }
        .is_retryable());
        assert!(!FiscalError::AlreadyVoided {
            document_id: "doc-1".into()
        }
        .is_retryable());
    }

    #[test]
    fn test_definitive_outcomes() {
        assert!(FiscalError::AlreadyVoided {
            document_id: "doc-1".into()
        }
        .is_definitive());
        assert!(FiscalError::Rejected {
            document_id: "doc-1".into(),
            reason: "malformed".into()
        }
        .is_definitive());

        assert!(!transient().is_definitive());
        assert!(!FiscalError::Persistence("disk full".into()).is_definitive());
    }

    #[test]
    fn test_codes_and_document_id() {
        assert_eq!(transient().code(), ErrorCode::PendingRetry);
        assert_eq!(transient().document_id(), Some("doc-1"));
        assert_eq!(
            FiscalError::InvalidCart("empty".into()).code(),
            ErrorCode::InvalidCart
        );
        assert!(FiscalError::InvalidCart("empty".into()).document_id().is_none());
    }

    #[test]
    fn test_core_error_conversion() {
        let err: FiscalError =
            CoreError::InvalidCart(ValidationError::required("cart lines")).into();
        assert!(matches!(err, FiscalError::InvalidCart(_)));
        assert_eq!(err.to_string(), "Invalid cart: cart lines is required");
    }

    #[test]
    fn test_round_trips_through_json() {
        let json = serde_json::to_string(&transient()).unwrap();
        let back: FiscalError = serde_json::from_str(&json).unwrap();
        assert_eq!(back.to_string(), transient().to_string());
    }
}
