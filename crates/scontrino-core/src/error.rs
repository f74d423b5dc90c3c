//! # Error Types
//!
//! Domain-specific error types for scontrino-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  scontrino-core errors (this file)                                     │
//! │  ├── CoreError        - Cart and document rule violations              │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  scontrino-db errors (separate crate)                                  │
//! │  └── DbError          - Database operation failures                    │
//! │                                                                         │
//! │  scontrino-fiscal errors                                               │
//! │  ├── FiscalError      - Lifecycle taxonomy (rejected, transient, ...)  │
//! │  └── ApiError         - What the UI layer sees (serialized)            │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → FiscalError → ApiError → UI       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Core business logic errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The cart cannot become a fiscal document.
    ///
    /// ## When This Occurs
    /// - Cart is empty
    /// - A quantity is zero or negative, or a price is negative
    /// - A VAT code is not one the authority accepts
    ///
    /// Not retryable; the merchant has to fix the cart.
    #[error("Invalid cart: {0}")]
    InvalidCart(ValidationError),

    /// A document status change not allowed by the lifecycle table.
    #[error("Document {document_id} cannot move from {from} to {to}")]
    InvalidTransition {
        document_id: String,
        from: String,
        to: String,
    },

    /// A stored line could not be read back as a fixed-point decimal.
    #[error("Corrupt receipt line: {0}")]
    CorruptLine(String),

    /// Validation error outside of cart input (ids, search filters).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Value must not be negative.
    #[error("{field} must not be negative")]
    MustNotBeNegative { field: String },

    /// Too many decimal places.
    #[error("{field} allows at most {max} decimal places")]
    TooPrecise { field: String, max: u32 },

    /// Invalid format (e.g., invalid UUID, invalid date).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Value is not in allowed set.
    #[error("{field} must be one of: {allowed:?}")]
    NotAllowed { field: String, allowed: Vec<String> },
}

impl ValidationError {
    /// Shorthand for [`ValidationError::Required`].
    pub fn required(field: impl Into<String>) -> Self {
        ValidationError::Required {
            field: field.into(),
        }
    }
}

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CoreError::InvalidCart(ValidationError::required("cart lines"));
        assert_eq!(err.to_string(), "Invalid cart: cart lines is required");

        let err = CoreError::InvalidTransition {
            document_id: "doc-1".to_string(),
            from: "confirmed".to_string(),
            to: "submitted".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Document doc-1 cannot move from confirmed to submitted"
        );
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let core_err: CoreError = ValidationError::required("id").into();
        assert!(matches!(core_err, CoreError::Validation(_)));
    }
}
