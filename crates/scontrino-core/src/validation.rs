//! # Validation Module
//!
//! Input validation for cart lines, identifiers and search filters.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Merchant UI (external)                                       │
//! │  └── Immediate user feedback while editing the cart                    │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: THIS MODULE                                                  │
//! │  └── Business rules before anything is persisted or sent to AdE        │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (SQLite)                                            │
//! │  ├── CHECK constraints on status / kind                                │
//! │  └── UNIQUE constraints (live VOID per SALE, idempotency key)          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::error::ValidationError;
use crate::{
    MAX_CART_LINES, MAX_DESCRIPTION_LEN, MAX_LINE_QUANTITY, MAX_PRICE_SCALE, MAX_QUANTITY_SCALE,
    MAX_UNIT_PRICE,
};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Maximum length of a progressive search fragment.
const MAX_PROGRESSIVE_QUERY_LEN: usize = 50;

// =============================================================================
// Cart Validators
// =============================================================================

/// Validates a line description.
///
/// ## Example
/// ```rust
/// use scontrino_core::validation::validate_description;
///
/// assert!(validate_description("Caffè").is_ok());
/// assert!(validate_description("   ").is_err());
/// ```
pub fn validate_description(description: &str) -> ValidationResult<()> {
    let description = description.trim();

    if description.is_empty() {
        return Err(ValidationError::required("description"));
    }

    if description.chars().count() > MAX_DESCRIPTION_LEN {
        return Err(ValidationError::TooLong {
            field: "description".to_string(),
            max: MAX_DESCRIPTION_LEN,
        });
    }

    Ok(())
}

/// Validates a line quantity.
///
/// ## Rules
/// - Must be strictly positive
/// - At most [`MAX_LINE_QUANTITY`]
/// - At most [`MAX_QUANTITY_SCALE`] decimal places (weighed goods)
pub fn validate_quantity(quantity: Decimal) -> ValidationResult<()> {
    if quantity <= Decimal::ZERO {
        return Err(ValidationError::MustBePositive {
            field: "quantity".to_string(),
        });
    }

    if quantity > Decimal::from(MAX_LINE_QUANTITY) {
        return Err(ValidationError::OutOfRange {
            field: "quantity".to_string(),
            min: 0,
            max: MAX_LINE_QUANTITY,
        });
    }

    if quantity.normalize().scale() > MAX_QUANTITY_SCALE {
        return Err(ValidationError::TooPrecise {
            field: "quantity".to_string(),
            max: MAX_QUANTITY_SCALE,
        });
    }

    Ok(())
}

/// Validates a VAT-inclusive unit price.
///
/// ## Rules
/// - Must be non-negative (zero is allowed: omaggi)
/// - At most [`MAX_UNIT_PRICE`] euros
/// - At most [`MAX_PRICE_SCALE`] decimal places
///
/// ## Example
/// ```rust
/// use rust_decimal::Decimal;
/// use scontrino_core::validation::validate_unit_price;
///
/// assert!(validate_unit_price(Decimal::new(120, 2)).is_ok());  // €1.20
/// assert!(validate_unit_price(Decimal::ZERO).is_ok());         // free item
/// assert!(validate_unit_price(Decimal::new(-1, 0)).is_err());
/// assert!(validate_unit_price(Decimal::new(100_000_000, 2)).is_err()); // €1,000,000.00
/// ```
pub fn validate_unit_price(price: Decimal) -> ValidationResult<()> {
    if price < Decimal::ZERO {
        return Err(ValidationError::MustNotBeNegative {
            field: "gross_unit_price".to_string(),
        });
    }

    if price > Decimal::from(MAX_UNIT_PRICE) {
        return Err(ValidationError::OutOfRange {
            field: "gross_unit_price".to_string(),
            min: 0,
            max: MAX_UNIT_PRICE,
        });
    }

    if price.normalize().scale() > MAX_PRICE_SCALE {
        return Err(ValidationError::TooPrecise {
            field: "gross_unit_price".to_string(),
            max: MAX_PRICE_SCALE,
        });
    }

    Ok(())
}

/// Validates the number of lines on a receipt.
pub fn validate_cart_size(lines: usize) -> ValidationResult<()> {
    if lines == 0 {
        return Err(ValidationError::required("cart lines"));
    }

    if lines > MAX_CART_LINES {
        return Err(ValidationError::OutOfRange {
            field: "cart lines".to_string(),
            min: 1,
            max: MAX_CART_LINES as i64,
        });
    }

    Ok(())
}

// =============================================================================
// Identifier Validators
// =============================================================================

/// Validates a UUID string (document ids, idempotency keys).
///
/// ## Example
/// ```rust
/// use scontrino_core::validation::validate_uuid;
///
/// assert!(validate_uuid("idempotency_key", "550e8400-e29b-41d4-a716-446655440000").is_ok());
/// assert!(validate_uuid("idempotency_key", "not-a-uuid").is_err());
/// ```
pub fn validate_uuid(field: &str, id: &str) -> ValidationResult<()> {
    if id.trim().is_empty() {
        return Err(ValidationError::required(field));
    }

    uuid::Uuid::parse_str(id).map_err(|_| ValidationError::InvalidFormat {
        field: field.to_string(),
        reason: "must be a valid UUID".to_string(),
    })?;

    Ok(())
}

// =============================================================================
// Search Validators
// =============================================================================

/// Validates and normalizes a progressive search fragment.
///
/// Returns `None` for an empty fragment (no filter).
pub fn validate_progressive_query(query: Option<&str>) -> ValidationResult<Option<String>> {
    let Some(query) = query.map(str::trim) else {
        return Ok(None);
    };

    if query.is_empty() {
        return Ok(None);
    }

    if query.len() > MAX_PROGRESSIVE_QUERY_LEN {
        return Err(ValidationError::TooLong {
            field: "progressivo".to_string(),
            max: MAX_PROGRESSIVE_QUERY_LEN,
        });
    }

    Ok(Some(query.to_string()))
}

/// Validates an inclusive calendar-day range.
pub fn validate_date_range(from: Option<NaiveDate>, to: Option<NaiveDate>) -> ValidationResult<()> {
    if let (Some(from), Some(to)) = (from, to) {
        if from > to {
            return Err(ValidationError::InvalidFormat {
                field: "dateFrom".to_string(),
                reason: format!("{} is after dateTo {}", from, to),
            });
        }
    }

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================
