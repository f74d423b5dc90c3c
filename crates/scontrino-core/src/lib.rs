//! # scontrino-core: Pure Business Logic for Scontrino
//!
//! Everything that can be decided without touching a database or the fiscal
//! authority lives here: money math, VAT codes, the receipt document model,
//! the document lifecycle table and the cart calculator.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Scontrino Architecture                           │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │          Merchant UI / API layer (external collaborator)        │   │
//! │  │      cart widget ──► "emetti scontrino" ──► storico scontrini   │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │   scontrino-fiscal: state machine, idempotency, reconciliation  │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ scontrino-core (THIS CRATE) ★                   │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │   money   │  │   cart    │  │ validation│  │   │
//! │  │   │ Document  │  │   Money   │  │ Calculator│  │   rules   │  │   │
//! │  │   │ Status    │  │  VatRate  │  │ Breakdown │  │  checks   │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (ReceiptDocument, DocumentStatus, VatCode, ...)
//! - [`money`] - Money type with integer arithmetic (euro cents)
//! - [`cart`] - Cart calculator: cart lines → line snapshots, total, VAT breakdown
//! - [`error`] - Domain error types
//! - [`validation`] - Business rule validation
//!
//! ## Example Usage
//!
//! ```rust
//! use rust_decimal::Decimal;
//! use scontrino_core::cart::CartCalculator;
//! use scontrino_core::types::CartLine;
//!
//! let lines = vec![
//!     CartLine::new("Caffè", Decimal::ONE, Decimal::new(120, 2), "22%"),
//!     CartLine::new("Acqua", Decimal::TWO, Decimal::new(50, 2), "10%"),
//! ];
//!
//! let totals = CartCalculator::calculate(&lines).unwrap();
//! assert_eq!(totals.total.cents(), 220);
//! ```

pub mod cart;
pub mod error;
pub mod money;
pub mod types;
pub mod validation;

pub use cart::{CartCalculator, CartTotals, VatBreakdown};
pub use error::{CoreError, CoreResult, ValidationError};
pub use money::Money;
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Maximum lines allowed on a single receipt.
pub const MAX_CART_LINES: usize = 100;

/// Maximum quantity on a single line.
///
/// ## Business Reason
/// Catches typos such as 10000 instead of 1.0000 on a weighed item.
pub const MAX_LINE_QUANTITY: i64 = 9999;

/// Maximum VAT-inclusive unit price, in whole euros.
///
/// Bounds every cart total well inside `i64` cents.
pub const MAX_UNIT_PRICE: i64 = 999_999;

/// Decimal places accepted on a quantity (grams on weighed goods).
pub const MAX_QUANTITY_SCALE: u32 = 3;

/// Decimal places accepted on a unit price (euro cents).
pub const MAX_PRICE_SCALE: u32 = 2;

/// Maximum length of a line description.
pub const MAX_DESCRIPTION_LEN: usize = 200;
