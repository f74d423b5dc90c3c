//! # Cart Calculator
//!
//! Turns the merchant's cart into immutable line snapshots, a total and a VAT
//! breakdown. Pure: no clock, no I/O.
//!
//! ## Calculation Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  CartLine[]                                                             │
//! │     │                                                                   │
//! │     ├── empty / too many lines?          → InvalidCart                  │
//! │     ├── bad description / qty / price?   → InvalidCart                  │
//! │     ├── unknown VAT code?                → InvalidCart                  │
//! │     ▼                                                                   │
//! │  per line: gross = round2(quantity × gross_unit_price)                  │
//! │     │         (half away from zero, BEFORE summing)                     │
//! │     ▼                                                                   │
//! │  total = Σ gross            breakdown[vat_code] += gross                │
//! │                             vat = scorporo(gross, rate)                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::money::Money;
use crate::types::{CartLine, ReceiptLineItem, VatCode};
use crate::validation::{
    validate_cart_size, validate_description, validate_quantity, validate_unit_price,
};

/// Totals for one VAT code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct VatBreakdown {
    pub vat_code: VatCode,
    /// Sum of the rounded line amounts, VAT included.
    pub gross: Money,
    /// `gross - vat`
    pub taxable: Money,
    pub vat: Money,
}

/// Output of [`CartCalculator::calculate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct CartTotals {
    pub lines: Vec<ReceiptLineItem>,
    pub total: Money,
    pub vat_breakdown: Vec<VatBreakdown>,
}

/// Pure cart math.
#[derive(Debug, Clone, Copy, Default)]
pub struct CartCalculator;

impl CartCalculator {
    /// Validates the cart and computes snapshots, total and VAT breakdown.
    ///
    /// ## Example
    /// ```rust
    /// use rust_decimal::Decimal;
    /// use scontrino_core::cart::CartCalculator;
    /// use scontrino_core::types::CartLine;
    ///
    /// let totals = CartCalculator::calculate(&[
    ///     CartLine::new("Cornetto", Decimal::TWO, Decimal::new(130, 2), "10%"),
    /// ]).unwrap();
    ///
    /// assert_eq!(totals.total.cents(), 260);
    /// assert_eq!(totals.lines[0].gross_unit_price, "1.30");
    /// ```
    pub fn calculate(cart: &[CartLine]) -> CoreResult<CartTotals> {
        validate_cart_size(cart.len()).map_err(CoreError::InvalidCart)?;

        let mut lines = Vec::with_capacity(cart.len());
        let mut total = Money::zero();
        let mut grouped: Vec<(VatCode, Money)> = Vec::new();

        for line in cart {
            validate_description(&line.description).map_err(CoreError::InvalidCart)?;
            validate_quantity(line.quantity).map_err(CoreError::InvalidCart)?;
            validate_unit_price(line.gross_unit_price).map_err(CoreError::InvalidCart)?;
            let vat_code: VatCode = line.vat_code.parse().map_err(CoreError::InvalidCart)?;

            let gross = line_gross(line.quantity, line.gross_unit_price)
                .ok_or_else(|| CoreError::InvalidCart(amount_overflow()))?;

            total = total
                .checked_add(gross)
                .ok_or_else(|| CoreError::InvalidCart(amount_overflow()))?;
            match grouped.iter_mut().find(|(code, _)| *code == vat_code) {
                Some((_, sum)) => {
                    *sum = sum
                        .checked_add(gross)
                        .ok_or_else(|| CoreError::InvalidCart(amount_overflow()))?;
                }
                None => grouped.push((vat_code, gross)),
            }

            lines.push(ReceiptLineItem {
                description: line.description.trim().to_string(),
                quantity: line.quantity.normalize().to_string(),
                gross_unit_price: price_string(line.gross_unit_price),
                vat_code: vat_code.as_str().to_string(),
            });
        }

        let vat_breakdown = grouped
            .into_iter()
            .map(|(vat_code, gross)| {
                let vat = gross.vat_portion(vat_code.rate());
                VatBreakdown {
                    vat_code,
                    gross,
                    taxable: gross - vat,
                    vat,
                }
            })
            .collect();

        Ok(CartTotals {
            lines,
            total,
            vat_breakdown,
        })
    }
}

/// Recomputes a document total from its stored line snapshots.
///
/// Uses exactly the same per-line rounding as [`CartCalculator::calculate`],
/// so a stored document always reports the total it was created with.
pub fn receipt_total(lines: &[ReceiptLineItem]) -> CoreResult<Money> {
    let mut total = Money::zero();

    for line in lines {
        let gross = line_gross(line.quantity()?, line.gross_unit_price()?).ok_or_else(|| {
            CoreError::CorruptLine(format!("amount out of range on '{}'", line.description))
        })?;
        total = total
            .checked_add(gross)
            .ok_or_else(|| CoreError::CorruptLine("receipt total out of range".to_string()))?;
    }

    Ok(total)
}

/// `quantity × price`, rounded to cents half away from zero.
fn line_gross(quantity: Decimal, price: Decimal) -> Option<Money> {
    quantity.checked_mul(price).and_then(Money::from_decimal)
}

/// Prices are always snapshotted with two decimals: "1.2" → "1.20".
fn price_string(price: Decimal) -> String {
    let mut normalized = price.normalize();
    normalized.rescale(2);
    normalized.to_string()
}

fn amount_overflow() -> ValidationError {
    ValidationError::OutOfRange {
        field: "line amount".to_string(),
        min: 0,
        max: i64::MAX / 100,
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
