//! # Money Module
//!
//! Provides the `Money` type for euro amounts.
//!
//! ## Why Integer Money?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  THE FLOATING POINT PROBLEM                                             │
//! │                                                                         │
//! │    0.1 + 0.2 = 0.30000000000000004  ❌                                  │
//! │                                                                         │
//! │  OUR SOLUTION                                                           │
//! │    Cart input  → rust_decimal (exact fixed point)                       │
//! │    Line amount → rounded to 2 places, half away from zero               │
//! │    Everything after that → integer cents                                │
//! │                                                                         │
//! │  The authority reports amounts at cent granularity, so once a line is  │
//! │  rounded we never need more precision than an i64 of cents.            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use scontrino_core::money::Money;
//!
//! let price = Money::from_cents(120); // €1.20
//! let total = price + Money::from_cents(100);
//! assert_eq!(total.to_string(), "€2.20");
//! ```

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Sub, SubAssign};
use ts_rs::TS;

use crate::types::VatRate;

// =============================================================================
// Money Type
// =============================================================================

/// A euro amount in cents.
///
/// ## Design Decisions
/// - **i64 (signed)**: a VOID can be reported as a negative amount
/// - **Single field tuple struct**: Zero-cost abstraction over i64
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Money(i64);

impl Money {
    /// Creates a Money value from cents.
    #[inline]
    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    /// Rounds a decimal euro amount to cents, half away from zero.
    ///
    /// Returns `None` if the amount does not fit in an `i64` of cents.
    ///
    /// ## Example
    /// ```rust
    /// use rust_decimal::Decimal;
    /// use scontrino_core::money::Money;
    ///
    /// // 0.125 → 0.13 (not 0.12 as bankers rounding would give)
    /// let m = Money::from_decimal(Decimal::new(125, 3)).unwrap();
    /// assert_eq!(m.cents(), 13);
    /// ```
    pub fn from_decimal(amount: Decimal) -> Option<Self> {
        let rounded = amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
        rounded
            .checked_mul(Decimal::ONE_HUNDRED)
            .and_then(|cents| cents.to_i64())
            .map(Money)
    }

    /// Returns the amount as a decimal number of euros with two places.
    pub fn to_decimal(&self) -> Decimal {
        Decimal::new(self.0, 2)
    }

    /// Returns the value in cents.
    #[inline]
    pub const fn cents(&self) -> i64 {
        self.0
    }

    /// Returns the whole euros portion.
    #[inline]
    pub const fn euros(&self) -> i64 {
        self.0 / 100
    }

    /// Returns the cents portion (always 0-99).
    #[inline]
    pub const fn cents_part(&self) -> i64 {
        (self.0 % 100).abs()
    }

    /// Returns zero money value.
    #[inline]
    pub const fn zero() -> Self {
        Money(0)
    }

    /// Checks if the value is zero.
    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Checks if the value is negative.
    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Adds two amounts, returning `None` on `i64` overflow.
    #[inline]
    pub const fn checked_add(self, other: Money) -> Option<Money> {
        match self.0.checked_add(other.0) {
            Some(cents) => Some(Money(cents)),
            None => None,
        }
    }

    /// Extracts the VAT contained in a VAT-inclusive gross amount.
    ///
    /// Italian receipts carry gross (IVA inclusa) prices, so the tax is
    /// "scorporata": `gross × rate / (100 + rate)`, rounded half away from
    /// zero.
    ///
    /// ## Example
    /// ```rust
    /// use scontrino_core::money::Money;
    /// use scontrino_core::types::VatRate;
    ///
    /// // €1.22 at 22% contains €0.22 of VAT
    /// let vat = Money::from_cents(122).vat_portion(VatRate::from_bps(2200));
    /// assert_eq!(vat.cents(), 22);
    /// ```
    pub fn vat_portion(&self, rate: VatRate) -> Money {
        if rate.is_zero() {
            return Money::zero();
        }

        // i128 so large totals cannot overflow the intermediate product
        let numerator = (self.0 as i128).abs() * rate.bps() as i128;
        let denominator = 10_000 + rate.bps() as i128;
        let rounded = (2 * numerator + denominator) / (2 * denominator);
        let cents = rounded as i64;

        if self.0 < 0 {
            Money(-cents)
        } else {
            Money(cents)
        }
    }
}

// =============================================================================
// Trait Implementations
// =============================================================================

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        write!(f, "{}€{}.{:02}", sign, self.euros().abs(), self.cents_part())
    }
}

impl Default for Money {
    fn default() -> Self {
        Money::zero()
    }
}

impl Add for Money {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Money(self.0 + other.0)
    }
}

impl AddAssign for Money {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.0 += other.0;
    }
}

impl Sub for Money {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Money(self.0 - other.0)
    }
}

impl SubAssign for Money {
    #[inline]
    fn sub_assign(&mut self, other: Self) {
        self.0 -= other.0;
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + m)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
