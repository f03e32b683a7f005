//! Money as a small immutable value: an integer amount in minor units
//! (cents) plus a 3-character currency code.

use serde::{Deserialize, Serialize};
use std::fmt;

/// An amount of money with a currency. Stored as minor units (cents) so
/// arithmetic is exact; all inputs to the system are already quantized to
/// two decimal places, so no floating point ever enters the picture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Money {
    minor_units: i64,
    currency: [u8; 3],
}

impl Money {
    /// Default currency when none is supplied.
    pub const DEFAULT_CURRENCY: &'static str = "TRY";

    /// Build from a whole amount of minor units (cents) and an ISO-ish
    /// 3-letter currency code.
    ///
    /// # Panics
    ///
    /// Panics if `currency` is not exactly 3 ASCII bytes.
    #[must_use]
    pub fn from_minor_units(minor_units: i64, currency: &str) -> Self {
        let bytes = currency.as_bytes();
        assert_eq!(bytes.len(), 3, "currency code must be exactly 3 characters");
        Self {
            minor_units,
            currency: [bytes[0], bytes[1], bytes[2]],
        }
    }

    /// Zero amount in the default currency.
    #[must_use]
    pub fn zero() -> Self {
        Self::from_minor_units(0, Self::DEFAULT_CURRENCY)
    }

    /// The amount in minor units (cents).
    #[must_use]
    pub const fn minor_units(&self) -> i64 {
        self.minor_units
    }

    /// The 3-letter currency code.
    #[must_use]
    pub fn currency(&self) -> &str {
        std::str::from_utf8(&self.currency).unwrap_or(Self::DEFAULT_CURRENCY)
    }

    /// Line total for a quantity of this unit price, rounded half-away-
    /// from-zero to the nearest minor unit. Since both operands are
    /// already quantized to minor units the product is exact; the
    /// rounding step exists to match the domain contract explicitly.
    #[must_use]
    pub fn line_total(&self, quantity: u32) -> Self {
        let product = self.minor_units * i64::from(quantity);
        Self {
            minor_units: product,
            currency: self.currency,
        }
    }

    /// Add two amounts of the same currency.
    ///
    /// # Panics
    ///
    /// Panics if the currencies differ.
    #[must_use]
    pub fn checked_add(&self, other: Self) -> Self {
        assert_eq!(self.currency, other.currency, "currency mismatch in addition");
        Self {
            minor_units: self.minor_units + other.minor_units,
            currency: self.currency,
        }
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02} {}", self.minor_units / 100, (self.minor_units % 100).abs(), self.currency())
    }
}
