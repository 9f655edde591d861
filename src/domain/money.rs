use crate::error::BookingError;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A strictly positive amount in minor currency units (e.g. cents).
///
/// Used for prices and captured escrow amounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct Amount(u64);

impl Amount {
    pub fn new(value: u64) -> Result<Self, BookingError> {
        if value > 0 {
            Ok(Self(value))
        } else {
            Err(BookingError::Validation(
                "Amount must be positive".to_string(),
            ))
        }
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl TryFrom<u64> for Amount {
    type Error = BookingError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Amount> for u64 {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl From<Amount> for Balance {
    fn from(amount: Amount) -> Self {
        Self(amount.0)
    }
}

/// A non-negative ledger balance in minor currency units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Balance(pub u64);

impl Balance {
    pub const ZERO: Self = Self(0);

    /// Sum of two balances, or a validation error if it exceeds `u64::MAX`.
    pub fn checked_add(self, rhs: Self) -> Result<Self, BookingError> {
        self.0.checked_add(rhs.0).map(Self).ok_or_else(|| {
            BookingError::Validation(format!("Balance {self} + {rhs} overflows"))
        })
    }
}

impl fmt::Display for Balance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Fraction of a captured amount retained by the platform, in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct FeeRate(Decimal);

impl FeeRate {
    pub fn new(rate: Decimal) -> Result<Self, BookingError> {
        if rate >= Decimal::ZERO && rate <= Decimal::ONE {
            Ok(Self(rate))
        } else {
            Err(BookingError::Validation(format!(
                "Fee rate must be between 0 and 1, got {rate}"
            )))
        }
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    /// Splits a captured amount into the provider credit and the platform fee.
    ///
    /// The fee is `floor(amount * rate)` in exact decimal arithmetic, so the two
    /// parts always add back up to `amount`.
    pub fn split(&self, amount: Amount) -> FeeSplit {
        let captured = amount.value();
        let fee = (Decimal::from(captured) * self.0)
            .floor()
            .to_u64()
            .unwrap_or(captured)
            .min(captured);

        FeeSplit {
            provider_credit: Balance(captured - fee),
            platform_fee: Balance(fee),
        }
    }
}

impl Default for FeeRate {
    fn default() -> Self {
        Self(dec!(0.05))
    }
}

impl TryFrom<Decimal> for FeeRate {
    type Error = BookingError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<FeeRate> for Decimal {
    fn from(rate: FeeRate) -> Self {
        rate.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeSplit {
    pub provider_credit: Balance,
    pub platform_fee: Balance,
}
