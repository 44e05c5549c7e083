//! Fixed-point donation amounts in minor units. No floating point
//! anywhere on the money path; SQLite stores the value as a signed
//! 64-bit integer, so conversions at the storage boundary are checked.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Unsigned donation amount in minor units.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize, Hash,
)]
#[serde(transparent)]
pub struct MinorUnits(u64);

#[derive(Debug, thiserror::Error)]
pub enum AmountError {
    #[error("Amount {0} does not fit in a signed 64-bit storage column")]
    ExceedsStorageRange(u64),
    #[error("Stored amount {0} is negative")]
    NegativeStoredAmount(i64),
    #[error("Amount overflow adding {rhs} to {lhs}")]
    Overflow { lhs: u64, rhs: u64 },
    #[error("Stored count {0} is negative")]
    NegativeStoredCount(i64),
}

/// Conversion when reading a count column back out. A negative count is
/// row corruption and is surfaced, never clamped.
pub fn count_from_storage(value: i64) -> Result<u64, AmountError> {
    u64::try_from(value).map_err(|_| AmountError::NegativeStoredCount(value))
}

impl MinorUnits {
    pub const ZERO: Self = Self(0);

    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn get(self) -> u64 {
        self.0
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, rhs: Self) -> Result<Self, AmountError> {
        self.0
            .checked_add(rhs.0)
            .map(Self)
            .ok_or(AmountError::Overflow {
                lhs: self.0,
                rhs: rhs.0,
            })
    }

    /// Conversion for binding into an INTEGER column.
    pub fn to_storage(self) -> Result<i64, AmountError> {
        i64::try_from(self.0).map_err(|_| AmountError::ExceedsStorageRange(self.0))
    }

    /// Conversion when reading an INTEGER column back out.
    pub fn from_storage(value: i64) -> Result<Self, AmountError> {
        u64::try_from(value)
            .map(Self)
            .map_err(|_| AmountError::NegativeStoredAmount(value))
    }
}

impl fmt::Display for MinorUnits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<u64> for MinorUnits {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_round_trip() {
        let amount = MinorUnits::new(5_000_000_000);
        assert_eq!(
            MinorUnits::from_storage(amount.to_storage().unwrap()).unwrap(),
            amount
        );
    }

    #[test]
    fn rejects_negative_stored_amount() {
        assert!(MinorUnits::from_storage(-1).is_err());
    }

    #[test]
    fn rejects_amount_beyond_i64() {
        assert!(MinorUnits::new(u64::MAX).to_storage().is_err());
    }

    #[test]
    fn rejects_negative_stored_count() {
        assert!(count_from_storage(-1).is_err());
        assert_eq!(count_from_storage(7).unwrap(), 7);
    }

    #[test]
    fn checked_add_detects_overflow() {
        let max = MinorUnits::new(u64::MAX);
        assert!(max.checked_add(MinorUnits::new(1)).is_err());
        assert_eq!(
            MinorUnits::new(2)
                .checked_add(MinorUnits::new(3))
                .unwrap()
                .get(),
            5
        );
    }
}
