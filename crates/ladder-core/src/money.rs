//! Currency amounts.
//!
//! Prices are whole numbers of a currency's minimum unit. Anything computed
//! in floating point (exponential growth, multiplicative scaling) is rounded
//! half-up into this type exactly once, at the edge of the cost function.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;

/// A non-negative amount of currency in minimum units.
///
/// All arithmetic saturates: a price that would overflow is pinned at
/// `u64::MAX`, which no ledger balance can cover.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Money(pub u64);

impl Money {
    pub const ZERO: Money = Money(0);
    pub const MAX: Money = Money(u64::MAX);

    #[inline]
    pub fn saturating_add(self, other: Money) -> Money {
        Money(self.0.saturating_add(other.0))
    }

    #[inline]
    pub fn saturating_sub(self, other: Money) -> Money {
        Money(self.0.saturating_sub(other.0))
    }

    #[inline]
    pub fn checked_sub(self, other: Money) -> Option<Money> {
        self.0.checked_sub(other.0).map(Money)
    }

    /// Round a non-negative float half-up into minimum units.
    ///
    /// NaN and negative inputs clamp to zero; values beyond `u64::MAX`
    /// clamp to [`Money::MAX`].
    pub fn from_f64_half_up(value: f64) -> Money {
        if value.is_nan() || value <= 0.0 {
            return Money::ZERO;
        }
        let rounded = value.round();
        if rounded >= u64::MAX as f64 {
            Money::MAX
        } else {
            Money(rounded as u64)
        }
    }

    #[inline]
    pub fn as_f64(self) -> f64 {
        self.0 as f64
    }
}

impl From<u64> for Money {
    fn from(v: u64) -> Self {
        Money(v)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::ZERO, Money::saturating_add)
    }
}

impl fmt::Display for Money {
    /// Groups thousands with commas: `1234567` renders as `1,234,567`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let digits = self.0.to_string();
        let mut out = String::with_capacity(digits.len() + digits.len() / 3);
        for (i, ch) in digits.chars().enumerate() {
            if i > 0 && (digits.len() - i) % 3 == 0 {
                out.push(',');
            }
            out.push(ch);
        }
        f.write_str(&out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn half_up_rounding() {
        assert_eq!(Money::from_f64_half_up(1322.5), Money(1323));
        assert_eq!(Money::from_f64_half_up(1322.4999), Money(1322));
        assert_eq!(Money::from_f64_half_up(0.5), Money(1));
        assert_eq!(Money::from_f64_half_up(0.49), Money(0));
    }

    #[test]
    fn rounding_clamps_out_of_range() {
        assert_eq!(Money::from_f64_half_up(f64::NAN), Money::ZERO);
        assert_eq!(Money::from_f64_half_up(-10.0), Money::ZERO);
        assert_eq!(Money::from_f64_half_up(f64::INFINITY), Money::MAX);
        assert_eq!(Money::from_f64_half_up(1e30), Money::MAX);
    }

    #[test]
    fn saturating_arithmetic() {
        assert_eq!(Money::MAX.saturating_add(Money(1)), Money::MAX);
        assert_eq!(Money(5).saturating_sub(Money(10)), Money::ZERO);
        assert_eq!(Money(5).checked_sub(Money(10)), None);
        assert_eq!(Money(10).checked_sub(Money(4)), Some(Money(6)));
    }

    #[test]
    fn sums_saturate() {
        let total: Money = [Money(1000), Money(1150), Money(1322)].into_iter().sum();
        assert_eq!(total, Money(3472));
        let huge: Money = [Money::MAX, Money(1)].into_iter().sum();
        assert_eq!(huge, Money::MAX);
    }

    #[test]
    fn display_groups_thousands() {
        assert_eq!(Money(0).to_string(), "0");
        assert_eq!(Money(999).to_string(), "999");
        assert_eq!(Money(1000).to_string(), "1,000");
        assert_eq!(Money(1234567).to_string(), "1,234,567");
    }
}
