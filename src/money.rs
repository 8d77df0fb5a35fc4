use std::fmt;
use std::ops::{Add, AddAssign, Sub, SubAssign};

use serde::{Deserialize, Serialize};

/// Monetary amount in minor currency units (cents). Signed so that discounts
/// and credits can be expressed without a separate type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Money(i64);

impl Money {
    #[inline]
    pub const fn from_minor(minor: i64) -> Self {
        Money(minor)
    }

    /// Whole major units, e.g. `from_major(500)` is 500.00.
    #[inline]
    pub const fn from_major(major: i64) -> Self {
        Money(major * 100)
    }

    #[inline]
    pub const fn minor(&self) -> i64 {
        self.0
    }

    #[inline]
    pub const fn zero() -> Self {
        Money(0)
    }

    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// `self * bps / 10_000`, rounded half away from zero and saturated to
    /// the i64 range.
    pub fn portion(&self, bps: i64) -> Money {
        let raw = self.0 as i128 * bps as i128;
        let rounded = if raw >= 0 {
            (raw + 5_000) / 10_000
        } else {
            (raw - 5_000) / 10_000
        };
        Money(rounded.clamp(i64::MIN as i128, i64::MAX as i128) as i64)
    }

    #[inline]
    pub fn checked_add(self, other: Money) -> Option<Money> {
        self.0.checked_add(other.0).map(Money)
    }

    #[inline]
    pub fn checked_sub(self, other: Money) -> Option<Money> {
        self.0.checked_sub(other.0).map(Money)
    }

    #[inline]
    pub fn checked_mul(self, qty: i64) -> Option<Money> {
        self.0.checked_mul(qty).map(Money)
    }

    /// Sum of `amounts`, or `None` if any partial sum leaves the i64 range.
    pub fn checked_sum<I: IntoIterator<Item = Money>>(amounts: I) -> Option<Money> {
        amounts.into_iter().try_fold(Money::zero(), Money::checked_add)
    }

    /// Price arithmetic on the read path pins at the i64 bounds.
    #[inline]
    pub fn saturating_add(self, other: Money) -> Money {
        Money(self.0.saturating_add(other.0))
    }

    #[inline]
    pub fn saturating_sub(self, other: Money) -> Money {
        Money(self.0.saturating_sub(other.0))
    }

    /// Clamp negative amounts to zero.
    #[inline]
    pub fn floor_zero(self) -> Money {
        if self.0 < 0 { Money(0) } else { self }
    }

    /// Integer mean, rounded half away from zero. Zero when `count` is zero.
    pub fn average(total: Money, count: i64) -> Money {
        if count <= 0 {
            return Money::zero();
        }
        let half = count / 2;
        let rounded = if total.0 >= 0 {
            (total.0 + half) / count
        } else {
            (total.0 - half) / count
        };
        Money(rounded)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
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

/// A rate in basis points: 1 bps = 0.01%, so 1500 = 15%.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Bps(u32);

impl Bps {
    #[inline]
    pub const fn from_bps(bps: u32) -> Self {
        Bps(bps)
    }

    /// Whole percent, e.g. `from_percent(15)` is 15%.
    #[inline]
    pub const fn from_percent(pct: u32) -> Self {
        Bps(pct * 100)
    }

    #[inline]
    pub const fn bps(&self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Bps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}%", self.0 / 100, self.0 % 100)
    }
}

/// Tax rates are plain basis-point rates.
pub type TaxRate = Bps;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn major_and_minor() {
        let m = Money::from_major(500);
        assert_eq!(m.minor(), 50_000);
        assert_eq!(m.to_string(), "500.00");
        assert_eq!(Money::from_minor(-550).to_string(), "-5.50");
        assert_eq!(Money::from_minor(7).to_string(), "0.07");
    }

    #[test]
    fn portion_rounds_half_away_from_zero() {
        // 10.00 * 8.25% = 0.825 -> 0.83
        assert_eq!(Money::from_minor(1000).portion(825), Money::from_minor(83));
        assert_eq!(Money::from_minor(-1000).portion(825), Money::from_minor(-83));
        // 1500.00 * 15% = 225.00
        assert_eq!(Money::from_major(1500).portion(1500), Money::from_major(225));
    }

    #[test]
    fn portion_does_not_overflow_on_large_amounts() {
        let big = Money::from_minor(i64::MAX / 2);
        let p = big.portion(10_000);
        assert_eq!(p, big);
    }

    #[test]
    fn floor_zero_clamps() {
        assert_eq!(Money::from_minor(-1).floor_zero(), Money::zero());
        assert_eq!(Money::from_minor(5).floor_zero(), Money::from_minor(5));
    }

    #[test]
    fn average_rounds() {
        assert_eq!(Money::average(Money::from_minor(10), 3), Money::from_minor(3));
        assert_eq!(Money::average(Money::from_minor(11), 2), Money::from_minor(6));
        assert_eq!(Money::average(Money::from_minor(11), 0), Money::zero());
    }

    #[test]
    fn repeated_partial_amounts_sum_exactly() {
        let parts = vec![Money::from_minor(33_333); 3];
        assert_eq!(Money::checked_sum(parts), Some(Money::from_minor(99_999)));
    }

    #[test]
    fn checked_arithmetic_reports_overflow() {
        let big = Money::from_minor(i64::MAX / 4);
        assert_eq!(big.checked_mul(8), None);
        assert_eq!(big.checked_mul(2), Some(Money::from_minor(i64::MAX / 4 * 2)));
        assert_eq!(Money::checked_sum([big, big, big, big, big]), None);
        assert_eq!(Money::from_minor(i64::MIN).checked_sub(Money::from_minor(1)), None);
        assert_eq!(big.saturating_add(Money::from_minor(i64::MAX)), Money::from_minor(i64::MAX));
    }

    #[test]
    fn portion_saturates_instead_of_wrapping() {
        let big = Money::from_minor(i64::MAX / 2);
        assert_eq!(big.portion(100_000), Money::from_minor(i64::MAX));
        assert_eq!(big.portion(-100_000), Money::from_minor(i64::MIN));
    }

    #[test]
    fn bps_display() {
        assert_eq!(Bps::from_percent(15).to_string(), "15.00%");
        assert_eq!(Bps::from_bps(825).to_string(), "8.25%");
    }
}
