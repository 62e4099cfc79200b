//! Fixed-point amounts.
//!
//! Every balance, offer size and trade amount in the ledger is a [`Micros`]:
//! an `i64` at 1e-6 scale.  One unit of the traded asset is
//! `Micros(1_000_000)`.  Prices use the same scale but are denominated in the
//! fiat leg of the pair (fiat micros per asset unit).
//!
//! There is no `From<i64>`.  Raw integers become money only through
//! [`Micros::new`] or [`Micros::from_units`], so an account id or a basis
//! point count can never slip into a balance.
//!
//! Ledger arithmetic goes through the `checked_*` methods.  The operator
//! impls exist for tests and for values already bounded by a prior check.

use std::ops::{Add, AddAssign, Sub, SubAssign};

use serde::{Deserialize, Serialize};

/// Micros per whole unit.
pub const MICROS_PER_UNIT: i64 = 1_000_000;

/// Basis points in 100%.
pub const BPS_DENOM: i64 = 10_000;

// ---------------------------------------------------------------------------
// Micros newtype
// ---------------------------------------------------------------------------

/// A fixed-point amount at 1e-6 scale.
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Micros(i64);

impl Micros {
    pub const ZERO: Micros = Micros(0);
    pub const MAX: Micros = Micros(i64::MAX);

    #[inline]
    pub const fn new(raw: i64) -> Self {
        Micros(raw)
    }

    /// Whole units, e.g. `Micros::from_units(5)` is 5.000000.
    ///
    /// Returns `None` when `units * 1_000_000` does not fit in `i64`.
    #[inline]
    pub fn from_units(units: i64) -> Option<Self> {
        units.checked_mul(MICROS_PER_UNIT).map(Micros)
    }

    #[inline]
    pub const fn raw(self) -> i64 {
        self.0
    }

    #[inline]
    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    #[inline]
    pub fn is_non_negative(self) -> bool {
        self.0 >= 0
    }

    #[inline]
    pub fn checked_add(self, rhs: Micros) -> Option<Micros> {
        self.0.checked_add(rhs.0).map(Micros)
    }

    #[inline]
    pub fn checked_sub(self, rhs: Micros) -> Option<Micros> {
        self.0.checked_sub(rhs.0).map(Micros)
    }

    /// Clamps at [`Micros::MAX`]. For totals in reports and checks only.
    #[inline]
    pub fn saturating_add(self, rhs: Micros) -> Micros {
        Micros(self.0.saturating_add(rhs.0))
    }

    /// `self * bps / 10_000`, rounded toward zero.
    ///
    /// Computed in `i128`, so only a result outside `i64` returns `None`.
    pub fn checked_bps(self, bps: u32) -> Option<Micros> {
        let wide = (self.0 as i128) * (bps as i128) / (BPS_DENOM as i128);
        i64::try_from(wide).ok().map(Micros)
    }

    /// Fiat value of `self` asset micros at `price` fiat micros per unit.
    pub fn checked_notional(self, price: Micros) -> Option<Micros> {
        let wide = (self.0 as i128) * (price.0 as i128) / (MICROS_PER_UNIT as i128);
        i64::try_from(wide).ok().map(Micros)
    }
}

// ---------------------------------------------------------------------------
// Operators
// ---------------------------------------------------------------------------

impl Add for Micros {
    type Output = Micros;
    #[inline]
    fn add(self, rhs: Micros) -> Micros {
        Micros(self.0 + rhs.0)
    }
}

impl Sub for Micros {
    type Output = Micros;
    #[inline]
    fn sub(self, rhs: Micros) -> Micros {
        Micros(self.0 - rhs.0)
    }
}

impl AddAssign for Micros {
    #[inline]
    fn add_assign(&mut self, rhs: Micros) {
        self.0 += rhs.0;
    }
}

impl SubAssign for Micros {
    #[inline]
    fn sub_assign(&mut self, rhs: Micros) {
        self.0 -= rhs.0;
    }
}

impl std::iter::Sum for Micros {
    fn sum<I: Iterator<Item = Micros>>(iter: I) -> Micros {
        iter.fold(Micros::ZERO, |acc, m| acc + m)
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParseMicrosError {
    input: String,
}

impl std::fmt::Display for ParseMicrosError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid amount {:?}: expected a decimal with at most 6 places",
            self.input
        )
    }
}

impl std::error::Error for ParseMicrosError {}

impl std::str::FromStr for Micros {
    type Err = ParseMicrosError;

    /// `"12"`, `"12.5"`, `"-0.000001"`. More than six decimals is an error,
    /// not a rounding.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseMicrosError {
            input: s.to_string(),
        };
        let t = s.trim();
        let (neg, digits) = match t.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, t),
        };
        let (whole, frac) = digits.split_once('.').unwrap_or((digits, ""));
        if whole.is_empty() && frac.is_empty() {
            return Err(err());
        }
        if frac.len() > 6
            || !whole.chars().all(|c| c.is_ascii_digit())
            || !frac.chars().all(|c| c.is_ascii_digit())
        {
            return Err(err());
        }

        let whole: i64 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| err())?
        };
        let frac: i64 = if frac.is_empty() {
            0
        } else {
            format!("{frac:0<6}").parse().map_err(|_| err())?
        };
        let raw = whole
            .checked_mul(MICROS_PER_UNIT)
            .and_then(|w| w.checked_add(frac))
            .ok_or_else(err)?;
        Ok(Micros(if neg { -raw } else { raw }))
    }
}

// ---------------------------------------------------------------------------
// Display
// ---------------------------------------------------------------------------

impl std::fmt::Display for Micros {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let whole = self.0 / MICROS_PER_UNIT;
        let frac = (self.0 % MICROS_PER_UNIT).abs();
        // -0.5 truncates to whole == 0; keep the sign.
        if self.0 < 0 && whole == 0 {
            write!(f, "-{whole}.{frac:06}")
        } else {
            write!(f, "{whole}.{frac:06}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_units_scales() {
        assert_eq!(Micros::from_units(3).unwrap().raw(), 3_000_000);
        assert_eq!(Micros::from_units(i64::MAX), None);
    }

    #[test]
    fn half_percent_commission() {
        let amount = Micros::from_units(1_000).unwrap();
        assert_eq!(amount.checked_bps(50), Some(Micros::from_units(5).unwrap()));
    }

    #[test]
    fn bps_truncates_toward_zero() {
        // 0.5% of 0.000199 is 0.000000995 -> 0
        assert_eq!(Micros::new(199).checked_bps(50), Some(Micros::ZERO));
        assert_eq!(Micros::new(200).checked_bps(50), Some(Micros::new(1)));
    }

    #[test]
    fn bps_of_max_does_not_overflow() {
        assert!(Micros::MAX.checked_bps(50).is_some());
    }

    #[test]
    fn notional_at_price() {
        let qty = Micros::new(2_500_000); // 2.5 units
        let price = Micros::from_units(40_000).unwrap();
        assert_eq!(
            qty.checked_notional(price),
            Some(Micros::from_units(100_000).unwrap())
        );
    }

    #[test]
    fn checked_sub_overflow() {
        assert_eq!(Micros::new(i64::MIN).checked_sub(Micros::new(1)), None);
        assert_eq!(
            Micros::new(5).checked_sub(Micros::new(7)),
            Some(Micros::new(-2))
        );
    }

    #[test]
    fn display_six_places() {
        assert_eq!(Micros::new(1_500_000).to_string(), "1.500000");
        assert_eq!(Micros::new(-250_000).to_string(), "-0.250000");
    }

    #[test]
    fn parse_decimal_units() {
        assert_eq!("12".parse::<Micros>(), Ok(Micros::new(12_000_000)));
        assert_eq!("12.5".parse::<Micros>(), Ok(Micros::new(12_500_000)));
        assert_eq!(" .25 ".parse::<Micros>(), Ok(Micros::new(250_000)));
        assert_eq!("-0.000001".parse::<Micros>(), Ok(Micros::new(-1)));
        assert!("1.0000001".parse::<Micros>().is_err());
        assert!("1e3".parse::<Micros>().is_err());
        assert!("".parse::<Micros>().is_err());
        assert!(".".parse::<Micros>().is_err());
        assert!("99999999999999".parse::<Micros>().is_err());
    }

    #[test]
    fn parse_display_agree() {
        let m: Micros = "-3.141500".parse().unwrap();
        assert_eq!(m.to_string(), "-3.141500");
    }

    #[test]
    fn serde_is_transparent() {
        let s = serde_json::to_string(&Micros::new(42)).unwrap();
        assert_eq!(s, "42");
    }
}
