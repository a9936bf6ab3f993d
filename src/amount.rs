use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::iter::Sum;

/// Fixed-point decimal with 4 decimal places, stored as a scaled integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Amount(i64);

/// Scaled integers per cent.
const CENT: i64 = 100;

/// Divide rounding half away from zero.
fn div_round(numerator: i128, denominator: i128) -> i128 {
    let half = denominator / 2;
    if numerator >= 0 {
        (numerator + half) / denominator
    } else {
        (numerator - half) / denominator
    }
}

impl Amount {
    const SCALE: i64 = 10_000;

    pub const ZERO: Amount = Amount(0);

    pub fn from_float(value: f64) -> Self {
        if !value.is_finite() {
            return Amount::ZERO;
        }
        Amount((value * Self::SCALE as f64).round() as i64)
    }

    pub fn from_scaled(value: i64) -> Self {
        Amount(value)
    }

    /// Whole currency units, e.g. `from_units(60)` is 60.0000.
    pub const fn from_units(units: i64) -> Self {
        Amount(units * Self::SCALE)
    }

    pub fn scaled(self) -> i64 {
        self.0
    }

    pub fn to_float(self) -> f64 {
        self.0 as f64 / Self::SCALE as f64
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    /// Multiply by an integer quantity.
    pub fn times(self, qty: u32) -> Self {
        Amount(self.0 * i64::from(qty))
    }

    /// Multiply by a rate, rounding half-up back to 4 decimal places.
    pub fn apply_rate(self, rate: Rate) -> Self {
        let product = i128::from(self.0) * i128::from(rate.0);
        Amount(div_round(product, i128::from(Rate::SCALE)) as i64)
    }

    /// Round half-up to 2 decimal places.
    pub fn round_cents(self) -> Self {
        Amount((div_round(i128::from(self.0), i128::from(CENT)) as i64) * CENT)
    }

    /// Round toward negative infinity to 2 decimal places.
    pub fn floor_cents(self) -> Self {
        Amount(self.0.div_euclid(CENT) * CENT)
    }

    /// Round a non-negative amount up to the next multiple of `unit`.
    /// Values already on a multiple are returned as-is.
    pub fn ceil_to(self, unit: Amount) -> Self {
        if unit.0 <= 0 || self.0 <= 0 {
            return self;
        }
        Amount((self.0 + unit.0 - 1) / unit.0 * unit.0)
    }

    /// Floor at zero.
    pub fn non_negative(self) -> Self {
        self.max(Amount::ZERO)
    }
}

/// Formats without trailing zeros: `60`, `56.7`, `1.134`.
impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.abs();
        let whole = abs / Self::SCALE;
        let frac = abs % Self::SCALE;
        if frac == 0 {
            return write!(f, "{sign}{whole}");
        }
        let digits = format!("{frac:04}");
        write!(f, "{sign}{whole}.{}", digits.trim_end_matches('0'))
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.to_float())
    }
}

/// Accepts only numbers that are exactly an `Amount`, so a decoded value always
/// re-serializes to what was read.
impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = f64::deserialize(deserializer)?;
        let amount = Amount::from_float(value);
        if !value.is_finite() || amount.to_float() != value {
            return Err(serde::de::Error::custom(format!(
                "amount {value} is out of range or has more than 4 decimal places"
            )));
        }
        Ok(amount)
    }
}

impl std::ops::Add for Amount {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Amount(self.0 + rhs.0)
    }
}

impl std::ops::Sub for Amount {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Amount(self.0 - rhs.0)
    }
}

impl std::ops::AddAssign for Amount {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl std::ops::SubAssign for Amount {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

impl Sum for Amount {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Amount::ZERO, |acc, a| acc + a)
    }
}

/// Non-negative fraction with 4 decimal places (0.05 is stored as 500).
///
/// Used for tax rates, percent coupons and the cashback rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Rate(u32);

impl Rate {
    const SCALE: u32 = 10_000;

    pub const ZERO: Rate = Rate(0);
    pub const ONE: Rate = Rate(Self::SCALE);

    /// Returns `None` for negative, non-finite or unrepresentably large input.
    pub fn from_float(value: f64) -> Option<Self> {
        if !value.is_finite() || value < 0.0 {
            return None;
        }
        let scaled = (value * f64::from(Self::SCALE)).round();
        if scaled > f64::from(u32::MAX) {
            return None;
        }
        Some(Rate(scaled as u32))
    }

    pub fn from_scaled(value: u32) -> Self {
        Rate(value)
    }

    pub fn to_float(self) -> f64 {
        f64::from(self.0) / f64::from(Self::SCALE)
    }

    /// `1 + self`, the multiplier for a tax rate.
    pub fn one_plus(self) -> Self {
        Rate(Self::SCALE + self.0)
    }

    /// Within `0..=1`.
    pub fn is_fraction(self) -> bool {
        self <= Rate::ONE
    }
}

impl fmt::Display for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_float())
    }
}

impl Serialize for Rate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.to_float())
    }
}

impl<'de> Deserialize<'de> for Rate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = f64::deserialize(deserializer)?;
        Rate::from_float(value)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid rate {value}")))
    }
}
