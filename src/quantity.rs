//! Fixed-point quantities and mass units.
//!
//! Quantities are stored as signed thousandths of their unit, so a chain can be
//! split and merged any number of times without accumulating floating-point
//! drift. Floats only appear in derived ratios (efficiency, yield factors).

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};
use std::str::FromStr;
use thiserror::Error;

/// Number of raw units per whole unit.
pub const SCALE: i64 = 1_000;

/// Decimal places carried by a quantity.
const DECIMALS: usize = 3;

/// A signed fixed-point quantity with three decimal places.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Quantity(i64);

impl Quantity {
    pub const ZERO: Quantity = Quantity(0);

    /// Build from raw thousandths.
    pub const fn from_raw(raw: i64) -> Self {
        Quantity(raw)
    }

    /// Build from a whole number of units.
    pub const fn whole(units: i64) -> Self {
        Quantity(units * SCALE)
    }

    /// Raw thousandths.
    pub const fn raw(self) -> i64 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    pub fn abs(self) -> Self {
        Quantity(self.0.abs())
    }

    pub fn checked_add(self, other: Quantity) -> Option<Quantity> {
        self.0.checked_add(other.0).map(Quantity)
    }

    pub fn checked_sub(self, other: Quantity) -> Option<Quantity> {
        self.0.checked_sub(other.0).map(Quantity)
    }

    /// Sum a sequence, returning `None` on overflow.
    pub fn checked_sum<I: IntoIterator<Item = Quantity>>(iter: I) -> Option<Quantity> {
        iter.into_iter()
            .try_fold(Quantity::ZERO, |acc, q| acc.checked_add(q))
    }

    pub fn to_f64(self) -> f64 {
        self.0 as f64 / SCALE as f64
    }

    /// Multiply by a ratio, rounding to the nearest thousandth.
    pub fn mul_ratio(self, ratio: f64) -> Quantity {
        Quantity((self.0 as f64 * ratio).round() as i64)
    }

    /// `self / other` as a float, or 0 when `other` is zero.
    pub fn ratio_to(self, other: Quantity) -> f64 {
        if other.0 == 0 {
            0.0
        } else {
            self.0 as f64 / other.0 as f64
        }
    }

    /// Divide this quantity by integer weights.
    ///
    /// Every share but the last is rounded down; the last share takes the
    /// remainder so the shares always sum exactly to `self`. Returns `None`
    /// for a negative quantity, no weights, or a zero total weight.
    pub fn apportion(self, weights: &[u64]) -> Option<Vec<Quantity>> {
        if self.0 < 0 || weights.is_empty() {
            return None;
        }
        let total_weight: u128 = weights.iter().map(|&w| w as u128).sum();
        if total_weight == 0 {
            return None;
        }

        let raw = self.0 as u128;
        let mut shares = Vec::with_capacity(weights.len());
        let mut allocated: i64 = 0;
        for &weight in &weights[..weights.len() - 1] {
            let share = (raw * weight as u128 / total_weight) as i64;
            allocated += share;
            shares.push(Quantity(share));
        }
        shares.push(Quantity(self.0 - allocated));
        Some(shares)
    }
}

impl fmt::Debug for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Quantity({})", self)
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let whole = abs / SCALE as u64;
        let frac = abs % SCALE as u64;
        if frac == 0 {
            write!(f, "{}{}", sign, whole)
        } else {
            let digits = format!("{:0width$}", frac, width = DECIMALS);
            write!(f, "{}{}.{}", sign, whole, digits.trim_end_matches('0'))
        }
    }
}

/// Error parsing a decimal quantity.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("invalid quantity '{input}': {reason}")]
pub struct ParseQuantityError {
    pub input: String,
    pub reason: &'static str,
}

impl FromStr for Quantity {
    type Err = ParseQuantityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fail = |reason| ParseQuantityError {
            input: s.to_string(),
            reason,
        };

        let trimmed = s.trim();
        let (negative, body) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
        };

        let (whole_part, frac_part) = match body.split_once('.') {
            Some((w, f)) => (w, f),
            None => (body, ""),
        };
        if whole_part.is_empty() && frac_part.is_empty() {
            return Err(fail("no digits"));
        }
        if !whole_part.chars().all(|c| c.is_ascii_digit())
            || !frac_part.chars().all(|c| c.is_ascii_digit())
        {
            return Err(fail("not a decimal number"));
        }
        if frac_part.len() > DECIMALS {
            return Err(fail("more than three decimal places"));
        }

        let whole: i64 = if whole_part.is_empty() {
            0
        } else {
            whole_part.parse().map_err(|_| fail("out of range"))?
        };
        let mut frac: i64 = if frac_part.is_empty() {
            0
        } else {
            frac_part.parse().map_err(|_| fail("out of range"))?
        };
        for _ in frac_part.len()..DECIMALS {
            frac *= 10;
        }

        let raw = whole
            .checked_mul(SCALE)
            .and_then(|w| w.checked_add(frac))
            .ok_or_else(|| fail("out of range"))?;
        Ok(Quantity(if negative { -raw } else { raw }))
    }
}

impl Serialize for Quantity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

struct QuantityVisitor;

impl<'de> Visitor<'de> for QuantityVisitor {
    type Value = Quantity;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a decimal quantity with at most three decimal places")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Quantity, E> {
        v.parse().map_err(E::custom)
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Quantity, E> {
        v.checked_mul(SCALE)
            .map(Quantity)
            .ok_or_else(|| E::custom("quantity out of range"))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Quantity, E> {
        let v = i64::try_from(v).map_err(|_| E::custom("quantity out of range"))?;
        self.visit_i64(v)
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Quantity, E> {
        if !v.is_finite() {
            return Err(E::custom("quantity must be finite"));
        }
        v.to_string().parse().map_err(E::custom)
    }
}

impl<'de> Deserialize<'de> for Quantity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(QuantityVisitor)
    }
}

impl Add for Quantity {
    type Output = Quantity;

    fn add(self, rhs: Quantity) -> Quantity {
        Quantity(self.0 + rhs.0)
    }
}

impl AddAssign for Quantity {
    fn add_assign(&mut self, rhs: Quantity) {
        self.0 += rhs.0;
    }
}

impl Sub for Quantity {
    type Output = Quantity;

    fn sub(self, rhs: Quantity) -> Quantity {
        Quantity(self.0 - rhs.0)
    }
}

impl SubAssign for Quantity {
    fn sub_assign(&mut self, rhs: Quantity) {
        self.0 -= rhs.0;
    }
}

impl Neg for Quantity {
    type Output = Quantity;

    fn neg(self) -> Quantity {
        Quantity(-self.0)
    }
}

impl Sum for Quantity {
    fn sum<I: Iterator<Item = Quantity>>(iter: I) -> Quantity {
        iter.fold(Quantity::ZERO, Add::add)
    }
}

/// Mass unit of measure.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Unit {
    #[default]
    #[serde(rename = "kg")]
    Kilogram,
    #[serde(rename = "t")]
    Tonne,
}

impl Unit {
    pub fn symbol(self) -> &'static str {
        match self {
            Unit::Kilogram => "kg",
            Unit::Tonne => "t",
        }
    }

    fn kilograms_per_unit(self) -> i64 {
        match self {
            Unit::Kilogram => 1,
            Unit::Tonne => 1_000,
        }
    }

    /// Convert a quantity in this unit to `target`.
    ///
    /// Returns `None` if the result would overflow or cannot be expressed
    /// exactly with three decimal places.
    pub fn convert(self, quantity: Quantity, target: Unit) -> Option<Quantity> {
        if self == target {
            return Some(quantity);
        }
        let raw_kg = quantity.raw().checked_mul(self.kilograms_per_unit())?;
        let divisor = target.kilograms_per_unit();
        if raw_kg % divisor != 0 {
            return None;
        }
        Some(Quantity::from_raw(raw_kg / divisor))
    }

    /// Convert to kilograms. Always exact; saturates on overflow.
    pub fn to_kg(self, quantity: Quantity) -> Quantity {
        Quantity::from_raw(quantity.raw().saturating_mul(self.kilograms_per_unit()))
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl FromStr for Unit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "kg" | "kilogram" | "kilograms" => Ok(Unit::Kilogram),
            "t" | "mt" | "tonne" | "tonnes" => Ok(Unit::Tonne),
            other => Err(format!("unknown unit of measure: {}", other)),
        }
    }
}
