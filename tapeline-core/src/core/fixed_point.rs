//! Fixed-Point Decimal Arithmetic
//!
//! All prices and quantities in the pipeline are carried as `FixedDecimal`:
//! an i128 mantissa at a fixed scale of 18 fractional digits. This is the
//! same physical representation Arrow stores for `decimal128(38, 18)`, so
//! values written to Parquet are the mantissa verbatim, with no conversion
//! step that could lose precision.
//!
//! ## Rules
//!
//! - Conversion to and from text is exact; parsing rejects inputs with more
//!   than 18 fractional digits instead of rounding.
//! - Arithmetic is checked; overflow is an error, never a wrap or saturate.
//! - There is no constructor from `f32`/`f64`. Floating point is not a
//!   source of prices or quantities anywhere in the pipeline.

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Number of fractional digits carried by every `FixedDecimal`.
pub const SCALE: u32 = 18;

/// Total decimal precision of the representation (matches decimal128).
pub const PRECISION: u32 = 38;

/// 10^18, the mantissa units per whole unit.
const SCALE_FACTOR: i128 = 1_000_000_000_000_000_000;

/// Errors from decimal parsing and arithmetic.
///
/// Any of these on a price/quantity path is fatal to the worker (scale loss
/// would silently corrupt reconstructed books downstream).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecimalError {
    /// Input text is not a decimal number
    #[error("invalid decimal text: {0:?}")]
    Invalid(String),

    /// Input carries more than 18 fractional digits
    #[error("scale exceeded (>{SCALE} fractional digits): {0:?}")]
    ScaleExceeded(String),

    /// Result does not fit the i128 mantissa
    #[error("decimal overflow in {op}")]
    Overflow {
        /// Operation that overflowed
        op: &'static str,
    },
}

/// Signed fixed-point decimal, scale 18, precision 38.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct FixedDecimal(i128);

impl FixedDecimal {
    /// Zero value.
    pub const ZERO: FixedDecimal = FixedDecimal(0);

    /// One whole unit.
    pub const ONE: FixedDecimal = FixedDecimal(SCALE_FACTOR);

    /// Construct from a raw i128 mantissa (already scaled by 10^18).
    ///
    /// This is the decimal128(38,18) wire representation used by the
    /// columnar sink.
    #[inline]
    pub const fn from_mantissa(mantissa: i128) -> Self {
        FixedDecimal(mantissa)
    }

    /// Raw i128 mantissa (scaled by 10^18).
    #[inline]
    pub const fn mantissa(self) -> i128 {
        self.0
    }

    /// Construct from a whole integer.
    pub fn from_int(value: i64) -> Self {
        FixedDecimal(value as i128 * SCALE_FACTOR)
    }

    /// Parse from text, exactly.
    ///
    /// Accepts an optional sign, an integer part, and up to 18 fractional
    /// digits. `"1.50"` and `"1.5"` parse to the same value.
    pub fn parse(text: &str) -> Result<Self, DecimalError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(DecimalError::Invalid(text.to_string()));
        }

        let (negative, digits) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
        };

        let (int_part, frac_part) = match digits.split_once('.') {
            Some((i, f)) => (i, f),
            None => (digits, ""),
        };

        if int_part.is_empty() && frac_part.is_empty() {
            return Err(DecimalError::Invalid(text.to_string()));
        }
        if !int_part.chars().all(|c| c.is_ascii_digit())
            || !frac_part.chars().all(|c| c.is_ascii_digit())
        {
            return Err(DecimalError::Invalid(text.to_string()));
        }
        if frac_part.len() > SCALE as usize {
            // Reject rather than round: trailing digits beyond the scale
            // would be silent precision loss.
            let tail = &frac_part[SCALE as usize..];
            if tail.chars().any(|c| c != '0') {
                return Err(DecimalError::ScaleExceeded(text.to_string()));
            }
        }

        let mut mantissa: i128 = 0;
        for c in int_part.chars() {
            mantissa = mantissa
                .checked_mul(10)
                .and_then(|m| m.checked_add((c as u8 - b'0') as i128))
                .ok_or(DecimalError::Overflow { op: "parse" })?;
        }
        mantissa = mantissa
            .checked_mul(SCALE_FACTOR)
            .ok_or(DecimalError::Overflow { op: "parse" })?;

        let frac_digits = frac_part.len().min(SCALE as usize);
        let mut frac: i128 = 0;
        for c in frac_part[..frac_digits].chars() {
            frac = frac * 10 + (c as u8 - b'0') as i128;
        }
        for _ in frac_digits..SCALE as usize {
            frac *= 10;
        }
        mantissa = mantissa
            .checked_add(frac)
            .ok_or(DecimalError::Overflow { op: "parse" })?;

        if negative {
            mantissa = -mantissa;
        }
        Ok(FixedDecimal(mantissa))
    }

    /// Checked addition.
    pub fn checked_add(self, other: Self) -> Result<Self, DecimalError> {
        self.0
            .checked_add(other.0)
            .map(FixedDecimal)
            .ok_or(DecimalError::Overflow { op: "add" })
    }

    /// Checked subtraction.
    pub fn checked_sub(self, other: Self) -> Result<Self, DecimalError> {
        self.0
            .checked_sub(other.0)
            .map(FixedDecimal)
            .ok_or(DecimalError::Overflow { op: "sub" })
    }

    /// Checked multiplication by a small integer.
    pub fn checked_mul_int(self, factor: i64) -> Result<Self, DecimalError> {
        self.0
            .checked_mul(factor as i128)
            .map(FixedDecimal)
            .ok_or(DecimalError::Overflow { op: "mul_int" })
    }

    /// Saturating subtraction clamped at zero (used for liquidity
    /// consumption where negative remainders mean "level depleted").
    pub fn saturating_sub_floor_zero(self, other: Self) -> Self {
        FixedDecimal(self.0.saturating_sub(other.0).max(0))
    }

    #[inline]
    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    /// Lossy conversion for drift metrics only.
    ///
    /// Drift RMS is defined as f64; this is the single sanctioned crossing
    /// from the decimal domain into floating point, at the metrics boundary.
    pub fn to_f64_lossy(self) -> f64 {
        self.0 as f64 / SCALE_FACTOR as f64
    }
}

impl fmt::Display for FixedDecimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mantissa = self.0;
        let sign = if mantissa < 0 { "-" } else { "" };
        let abs = mantissa.unsigned_abs();
        let int_part = abs / SCALE_FACTOR as u128;
        let frac_part = abs % SCALE_FACTOR as u128;

        if frac_part == 0 {
            return write!(f, "{sign}{int_part}");
        }

        let mut frac = format!("{frac_part:018}");
        while frac.ends_with('0') {
            frac.pop();
        }
        write!(f, "{sign}{int_part}.{frac}")
    }
}

impl fmt::Debug for FixedDecimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FixedDecimal({self})")
    }
}

impl FromStr for FixedDecimal {
    type Err = DecimalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FixedDecimal::parse(s)
    }
}

impl Serialize for FixedDecimal {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

struct FixedDecimalVisitor;

impl<'de> Visitor<'de> for FixedDecimalVisitor {
    type Value = FixedDecimal;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a decimal number as a string or integer")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<FixedDecimal, E> {
        FixedDecimal::parse(v).map_err(E::custom)
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<FixedDecimal, E> {
        Ok(FixedDecimal::from_int(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<FixedDecimal, E> {
        FixedDecimal::parse(&v.to_string()).map_err(E::custom)
    }
}

impl<'de> Deserialize<'de> for FixedDecimal {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(FixedDecimalVisitor)
    }
}
