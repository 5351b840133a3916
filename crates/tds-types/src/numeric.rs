//! Exact fixed-point values for DECIMAL and NUMERIC columns.
//!
//! SQL Server decimals carry up to 38 significant digits, which does not fit
//! `rust_decimal` (28 digits) so the native representation here is an `i128`
//! unscaled value plus a scale.

use std::fmt;
use std::str::FromStr;

use crate::error::TypeError;

/// Largest precision a decimal column may declare.
pub const MAX_PRECISION: u8 = 38;

const POW10_38: i128 = 10i128.pow(38);

/// A decimal value: `value / 10^scale`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Numeric {
    value: i128,
    scale: u8,
}

impl Numeric {
    /// Create a numeric from an unscaled value and a scale.
    pub fn new(value: i128, scale: u8) -> Result<Self, TypeError> {
        if scale > MAX_PRECISION {
            return Err(TypeError::overflow("decimal", format!("scale {scale}")));
        }
        if value.unsigned_abs() >= POW10_38 as u128 {
            return Err(TypeError::overflow("decimal(38)", value));
        }
        Ok(Self { value, scale })
    }

    /// The unscaled integer value.
    #[must_use]
    pub fn value(&self) -> i128 {
        self.value
    }

    /// Digits after the decimal point.
    #[must_use]
    pub fn scale(&self) -> u8 {
        self.scale
    }

    /// Number of significant digits in the unscaled value (at least 1).
    #[must_use]
    pub fn precision(&self) -> u8 {
        let mut magnitude = self.value.unsigned_abs();
        let mut digits = 1u8;
        while magnitude >= 10 {
            magnitude /= 10;
            digits += 1;
        }
        digits
    }

    /// Whether the value is negative.
    #[must_use]
    pub fn is_negative(&self) -> bool {
        self.value < 0
    }

    /// The same quantity at a different scale.
    ///
    /// Scaling down fails with [`TypeError::Overflow`] if digits would be
    /// lost; scaling up fails if the result exceeds 38 digits.
    pub fn rescale(&self, scale: u8) -> Result<Self, TypeError> {
        if scale > MAX_PRECISION {
            return Err(TypeError::overflow("decimal", format!("scale {scale}")));
        }
        if scale >= self.scale {
            let factor = 10i128.pow(u32::from(scale - self.scale));
            let value = self
                .value
                .checked_mul(factor)
                .ok_or_else(|| {
                    TypeError::overflow("decimal(38)", format!("{self} at scale {scale}"))
                })?;
            return Self::new(value, scale);
        }
        let factor = 10i128.pow(u32::from(self.scale - scale));
        if self.value % factor != 0 {
            return Err(TypeError::overflow(
                "decimal",
                format!("{self} at scale {scale} without rounding"),
            ));
        }
        Self::new(self.value / factor, scale)
    }
}

impl fmt::Display for Numeric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let digits = self.value.unsigned_abs().to_string();
        let sign = if self.value < 0 { "-" } else { "" };
        let scale = usize::from(self.scale);
        if scale == 0 {
            return write!(f, "{sign}{digits}");
        }
        let padded = format!("{digits:0>width$}", width = scale + 1);
        let (int_part, frac_part) = padded.split_at(padded.len() - scale);
        write!(f, "{sign}{int_part}.{frac_part}")
    }
}

impl FromStr for Numeric {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || TypeError::malformed("decimal text", format!("{s:?}"));
        let trimmed = s.trim();
        let (negative, unsigned) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
        };
        let (int_part, frac_part) = unsigned.split_once('.').unwrap_or((unsigned, ""));
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(invalid());
        }
        if !int_part.bytes().chain(frac_part.bytes()).all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let scale = u8::try_from(frac_part.len()).map_err(|_| invalid())?;
        let digits = format!("{int_part}{frac_part}");
        let magnitude: i128 = digits
            .parse()
            .map_err(|_| TypeError::overflow("decimal(38)", trimmed))?;
        Self::new(if negative { -magnitude } else { magnitude }, scale)
    }
}

impl From<i64> for Numeric {
    fn from(value: i64) -> Self {
        Self {
            value: i128::from(value),
            scale: 0,
        }
    }
}

#[cfg(feature = "decimal")]
impl From<rust_decimal::Decimal> for Numeric {
    fn from(value: rust_decimal::Decimal) -> Self {
        // 96-bit mantissa and scale <= 28 always fit 38 digits.
        Self {
            value: value.mantissa(),
            scale: value.scale() as u8,
        }
    }
}

#[cfg(feature = "decimal")]
impl TryFrom<Numeric> for rust_decimal::Decimal {
    type Error = TypeError;

    fn try_from(value: Numeric) -> Result<Self, Self::Error> {
        rust_decimal::Decimal::try_from_i128_with_scale(value.value, u32::from(value.scale))
            .map_err(|_| TypeError::overflow("rust_decimal::Decimal", value))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(Numeric::new(12345, 2).unwrap().to_string(), "123.45");
        assert_eq!(Numeric::new(-5, 3).unwrap().to_string(), "-0.005");
        assert_eq!(Numeric::new(42, 0).unwrap().to_string(), "42");
    }

    #[test]
    fn test_parse() {
        let n: Numeric = "-0.050".parse().unwrap();
        assert_eq!((n.value(), n.scale()), (-50, 3));
        assert!("1.2.3".parse::<Numeric>().is_err());
        assert!("".parse::<Numeric>().is_err());
        assert!("12a".parse::<Numeric>().is_err());
    }

    #[test]
    fn test_max_precision() {
        let max = "99999999999999999999999999999999999999".parse::<Numeric>().unwrap();
        assert_eq!(max.precision(), 38);
        assert!("100000000000000000000000000000000000000".parse::<Numeric>().is_err());
    }

    #[test]
    fn test_rescale() {
        let n = Numeric::new(1500, 3).unwrap();
        assert_eq!(n.rescale(1).unwrap(), Numeric::new(15, 1).unwrap());
        assert_eq!(n.rescale(5).unwrap(), Numeric::new(150_000, 5).unwrap());
        assert!(matches!(
            Numeric::new(1501, 3).unwrap().rescale(1),
            Err(TypeError::Overflow { .. })
        ));
    }

    #[cfg(feature = "decimal")]
    #[test]
    fn test_rust_decimal_interop() {
        let d = rust_decimal::Decimal::new(-12345, 2);
        let n = Numeric::from(d);
        assert_eq!(n.to_string(), "-123.45");
        assert_eq!(rust_decimal::Decimal::try_from(n).unwrap(), d);

        let wide = "12345678901234567890123456789012345678".parse::<Numeric>().unwrap();
        assert!(rust_decimal::Decimal::try_from(wide).is_err());
    }
}
