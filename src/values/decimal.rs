use std::fmt;
use std::str::FromStr;

use crate::{FluxlineError, Result};

const SCALE_FACTOR: i128 = 1_000_000_000_000;

// Largest magnitude representable at precision 38, scale 12.
const MAX_SCALED: i128 = 100_000_000_000_000_000_000_000_000_000_000_000_000 - 1;

/// A fixed-point decimal with 38 digits of precision and 12 digits of scale,
/// stored as its scaled integer form. This is the only decimal shape the wire
/// carries (16-byte two's-complement).
///
/// Parsing uses a fixed grammar (optional sign, digits, optional `.` and up
/// to 12 fraction digits) and never consults the process locale.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Decimal(i128);

impl Decimal {
    pub const SCALE: u32 = 12;

    /// Wraps an already-scaled integer (units of 10⁻¹²).
    pub fn from_scaled(scaled: i128) -> Self {
        Decimal(scaled)
    }

    pub fn from_i64(value: i64) -> Self {
        Decimal(value as i128 * SCALE_FACTOR)
    }

    pub fn scaled(&self) -> i128 {
        self.0
    }

    pub fn integer_part(&self) -> i128 {
        self.0 / SCALE_FACTOR
    }

    pub fn fraction_part(&self) -> i128 {
        self.0 % SCALE_FACTOR
    }
}

impl FromStr for Decimal {
    type Err = FluxlineError;

    fn from_str(s: &str) -> Result<Self> {
        let bad = || FluxlineError::Encoding(format!("invalid decimal literal: {s:?}"));

        let (negative, rest) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s.strip_prefix('+').unwrap_or(s)),
        };
        let (int_part, frac_part) = match rest.split_once('.') {
            Some((i, f)) => (i, f),
            None => (rest, ""),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(bad());
        }
        if !int_part.bytes().all(|b| b.is_ascii_digit())
            || !frac_part.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(bad());
        }
        if frac_part.len() > Self::SCALE as usize {
            return Err(FluxlineError::Encoding(format!(
                "decimal literal {s:?} has more than {} fraction digits",
                Self::SCALE
            )));
        }

        let overflow = || FluxlineError::Encoding(format!("decimal literal {s:?} exceeds precision 38"));
        let mut scaled: i128 = 0;
        for b in int_part.bytes() {
            scaled = scaled
                .checked_mul(10)
                .and_then(|v| v.checked_add((b - b'0') as i128))
                .ok_or_else(overflow)?;
        }
        scaled = scaled.checked_mul(SCALE_FACTOR).ok_or_else(overflow)?;
        let mut frac: i128 = 0;
        for b in frac_part.bytes() {
            frac = frac * 10 + (b - b'0') as i128;
        }
        frac *= 10i128.pow(Self::SCALE - frac_part.len() as u32);
        scaled = scaled.checked_add(frac).ok_or_else(overflow)?;
        if scaled > MAX_SCALED {
            return Err(overflow());
        }
        Ok(Decimal(if negative { -scaled } else { scaled }))
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let magnitude = self.0.unsigned_abs();
        let sign = if self.0 < 0 { "-" } else { "" };
        let int = magnitude / SCALE_FACTOR as u128;
        let frac = magnitude % SCALE_FACTOR as u128;
        if frac == 0 {
            write!(f, "{sign}{int}")
        } else {
            let digits = format!("{frac:012}");
            write!(f, "{sign}{int}.{}", digits.trim_end_matches('0'))
        }
    }
}

impl From<i64> for Decimal {
    fn from(value: i64) -> Self {
        Decimal::from_i64(value)
    }
}
