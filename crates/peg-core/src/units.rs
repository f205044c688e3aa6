//! Exact decimal ↔ atomic unit conversion.
//!
//! Amounts arrive as decimal text and are held as an integer mantissa plus a
//! scale, so no floating point is ever involved. Converting to atomic units
//! either produces an exact integer or fails; it never rounds.

use std::fmt;
use std::str::FromStr;

use crate::error::{Result, TreasuryError};

/// An exact decimal amount such as `1.5` or `-5`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DecimalAmount {
    negative: bool,
    digits: u128,
    /// Number of fractional digits in `digits`; trailing zeros are trimmed.
    scale: u32,
}

impl DecimalAmount {
    /// A whole-number amount.
    pub fn from_whole(units: u64) -> Self {
        Self {
            negative: false,
            digits: units as u128,
            scale: 0,
        }
    }

    /// The decimal value of `atomic` units at `decimals` precision.
    pub fn from_atomic(atomic: u64, decimals: u8) -> Self {
        Self::normalized(false, atomic as u128, decimals as u32)
    }

    fn normalized(negative: bool, mut digits: u128, mut scale: u32) -> Self {
        while scale > 0 && digits % 10 == 0 {
            digits /= 10;
            scale -= 1;
        }
        Self {
            negative: negative && digits != 0,
            digits,
            scale,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.digits == 0
    }

    pub fn is_negative(&self) -> bool {
        self.negative
    }

    /// Strictly greater than zero.
    pub fn is_positive(&self) -> bool {
        !self.negative && self.digits > 0
    }

    /// Fractional digits after trimming trailing zeros.
    pub fn scale(&self) -> u32 {
        self.scale
    }
}

impl FromStr for DecimalAmount {
    type Err = TreasuryError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = |why: &str| TreasuryError::InvalidAmount(format!("{s:?}: {why}"));

        let text = s.trim();
        let (negative, unsigned) = match text.as_bytes().first() {
            Some(b'-') => (true, &text[1..]),
            Some(b'+') => (false, &text[1..]),
            _ => (false, text),
        };

        let (int_part, frac_part) = match unsigned.split_once('.') {
            Some((i, f)) => (i, f),
            None => (unsigned, ""),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(invalid("no digits"));
        }
        // Trailing fractional zeros carry no value.
        let frac_part = frac_part.trim_end_matches('0');

        let mut digits: u128 = 0;
        for c in int_part.chars().chain(frac_part.chars()) {
            let d = c.to_digit(10).ok_or_else(|| invalid("not a decimal number"))?;
            digits = digits
                .checked_mul(10)
                .and_then(|v| v.checked_add(d as u128))
                .ok_or_else(|| invalid("too many digits"))?;
        }

        let scale = u32::try_from(frac_part.len()).map_err(|_| invalid("too many digits"))?;
        Ok(Self::normalized(negative, digits, scale))
    }
}

impl fmt::Display for DecimalAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.negative { "-" } else { "" };
        if self.scale == 0 {
            return write!(f, "{sign}{}", self.digits);
        }

        let text = format!("{:0>width$}", self.digits, width = self.scale as usize + 1);
        let (int_part, frac_part) = text.split_at(text.len() - self.scale as usize);
        write!(f, "{sign}{int_part}.{frac_part}")
    }
}

/// Convert `amount` to atomic units at `decimals` precision.
///
/// Fails with `InvalidAmount` when the amount is negative, has more
/// fractional digits than the token supports, or does not fit a `u64`.
pub fn to_atomic(amount: &DecimalAmount, decimals: u8) -> Result<u64> {
    if amount.negative {
        return Err(TreasuryError::InvalidAmount(format!(
            "{amount} is negative"
        )));
    }

    let decimals = decimals as u32;
    if amount.scale > decimals {
        return Err(TreasuryError::InvalidAmount(format!(
            "{amount} is finer than {decimals}-decimal precision"
        )));
    }

    10u128
        .checked_pow(decimals - amount.scale)
        .and_then(|factor| amount.digits.checked_mul(factor))
        .and_then(|atomic| u64::try_from(atomic).ok())
        .ok_or_else(|| {
            TreasuryError::InvalidAmount(format!("{amount} overflows {decimals}-decimal atomic units"))
        })
}

/// `10^(pegged_decimals - reserve_decimals)`: pegged atomic units backed by
/// one reserve atomic unit.
pub fn precision_multiplier(reserve_decimals: u8, pegged_decimals: u8) -> Result<u64> {
    let unsupported = || TreasuryError::UnsupportedPrecision {
        reserve: reserve_decimals,
        pegged: pegged_decimals,
    };

    let diff = pegged_decimals
        .checked_sub(reserve_decimals)
        .ok_or_else(unsupported)?;
    10u64.checked_pow(diff as u32).ok_or_else(unsupported)
}

/// Reserve atomic units → pegged atomic units.
pub fn reserve_to_pegged(reserve_atomic: u64, multiplier: u64) -> Result<u64> {
    reserve_atomic.checked_mul(multiplier).ok_or_else(|| {
        TreasuryError::InvalidAmount(format!(
            "{reserve_atomic} reserve units overflow the pegged token"
        ))
    })
}

/// Pegged atomic units → reserve atomic units. The pegged amount must be a
/// whole number of reserve units.
pub fn pegged_to_reserve(pegged_atomic: u64, multiplier: u64) -> Result<u64> {
    if multiplier == 0 || pegged_atomic % multiplier != 0 {
        return Err(TreasuryError::InvalidAmount(format!(
            "{pegged_atomic} pegged units are not a whole number of reserve units"
        )));
    }
    Ok(pegged_atomic / multiplier)
}

/// Render atomic units as a trimmed decimal string, e.g. `1500000 @ 6` →
/// `"1.5"`.
pub fn format_atomic(atomic: u64, decimals: u8) -> String {
    DecimalAmount::from_atomic(atomic, decimals).to_string()
}
