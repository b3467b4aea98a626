//! Decimal unit strings ("0.5") to smallest units and back.

use thiserror::Error;

use crate::campaign::Amount;

pub const DECIMALS: usize = 18;
pub const WEI_PER_UNIT: Amount = 1_000_000_000_000_000_000;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UnitsError {
    #[error("empty amount")]
    Empty,
    #[error("invalid digit in amount {0:?}")]
    InvalidDigit(String),
    #[error("more than 18 fractional digits in {0:?}")]
    TooPrecise(String),
    #[error("amount {0:?} is too large")]
    Overflow(String),
}

pub fn parse_units(input: &str) -> Result<Amount, UnitsError> {
    let s = input.trim();
    if s.is_empty() {
        return Err(UnitsError::Empty);
    }
    let (whole, frac) = s.split_once('.').unwrap_or((s, ""));
    if whole.is_empty() && frac.is_empty() {
        return Err(UnitsError::InvalidDigit(input.to_string()));
    }
    if !whole.chars().chain(frac.chars()).all(|c| c.is_ascii_digit()) {
        return Err(UnitsError::InvalidDigit(input.to_string()));
    }
    if frac.len() > DECIMALS {
        return Err(UnitsError::TooPrecise(input.to_string()));
    }

    let overflow = || UnitsError::Overflow(input.to_string());
    let whole_value: Amount = if whole.is_empty() {
        0
    } else {
        whole.parse().map_err(|_| overflow())?
    };
    let frac_value: Amount = if frac.is_empty() {
        0
    } else {
        let padded = format!("{frac:0<width$}", width = DECIMALS);
        padded.parse().map_err(|_| overflow())?
    };
    whole_value
        .checked_mul(WEI_PER_UNIT)
        .and_then(|w| w.checked_add(frac_value))
        .ok_or_else(overflow)
}

/// Renders with trailing fractional zeros removed, always keeping one digit
/// after the point ("1.0", "0.5").
pub fn format_units(amount: Amount) -> String {
    let whole = amount / WEI_PER_UNIT;
    let frac = amount % WEI_PER_UNIT;
    let digits = format!("{frac:0width$}", width = DECIMALS);
    let trimmed = digits.trim_end_matches('0');
    if trimmed.is_empty() {
        format!("{whole}.0")
    } else {
        format!("{whole}.{trimmed}")
    }
}
