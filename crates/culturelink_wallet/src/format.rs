//! Address and amount formatting helpers.
//!
//! Amounts are carried as integers in the chain's smallest unit (wei for
//! 18-decimal currencies). All conversions are string based so they work for
//! any number of decimals.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A wallet account exactly as reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Account(String);

impl Account {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Hex addresses are case-insensitive (checksum casing is presentation).
    pub fn matches(&self, other: &Account) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }

    /// Shortened form for display, e.g. `0x1234...abcd`.
    pub fn short(&self) -> String {
        short_address(&self.0)
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Account {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Errors from parsing human-readable amounts.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormatError {
    #[error("amount is empty")]
    Empty,
    #[error("invalid amount: {0}")]
    Invalid(String),
    #[error("too many decimal places (max {max})")]
    TooManyDecimals { max: u8 },
    #[error("amount does not fit in 128 bits")]
    Overflow,
}

/// `0x` followed by exactly 40 hex digits.
pub fn is_valid_address(address: &str) -> bool {
    match address.strip_prefix("0x").or_else(|| address.strip_prefix("0X")) {
        Some(hex) => hex.len() == 40 && hex.chars().all(|c| c.is_ascii_hexdigit()),
        None => false,
    }
}

pub fn short_address(address: &str) -> String {
    if address.len() <= 10 || !address.is_ascii() {
        return address.to_string();
    }
    format!("{}...{}", &address[..6], &address[address.len() - 4..])
}

/// Render `value` (smallest unit) as a decimal string with trailing zeros
/// trimmed: `format_units(1_500_000_000_000_000_000, 18) == "1.5"`.
pub fn format_units(value: u128, decimals: u8) -> String {
    let digits = value.to_string();
    let decimals = decimals as usize;
    if decimals == 0 {
        return digits;
    }
    let padded = format!("{digits:0>width$}", width = decimals + 1);
    let (int_part, frac_part) = padded.split_at(padded.len() - decimals);
    let frac = frac_part.trim_end_matches('0');
    if frac.is_empty() {
        int_part.to_string()
    } else {
        format!("{int_part}.{frac}")
    }
}

/// Like [`format_units`] but truncated to at most `precision` fractional
/// digits, for balance labels.
pub fn format_balance(value: u128, decimals: u8, precision: usize) -> String {
    let full = format_units(value, decimals);
    match full.split_once('.') {
        Some((int_part, frac)) if frac.len() > precision => {
            let frac = frac[..precision].trim_end_matches('0');
            if frac.is_empty() {
                int_part.to_string()
            } else {
                format!("{int_part}.{frac}")
            }
        }
        _ => full,
    }
}

/// Parse a human-readable amount into the smallest unit:
/// `parse_units("1.5", 18) == Ok(1_500_000_000_000_000_000)`.
pub fn parse_units(amount: &str, decimals: u8) -> Result<u128, FormatError> {
    let amount = amount.trim();
    if amount.is_empty() {
        return Err(FormatError::Empty);
    }
    let (int_part, frac_part) = match amount.split_once('.') {
        Some((i, f)) => (i, f),
        None => (amount, ""),
    };
    if int_part.is_empty() && frac_part.is_empty() {
        return Err(FormatError::Invalid(amount.to_string()));
    }
    let all_digits = |s: &str| s.chars().all(|c| c.is_ascii_digit());
    if !all_digits(int_part) || !all_digits(frac_part) {
        return Err(FormatError::Invalid(amount.to_string()));
    }
    if frac_part.len() > decimals as usize {
        return Err(FormatError::TooManyDecimals { max: decimals });
    }

    let combined = format!(
        "{int_part}{frac_part:0<width$}",
        width = decimals as usize
    );
    let trimmed = combined.trim_start_matches('0');
    if trimmed.is_empty() {
        return Ok(0);
    }
    trimmed.parse::<u128>().map_err(|_| FormatError::Overflow)
}

/// Encode an integer as a JSON-RPC quantity (`0x`-prefixed, no leading zeros).
pub fn to_quantity(value: u128) -> String {
    format!("{value:#x}")
}

/// Decode a JSON-RPC quantity. Accepts hex strings, decimal strings and JSON
/// numbers since wallets are inconsistent about it.
pub fn parse_quantity(value: &Value) -> Option<u128> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
                if hex.is_empty() {
                    return Some(0);
                }
                u128::from_str_radix(hex, 16).ok()
            } else {
                s.parse().ok()
            }
        }
        Value::Number(n) => n.as_u64().map(u128::from),
        _ => None,
    }
}
