//! decimal amounts <-> base units

use num_bigint::BigUint;
use num_traits::Zero;

use crate::error::{MixerError, Result};

/// "1.5" with 18 decimals -> 1500000000000000000
pub fn parse_units(amount: &str, decimals: u32) -> Result<BigUint> {
    let amount = amount.trim();
    let invalid = || MixerError::Validation(format!("invalid amount: {}", amount));

    let (whole, fraction) = match amount.split_once('.') {
        Some((w, f)) => (w, f),
        None => (amount, ""),
    };
    if whole.is_empty() && fraction.is_empty() {
        return Err(invalid());
    }
    if !whole.chars().all(|c| c.is_ascii_digit()) || !fraction.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }
    if fraction.len() > decimals as usize {
        return Err(MixerError::Validation(format!(
            "{} has more than {} decimals",
            amount, decimals
        )));
    }

    let digits = format!("{}{:0<width$}", whole, fraction, width = decimals as usize);
    let digits = digits.trim_start_matches('0');
    if digits.is_empty() {
        return Ok(BigUint::zero());
    }
    digits.parse::<BigUint>().map_err(|_| invalid())
}

/// base units back to a decimal string, keeping at most `max_fraction` digits
pub fn format_units(value: &BigUint, decimals: u32, max_fraction: usize) -> String {
    let digits = value.to_string();
    let decimals = decimals as usize;
    let padded = format!("{:0>width$}", digits, width = decimals + 1);
    let (whole, fraction) = padded.split_at(padded.len() - decimals);

    let fraction = &fraction[..fraction.len().min(max_fraction)];
    let fraction = fraction.trim_end_matches('0');
    if fraction.is_empty() {
        whole.to_string()
    } else {
        format!("{}.{}", whole, fraction)
    }
}
