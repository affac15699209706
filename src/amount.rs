//! Amount handling utilities for token decimals

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use std::str::FromStr;

/// Wrapped SOL, the default base asset
pub const BASE_MINT: &str = "So11111111111111111111111111111111111111112";

/// USDC, the default quote asset
pub const QUOTE_MINT: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";

/// Largest token decimals accepted in configuration
pub const MAX_TOKEN_DECIMALS: u8 = 18;

/// 10^decimals, or an error when it does not fit a u64
fn unit_multiplier(decimals: u8) -> anyhow::Result<Decimal> {
    10u64
        .checked_pow(decimals as u32)
        .map(Decimal::from)
        .ok_or_else(|| anyhow::anyhow!("Unsupported token decimals: {}", decimals))
}

/// Convert UI amount (human readable) to raw amount (u64)
///
/// Truncates toward zero. Rejects negative amounts, amounts that overflow
/// u64, and non-zero amounts that truncate to zero.
pub fn to_raw_amount(ui_amount: Decimal, decimals: u8) -> anyhow::Result<u64> {
    if ui_amount < Decimal::ZERO {
        return Err(anyhow::anyhow!("Amount cannot be negative: {}", ui_amount));
    }

    let multiplier = unit_multiplier(decimals)?;
    let raw = ui_amount
        .checked_mul(multiplier)
        .ok_or_else(|| anyhow::anyhow!("Amount {} with {} decimals overflows", ui_amount, decimals))?;

    let raw_u64 = raw.trunc().to_u64().ok_or_else(|| {
        anyhow::anyhow!(
            "Amount {} with {} decimals overflows u64",
            ui_amount,
            decimals
        )
    })?;

    if raw_u64 == 0 && ui_amount > Decimal::ZERO {
        return Err(anyhow::anyhow!(
            "Amount {} too small for {} decimals (rounds to 0)",
            ui_amount,
            decimals
        ));
    }

    Ok(raw_u64)
}

/// Convert raw amount (u64) to UI amount (human readable)
pub fn from_raw_amount(raw_amount: u64, decimals: u8) -> anyhow::Result<Decimal> {
    let divisor = unit_multiplier(decimals)?;
    Ok(Decimal::from(raw_amount) / divisor)
}

/// Decimal with the shortest digits that print as `value`, so 1.005 stays
/// 1.005 rather than its binary neighbour. `None` for NaN and infinities.
pub fn decimal_from_f64(value: f64) -> Option<Decimal> {
    Decimal::from_str(&value.to_string()).ok()
}

/// `to_raw_amount` for the f64 values the strategy works in
pub fn ui_to_raw(ui_amount: f64, decimals: u8) -> anyhow::Result<u64> {
    let amount = decimal_from_f64(ui_amount)
        .ok_or_else(|| anyhow::anyhow!("Amount {} is not representable", ui_amount))?;
    to_raw_amount(amount, decimals)
}

/// Raw amount back to f64 UI units
pub fn raw_to_ui(raw_amount: u64, decimals: u8) -> anyhow::Result<f64> {
    let amount = from_raw_amount(raw_amount, decimals)?;
    amount
        .to_f64()
        .ok_or_else(|| anyhow::anyhow!("Amount {} is not representable", amount))
}

/// Round half away from zero to `places` decimals.
pub fn round_money(value: Decimal, places: u32) -> Decimal {
    value.round_dp_with_strategy(places, RoundingStrategy::MidpointAwayFromZero)
}

/// `round_money` for f64 ratios and scores. Non-finite input is returned as is.
pub fn round_dp(value: f64, places: u32) -> f64 {
    decimal_from_f64(value)
        .map(|d| round_money(d, places))
        .and_then(|d| d.to_f64())
        .unwrap_or(value)
}

pub fn clamp(value: f64, min: f64, max: f64) -> f64 {
    value.max(min).min(max)
}
