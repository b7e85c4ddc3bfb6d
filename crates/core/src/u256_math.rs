//! Fixed-point helpers for USD figures and percentages.
//!
//! Comet reports USD values with 8 decimals; configuration uses 18.
//! Percentages are applied through a 10^10 mantissa so fractional
//! percentages survive integer arithmetic.

use alloy::primitives::U256;

/// Scale used to carry fractional percentages through integer math.
pub const PERCENTAGE_VALUE_MANTISSA: u64 = 10_000_000_000;

/// Decimals of Comet's USD figures.
pub const PRICE_FACTOR_SCALE_DIGITS: u8 = 8;

const E18: U256 = U256::from_limbs([1_000_000_000_000_000_000u64, 0, 0, 0]);

/// `10^exp` as U256.
#[inline]
pub fn pow10(exp: u8) -> U256 {
    U256::from(10u64).pow(U256::from(exp))
}

/// `value * percent / 100`, truncated. `percent` keeps ten decimal places.
pub fn percentage_value(value: U256, percent: f64) -> U256 {
    let scaled_percent = (percent * PERCENTAGE_VALUE_MANTISSA as f64).trunc();
    if scaled_percent <= 0.0 {
        return U256::ZERO;
    }
    let factor = U256::from(scaled_percent as u128);
    value.saturating_mul(factor) / U256::from(PERCENTAGE_VALUE_MANTISSA) / U256::from(100u64)
}

/// `numerator / denominator * 100` with ten decimals of precision, or 0
/// when the denominator is zero.
pub fn ratio_percentage(numerator: U256, denominator: U256) -> f64 {
    if denominator.is_zero() {
        return 0.0;
    }
    let scaled = numerator.saturating_mul(U256::from(PERCENTAGE_VALUE_MANTISSA)) / denominator;
    (to_f64(scaled) / PERCENTAGE_VALUE_MANTISSA as f64) * 100.0
}

/// Convert an 18-decimal USD amount to Comet's 8-decimal scale.
pub fn usd_e18_to_price_factor_scale(value_e18: U256) -> U256 {
    value_e18.saturating_mul(pow10(PRICE_FACTOR_SCALE_DIGITS)) / E18
}

/// Lossy conversion for ratios and logging. Saturates at `u128::MAX`.
pub fn to_f64(value: U256) -> f64 {
    value.saturating_to::<u128>() as f64
}

/// Render an 8-decimal USD figure for logs.
pub fn price_factor_to_usd(value: U256) -> f64 {
    to_f64(value) / 10f64.powi(PRICE_FACTOR_SCALE_DIGITS as i32)
}
