//! Fixed-point tick math for concentrated liquidity
//!
//! All ratio and amount math runs in `BigDecimal` at a fixed working
//! precision so that `1.0001^tick` stays accurate across the full tick
//! domain (+/- 887,272). Results are converted to `rust_decimal::Decimal`
//! only once they are in human units.

pub mod liquidity;
pub mod tick;

pub use liquidity::{amounts_for_liquidity, TokenAmounts};
pub use tick::{
    price_ratio_adjusted_for_decimals, sqrt_price_from_x96, sqrt_ratio_at_tick, tick_to_price_ratio,
    MAX_TICK, MIN_TICK,
};

use alloy::primitives::U256;
use bigdecimal::num_bigint::{BigInt, Sign};
use bigdecimal::{BigDecimal, ToPrimitive};
use rust_decimal::Decimal;

/// Significant digits kept after every multiplication
pub const WORKING_PRECISION: u64 = 60;

/// Largest scale a `rust_decimal::Decimal` can carry
const MAX_DECIMAL_SCALE: u32 = 28;

/// 10^exp as an exact BigDecimal (exp may be negative)
pub fn pow10(exp: i64) -> BigDecimal {
    BigDecimal::new(BigInt::from(1), -exp)
}

/// Exact U256 -> BigDecimal
pub fn u256_to_big(value: U256) -> BigDecimal {
    BigDecimal::from(BigInt::from_bytes_be(Sign::Plus, &value.to_be_bytes::<32>()))
}

/// Raw smallest-unit amount -> human units
pub fn to_human_units(raw: &BigDecimal, decimals: u8) -> BigDecimal {
    raw * &pow10(-(decimals as i64))
}

/// Convert to `Decimal`, keeping as many fractional digits as fit.
///
/// Returns `None` only when the integer part alone overflows 96 bits.
pub fn to_decimal(value: &BigDecimal) -> Option<Decimal> {
    for scale in (0..=MAX_DECIMAL_SCALE).rev() {
        let (mantissa, _) = value.with_scale(scale as i64).as_bigint_and_exponent();
        if let Some(m) = mantissa.to_i128() {
            if let Ok(d) = Decimal::try_from_i128_with_scale(m, scale) {
                return Some(d.normalize());
            }
        }
    }
    None
}

/// Raw on-chain integer -> human-unit `Decimal`
pub fn raw_to_decimal(raw: u128, decimals: u8) -> Option<Decimal> {
    to_decimal(&to_human_units(&BigDecimal::from(raw), decimals))
}

/// Raw uint256 event amount -> human-unit `Decimal`
pub fn raw_u256_to_decimal(raw: U256, decimals: u8) -> Option<Decimal> {
    to_decimal(&to_human_units(&u256_to_big(raw), decimals))
}
