//! Tick <-> price ratio conversions
//!
//! Price = 1.0001^tick (token1 per token0, in raw units).
//! V3 pools sort tokens by address, so the raw ratio must be adjusted by
//! 10^(decimals0 - decimals1) and possibly inverted before it reads as a
//! human price.

use super::WORKING_PRECISION;
use bigdecimal::num_bigint::BigInt;
use bigdecimal::{BigDecimal, One, Zero};
use alloy::primitives::U256;

/// Lowest tick supported by the V3 core contracts
pub const MIN_TICK: i32 = -887_272;
/// Highest tick supported by the V3 core contracts
pub const MAX_TICK: i32 = 887_272;

/// 1.0001
fn tick_base() -> BigDecimal {
    BigDecimal::new(BigInt::from(10_001), 4)
}

/// 2^96, the Q64.96 scaling factor of sqrtPriceX96
fn q96() -> BigDecimal {
    BigDecimal::from(BigInt::from(1u128 << 96))
}

/// Returns `1.0001^tick` at `WORKING_PRECISION` significant digits.
///
/// Exponentiation by squaring; every intermediate product is rounded to the
/// working precision so error stays far below 30 significant digits even at
/// the tick extremes.
pub fn tick_to_price_ratio(tick: i32) -> BigDecimal {
    let mut result = BigDecimal::one();
    let mut base = tick_base();
    let mut n = tick.unsigned_abs();

    while n > 0 {
        if n & 1 == 1 {
            result = (&result * &base).with_prec(WORKING_PRECISION);
        }
        base = (&base * &base).with_prec(WORKING_PRECISION);
        n >>= 1;
    }

    if tick < 0 {
        result.inverse().with_prec(WORKING_PRECISION)
    } else {
        result
    }
}

/// Returns `sqrt(1.0001^tick)`
pub fn sqrt_ratio_at_tick(tick: i32) -> BigDecimal {
    match tick_to_price_ratio(tick).sqrt() {
        Some(root) => root.with_prec(WORKING_PRECISION),
        // 1.0001^tick is always strictly positive
        None => BigDecimal::zero(),
    }
}

/// Converts an on-chain sqrtPriceX96 (Q64.96) into a plain sqrt price
pub fn sqrt_price_from_x96(sqrt_price_x96: U256) -> BigDecimal {
    (super::u256_to_big(sqrt_price_x96) / q96()).with_prec(WORKING_PRECISION)
}

/// Scales a raw token-unit ratio by `10^(decimals_a - decimals_b)`
///
/// For a V3 pool ratio (token1 per token0) pass `(decimals0, decimals1)`
/// to get the human price of token0 denominated in token1.
pub fn price_ratio_adjusted_for_decimals(
    ratio: &BigDecimal,
    decimals_a: u8,
    decimals_b: u8,
) -> BigDecimal {
    let exp = decimals_a as i64 - decimals_b as i64;
    (ratio * &super::pow10(exp)).with_prec(WORKING_PRECISION)
}
