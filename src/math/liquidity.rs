//! Liquidity -> token amounts
//!
//! Standard concentrated-liquidity composition for a position over
//! `[tick_lower, tick_upper)`:
//!
//! - below range: all token0, `L * (1/sqrt(P_lower) - 1/sqrt(P_upper))`
//! - above range: all token1, `L * (sqrt(P_upper) - sqrt(P_lower))`
//! - in range:    `L * (1/sqrt(P) - 1/sqrt(P_upper))` token0 and
//!                `L * (sqrt(P) - sqrt(P_lower))` token1
//!
//! Amounts are in raw (smallest-unit) token terms.

use super::tick::{sqrt_ratio_at_tick, MAX_TICK, MIN_TICK};
use super::WORKING_PRECISION;
use crate::error::{TrackerError, TrackerResult};
use bigdecimal::{BigDecimal, One, Zero};

/// Raw token amounts held by a position
#[derive(Debug, Clone, PartialEq)]
pub struct TokenAmounts {
    pub amount0: BigDecimal,
    pub amount1: BigDecimal,
}

impl TokenAmounts {
    pub fn zero() -> Self {
        Self {
            amount0: BigDecimal::zero(),
            amount1: BigDecimal::zero(),
        }
    }
}

/// Rejects empty/inverted ranges and ticks outside the protocol domain
pub fn validate_range(tick_lower: i32, tick_upper: i32) -> TrackerResult<()> {
    if tick_lower >= tick_upper || tick_lower < MIN_TICK || tick_upper > MAX_TICK {
        return Err(TrackerError::InvalidRange {
            tick_lower,
            tick_upper,
        });
    }
    Ok(())
}

fn clamp_non_negative(value: BigDecimal) -> BigDecimal {
    if value < BigDecimal::zero() {
        BigDecimal::zero()
    } else {
        value
    }
}

/// Token amounts for `liquidity` at the given price.
///
/// `sqrt_price_current` is the pool's sqrt price (token1/token0, raw units).
/// When it is not positive the tick-derived sqrt price is used instead.
/// Precision underflow that would yield tiny negative amounts is clamped to 0.
pub fn amounts_for_liquidity(
    liquidity: u128,
    sqrt_price_current: &BigDecimal,
    tick_lower: i32,
    tick_upper: i32,
    current_tick: i32,
) -> TrackerResult<TokenAmounts> {
    validate_range(tick_lower, tick_upper)?;

    if liquidity == 0 {
        return Ok(TokenAmounts::zero());
    }

    let l = BigDecimal::from(liquidity);
    let sqrt_lower = sqrt_ratio_at_tick(tick_lower);
    let sqrt_upper = sqrt_ratio_at_tick(tick_upper);
    let one = BigDecimal::one();

    let (amount0, amount1) = if current_tick < tick_lower {
        let a0 = &l * &(&one / &sqrt_lower - &one / &sqrt_upper);
        (a0, BigDecimal::zero())
    } else if current_tick >= tick_upper {
        let a1 = &l * &(&sqrt_upper - &sqrt_lower);
        (BigDecimal::zero(), a1)
    } else {
        let sqrt_p = if *sqrt_price_current > BigDecimal::zero() {
            sqrt_price_current.clone()
        } else {
            sqrt_ratio_at_tick(current_tick)
        };
        let a0 = &l * &(&one / &sqrt_p - &one / &sqrt_upper);
        let a1 = &l * &(&sqrt_p - &sqrt_lower);
        (a0, a1)
    };

    Ok(TokenAmounts {
        amount0: clamp_non_negative(amount0.with_prec(WORKING_PRECISION)),
        amount1: clamp_non_negative(amount1.with_prec(WORKING_PRECISION)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::ToPrimitive;
    use std::str::FromStr;

    fn big(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    fn assert_close(actual: &BigDecimal, expected: &str) {
        let diff = (actual - &big(expected)).abs();
        assert!(diff < big("1e-20"), "expected {} got {}", expected, actual);
    }

    #[test]
    fn test_zero_liquidity_is_zero() {
        let cases = [(-100, 100, 0), (-100, 100, -500), (-100, 100, 500), (10, 20, 20)];
        for (lower, upper, current) in cases {
            let amounts =
                amounts_for_liquidity(0, &sqrt_ratio_at_tick(current), lower, upper, current)
                    .unwrap();
            assert!(amounts.amount0.is_zero());
            assert!(amounts.amount1.is_zero());
        }
    }

    #[test]
    fn test_empty_range_rejected() {
        let err = amounts_for_liquidity(1_000, &BigDecimal::one(), 50, 50, 50).unwrap_err();
        assert!(matches!(
            err,
            TrackerError::InvalidRange {
                tick_lower: 50,
                tick_upper: 50
            }
        ));
        assert!(amounts_for_liquidity(1_000, &BigDecimal::one(), 60, 50, 55).is_err());
        assert!(amounts_for_liquidity(1_000, &BigDecimal::one(), MIN_TICK - 1, 0, -5).is_err());
    }

    #[test]
    fn test_in_range_scenario() {
        // L = 1,000,000 over [-100, 100) at tick 0 (sqrt price exactly 1)
        let amounts =
            amounts_for_liquidity(1_000_000, &BigDecimal::one(), -100, 100, 0).unwrap();

        assert!(amounts.amount0 > BigDecimal::zero());
        assert!(amounts.amount1 > BigDecimal::zero());
        assert_close(&amounts.amount0, "4987.27207074909613350022652784453962952448");
        assert_close(&amounts.amount1, "4987.27207074909613350022652784453962952448");

        // Independent closed form in f64
        let l = 1_000_000f64;
        let sqrt_upper = 1.0001f64.powf(50.0);
        let sqrt_lower = 1.0001f64.powf(-50.0);
        let expected0 = l * (1.0 - 1.0 / sqrt_upper);
        let expected1 = l * (1.0 - sqrt_lower);
        assert!((amounts.amount0.to_f64().unwrap() - expected0).abs() < 1e-6);
        assert!((amounts.amount1.to_f64().unwrap() - expected1).abs() < 1e-6);
    }

    #[test]
    fn test_below_range_all_token0() {
        let amounts =
            amounts_for_liquidity(1_000_000, &sqrt_ratio_at_tick(-200), -100, 100, -200).unwrap();
        assert!(amounts.amount1.is_zero());
        assert_close(&amounts.amount0, "9999.54169380029963419403782080584110534763");
    }

    #[test]
    fn test_above_range_all_token1() {
        let amounts =
            amounts_for_liquidity(1_000_000, &sqrt_ratio_at_tick(100), -100, 100, 100).unwrap();
        assert!(amounts.amount0.is_zero());
        assert_close(&amounts.amount1, "9999.54169380029963419403782080584110534763");
    }

    #[test]
    fn test_out_of_range_ignores_sqrt_price() {
        // Only the tick decides the regime; a stale sqrt price has no effect
        let a = amounts_for_liquidity(5_000, &BigDecimal::one(), 10, 20, 25).unwrap();
        let b = amounts_for_liquidity(5_000, &big("3.5"), 10, 20, 25).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_negative_underflow_clamped() {
        // Tick says in range but sqrt price sits just below the lower bound
        let below = &sqrt_ratio_at_tick(0) - &big("0.000000001");
        let amounts = amounts_for_liquidity(1_000_000, &below, 0, 100, 0).unwrap();
        assert!(amounts.amount1.is_zero());
        assert!(amounts.amount0 > BigDecimal::zero());
    }

    #[test]
    fn test_non_positive_sqrt_price_falls_back_to_tick() {
        let from_tick = amounts_for_liquidity(1_000_000, &BigDecimal::zero(), -100, 100, 0).unwrap();
        let explicit = amounts_for_liquidity(1_000_000, &BigDecimal::one(), -100, 100, 0).unwrap();
        assert_close(&from_tick.amount0, &explicit.amount0.to_string());
        assert_close(&from_tick.amount1, &explicit.amount1.to_string());
    }
}
