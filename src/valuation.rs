//! Position Valuation
//!
//! Turns a `PositionState` plus USD quotes into token balances, USD value
//! and pending-fee value. Pure: no RPC, no clock.
//!
//! Key features:
//! - Stable side detected by address against a known-stable set
//! - Stable token pinned to $1, volatile token priced from the quote
//! - Missing quote never blocks: zero values flagged `PriceUnavailable`
//! - Invalid tick ranges produce a flagged result, never a plausible number

use crate::math::{
    self, amounts_for_liquidity, price_ratio_adjusted_for_decimals, sqrt_price_from_x96,
    tick_to_price_ratio, WORKING_PRECISION,
};
use crate::types::{PositionState, StableSet, StableSide, ValuationSnapshot};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// USD quotes for each side of the pair (the stable side may be left empty)
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct UsdQuotes {
    pub token0: Option<Decimal>,
    pub token1: Option<Decimal>,
    /// At least one quote is a last-known-good fallback
    pub stale: bool,
}

impl UsdQuotes {
    /// Quote for the volatile side of a pair with one stable token
    pub fn volatile(side: StableSide, price: Decimal, stale: bool) -> Self {
        match side {
            StableSide::Token0 => Self {
                token0: None,
                token1: Some(price),
                stale,
            },
            _ => Self {
                token0: Some(price),
                token1: None,
                stale,
            },
        }
    }
}

/// How trustworthy a valuation is
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValuationStatus {
    /// Priced from live quotes
    Live,
    /// Priced from a last-known-good quote
    Stale,
    /// No usable quote; USD values are zero
    PriceUnavailable,
    /// Position state is structurally invalid; all values are zero
    Invalid(String),
}

/// Range bounds expressed as the volatile token's price in the stable token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRange {
    pub lower: Decimal,
    pub upper: Decimal,
    pub current: Decimal,
}

/// Full valuation of one position at one point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Valuation {
    pub stable_side: StableSide,
    /// Human-unit balances
    pub amount0: Decimal,
    pub amount1: Decimal,
    /// Uncollected fees, human units
    pub pending0: Decimal,
    pub pending1: Decimal,
    /// USD prices used (stable side pinned to 1)
    pub price0_usd: Decimal,
    pub price1_usd: Decimal,
    pub value_usd: Decimal,
    pub pending_fees_usd: Decimal,
    pub in_range: bool,
    pub range: Option<PriceRange>,
    pub status: ValuationStatus,
}

impl Valuation {
    fn invalid(position: &PositionState, side: StableSide, reason: String) -> Self {
        Self {
            stable_side: side,
            amount0: Decimal::ZERO,
            amount1: Decimal::ZERO,
            pending0: Decimal::ZERO,
            pending1: Decimal::ZERO,
            price0_usd: Decimal::ZERO,
            price1_usd: Decimal::ZERO,
            value_usd: Decimal::ZERO,
            pending_fees_usd: Decimal::ZERO,
            in_range: position.in_range(),
            range: None,
            status: ValuationStatus::Invalid(reason),
        }
    }

    /// USD value can be used by the metrics layer
    pub fn is_priced(&self) -> bool {
        matches!(self.status, ValuationStatus::Live | ValuationStatus::Stale)
    }

    /// USD price of the non-stable token (token0 when neither side is stable)
    pub fn price_volatile(&self) -> Decimal {
        match self.stable_side {
            StableSide::Token0 => self.price1_usd,
            _ => self.price0_usd,
        }
    }

    pub fn to_snapshot(&self, timestamp: DateTime<Utc>) -> ValuationSnapshot {
        ValuationSnapshot {
            timestamp,
            amount0: self.amount0,
            amount1: self.amount1,
            price_volatile: self.price_volatile(),
            value_usd: self.value_usd,
            pending_fees_usd: self.pending_fees_usd,
            in_range: self.in_range,
            price_stale: self.status == ValuationStatus::Stale,
        }
    }
}

/// Resolves the USD price of each side, pinning the stable side to 1.
///
/// With neither side stable both quotes are required.
pub fn resolve_prices(side: StableSide, quotes: &UsdQuotes) -> Option<(Decimal, Decimal)> {
    match side {
        StableSide::Token0 => quotes.token1.map(|p1| (Decimal::ONE, p1)),
        StableSide::Token1 => quotes.token0.map(|p0| (p0, Decimal::ONE)),
        StableSide::Neither => match (quotes.token0, quotes.token1) {
            (Some(p0), Some(p1)) => Some((p0, p1)),
            _ => None,
        },
    }
}

/// Price of the volatile token in stable units at `tick`.
///
/// The pool ratio is token1 per token0, so it is inverted when token0 is the
/// stable side. With neither side stable this is token0 priced in token1.
pub fn volatile_price_at_tick(position: &PositionState, tick: i32, side: StableSide) -> Option<Decimal> {
    let ratio = tick_to_price_ratio(tick);
    let token1_per_token0 =
        price_ratio_adjusted_for_decimals(&ratio, position.token0.decimals, position.token1.decimals);
    let price = match side {
        StableSide::Token0 => token1_per_token0.inverse().with_prec(WORKING_PRECISION),
        StableSide::Token1 | StableSide::Neither => token1_per_token0,
    };
    math::to_decimal(&price)
}

/// Range bounds and current price, always ordered lower < upper
pub fn price_range(position: &PositionState, side: StableSide) -> Option<PriceRange> {
    let at_lower = volatile_price_at_tick(position, position.tick_lower, side)?;
    let at_upper = volatile_price_at_tick(position, position.tick_upper, side)?;
    let current = volatile_price_at_tick(position, position.current_tick, side)?;
    Some(PriceRange {
        lower: at_lower.min(at_upper),
        upper: at_lower.max(at_upper),
        current,
    })
}

/// Values `position` against `quotes`
pub fn value_position(position: &PositionState, stables: &StableSet, quotes: &UsdQuotes) -> Valuation {
    let side = position.stable_side(stables);

    let amounts = match amounts_for_liquidity(
        position.liquidity,
        &sqrt_price_from_x96(position.sqrt_price_x96),
        position.tick_lower,
        position.tick_upper,
        position.current_tick,
    ) {
        Ok(amounts) => amounts,
        Err(e) => {
            warn!("Position {}: {}", position.position_id, e);
            return Valuation::invalid(position, side, e.to_string());
        }
    };

    let human0 = math::to_decimal(&math::to_human_units(&amounts.amount0, position.token0.decimals));
    let human1 = math::to_decimal(&math::to_human_units(&amounts.amount1, position.token1.decimals));
    let pending0 = math::raw_to_decimal(position.owed0, position.token0.decimals);
    let pending1 = math::raw_to_decimal(position.owed1, position.token1.decimals);

    let (amount0, amount1, pending0, pending1) = match (human0, human1, pending0, pending1) {
        (Some(a0), Some(a1), Some(p0), Some(p1)) => (a0, a1, p0, p1),
        _ => {
            let reason = format!(
                "position {} amounts exceed representable range",
                position.position_id
            );
            warn!("{}", reason);
            return Valuation::invalid(position, side, reason);
        }
    };

    let range = price_range(position, side);

    let Some((price0, price1)) = resolve_prices(side, quotes) else {
        warn!(
            "Position {}: no USD price for {} (stable side: {}), reporting zero value",
            position.position_id,
            position.pair_symbol(),
            side
        );
        return Valuation {
            stable_side: side,
            amount0,
            amount1,
            pending0,
            pending1,
            price0_usd: Decimal::ZERO,
            price1_usd: Decimal::ZERO,
            value_usd: Decimal::ZERO,
            pending_fees_usd: Decimal::ZERO,
            in_range: position.in_range(),
            range,
            status: ValuationStatus::PriceUnavailable,
        };
    };

    let value_usd = amount0 * price0 + amount1 * price1;
    let pending_fees_usd = pending0 * price0 + pending1 * price1;

    Valuation {
        stable_side: side,
        amount0,
        amount1,
        pending0,
        pending1,
        price0_usd: price0,
        price1_usd: price1,
        value_usd,
        pending_fees_usd,
        in_range: position.in_range(),
        range,
        status: if quotes.stale {
            ValuationStatus::Stale
        } else {
            ValuationStatus::Live
        },
    }
}
