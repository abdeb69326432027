//! Core data records
//!
//! `PositionState` is the immutable per-sync view of an on-chain position;
//! `ValuationSnapshot` is what gets appended to the history sequence.

use alloy::primitives::{Address, U256};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// ERC20 metadata for one side of a pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenInfo {
    pub address: Address,
    pub symbol: String,
    pub decimals: u8,
}

impl TokenInfo {
    pub fn new(address: Address, symbol: impl Into<String>, decimals: u8) -> Self {
        Self {
            address,
            symbol: symbol.into(),
            decimals,
        }
    }
}

/// Which side of the pair is USD-pegged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StableSide {
    Token0,
    Token1,
    /// Neither side is a known stable; both need an external price
    Neither,
}

impl fmt::Display for StableSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StableSide::Token0 => write!(f, "token0"),
            StableSide::Token1 => write!(f, "token1"),
            StableSide::Neither => write!(f, "none"),
        }
    }
}

/// Known USD-pegged token addresses
#[derive(Debug, Clone, Default)]
pub struct StableSet(HashSet<Address>);

impl StableSet {
    pub fn new<I: IntoIterator<Item = Address>>(addresses: I) -> Self {
        Self(addresses.into_iter().collect())
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.0.contains(address)
    }

    /// Token0 wins when both sides are stables (stable/stable pairs)
    pub fn side_of(&self, token0: &Address, token1: &Address) -> StableSide {
        if self.contains(token0) {
            StableSide::Token0
        } else if self.contains(token1) {
            StableSide::Token1
        } else {
            StableSide::Neither
        }
    }
}

/// On-chain position state, fetched fresh every sync.
///
/// IMPORTANT: token0/token1 follow the pool's canonical ordering
/// (lower address first), not the order a user names the pair in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionState {
    pub position_id: u64,
    pub token0: TokenInfo,
    pub token1: TokenInfo,
    /// Fee tier (500 = 0.05%, 3000 = 0.30%, 10000 = 1.00%)
    pub fee_tier: u32,
    pub liquidity: u128,
    pub tick_lower: i32,
    pub tick_upper: i32,
    pub current_tick: i32,
    /// Q64.96 sqrt price from slot0 (zero when unknown)
    pub sqrt_price_x96: U256,
    /// Uncollected fees, smallest units
    pub owed0: u128,
    pub owed1: u128,
    /// Pool address, when the factory lookup succeeded
    #[serde(default)]
    pub pool: Option<Address>,
    /// Current tick is a mid-range estimate (pool state unavailable)
    #[serde(default)]
    pub tick_estimated: bool,
    pub block_number: u64,
}

impl PositionState {
    /// `tick_lower <= current_tick < tick_upper`
    pub fn in_range(&self) -> bool {
        self.tick_lower <= self.current_tick && self.current_tick < self.tick_upper
    }

    pub fn stable_side(&self, stables: &StableSet) -> StableSide {
        stables.side_of(&self.token0.address, &self.token1.address)
    }

    /// "cbBTC/USDC"-style label in pool order
    pub fn pair_symbol(&self) -> String {
        format!("{}/{}", self.token0.symbol, self.token1.symbol)
    }

    /// Fee tier as a percentage (500 -> 0.05)
    pub fn fee_percent(&self) -> f64 {
        self.fee_tier as f64 / 10000.0
    }
}

/// Point-in-time valuation, appended to the history sequence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValuationSnapshot {
    pub timestamp: DateTime<Utc>,
    pub amount0: Decimal,
    pub amount1: Decimal,
    /// USD price of the non-stable token
    pub price_volatile: Decimal,
    pub value_usd: Decimal,
    pub pending_fees_usd: Decimal,
    pub in_range: bool,
    /// Priced from a last-known-good quote rather than a live one
    #[serde(default)]
    pub price_stale: bool,
}

/// User-supplied entry point of a position, the reference for every ratio metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    /// Principal in USD at deposit time
    pub initial_invested_usd: Decimal,
    pub deposit_timestamp: DateTime<Utc>,
    /// Volatile token price at deposit (IL and HODL reference)
    pub initial_reference_price: Decimal,
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub const USDC: Address = Address::new([0x83; 20]);
    pub const CBBTC: Address = Address::new([0xcb; 20]);

    /// cbBTC/USDC position in the shape the Base NPM returns it
    pub fn cbbtc_usdc_position() -> PositionState {
        PositionState {
            position_id: 1345196,
            token0: TokenInfo::new(USDC, "USDC", 6),
            token1: TokenInfo::new(CBBTC, "cbBTC", 8),
            fee_tier: 500,
            liquidity: 0,
            tick_lower: -66000,
            tick_upper: -62790,
            current_tick: -63500,
            sqrt_price_x96: U256::ZERO,
            owed0: 0,
            owed1: 0,
            pool: None,
            tick_estimated: false,
            block_number: 1,
        }
    }
}
