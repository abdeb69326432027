//! Price Oracle
//!
//! USD quotes for the volatile side of a position.
//!
//! Key features:
//! - `pool` source: price implied by the pool's current tick
//! - `coingecko` source: CoinGecko simple-price endpoint via reqwest
//! - Fallback chain: live quote -> last-known-good (stale) -> configured
//!   fallback price (stale) -> unavailable

use crate::error::{TrackerError, TrackerResult};
use crate::types::{PositionState, StableSet, StableSide};
use crate::valuation::volatile_price_at_tick;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

pub const COINGECKO_API_URL: &str = "https://api.coingecko.com/api/v3";

/// Where live quotes come from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceSource {
    /// Derived from the pool's current tick
    #[default]
    Pool,
    /// CoinGecko simple price API
    Coingecko,
}

/// Where a quote came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuoteOrigin {
    Live,
    LastKnownGood,
    ConfiguredFallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub price: Decimal,
    pub origin: QuoteOrigin,
}

impl Quote {
    pub fn is_stale(&self) -> bool {
        self.origin != QuoteOrigin::Live
    }
}

/// USD price lookup by token id
#[async_trait]
pub trait PriceOracle: Send + Sync {
    async fn get_price(&self, token_id: &str) -> TrackerResult<Decimal>;
}

/// CoinGecko `/simple/price` client
pub struct CoinGeckoOracle {
    client: reqwest::Client,
    base_url: String,
}

impl CoinGeckoOracle {
    pub fn new(timeout: Duration) -> TrackerResult<Self> {
        Self::with_base_url(COINGECKO_API_URL, timeout)
    }

    pub fn with_base_url(base_url: &str, timeout: Duration) -> TrackerResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TrackerError::Config(format!("http client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl PriceOracle for CoinGeckoOracle {
    async fn get_price(&self, token_id: &str) -> TrackerResult<Decimal> {
        let url = format!("{}/simple/price", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("ids", token_id), ("vs_currencies", "usd")])
            .send()
            .await
            .map_err(|e| TrackerError::Transport(format!("coingecko: {}", e)))?;

        if !response.status().is_success() {
            return Err(TrackerError::Transport(format!(
                "coingecko: HTTP {}",
                response.status()
            )));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| TrackerError::Decode(format!("coingecko body: {}", e)))?;
        let price = parse_simple_price(&body, token_id)?;
        debug!("CoinGecko {} = ${}", token_id, price);
        Ok(price)
    }
}

/// Extracts `body[id]["usd"]` as an exact decimal
pub fn parse_simple_price(body: &serde_json::Value, token_id: &str) -> TrackerResult<Decimal> {
    let number = body
        .get(token_id)
        .and_then(|entry| entry.get("usd"))
        .ok_or_else(|| TrackerError::PriceUnavailable(token_id.to_string()))?;

    let text = number.to_string();
    let price = Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .map_err(|e| TrackerError::Decode(format!("coingecko price {:?}: {}", text, e)))?;

    if price <= Decimal::ZERO {
        return Err(TrackerError::PriceUnavailable(token_id.to_string()));
    }
    Ok(price)
}

/// Volatile price implied by the pool; unavailable when the tick is only estimated
pub fn pool_price(position: &PositionState, stables: &StableSet) -> TrackerResult<Decimal> {
    if position.tick_estimated {
        return Err(TrackerError::PriceUnavailable(format!(
            "position {} pool tick unavailable",
            position.position_id
        )));
    }
    let side = position.stable_side(stables);
    if side == StableSide::Neither {
        return Err(TrackerError::PriceUnavailable(format!(
            "{} has no stable side to price against",
            position.pair_symbol()
        )));
    }
    volatile_price_at_tick(position, position.current_tick, side)
        .filter(|p| *p > Decimal::ZERO)
        .ok_or_else(|| TrackerError::PriceUnavailable(position.pair_symbol()))
}

/// Applies the fallback chain to a live quote attempt
pub fn resolve_quote(
    label: &str,
    live: TrackerResult<Decimal>,
    last_known: Option<Decimal>,
    configured_fallback: Option<Decimal>,
) -> Option<Quote> {
    match live {
        Ok(price) => Some(Quote {
            price,
            origin: QuoteOrigin::Live,
        }),
        Err(e) => {
            if let Some(price) = last_known.filter(|p| *p > Decimal::ZERO) {
                warn!("{}: live price failed ({}), using last-known-good ${}", label, e, price);
                return Some(Quote {
                    price,
                    origin: QuoteOrigin::LastKnownGood,
                });
            }
            if let Some(price) = configured_fallback.filter(|p| *p > Decimal::ZERO) {
                warn!("{}: live price failed ({}), using configured fallback ${}", label, e, price);
                return Some(Quote {
                    price,
                    origin: QuoteOrigin::ConfiguredFallback,
                });
            }
            warn!("{}: no price available: {}", label, e);
            None
        }
    }
}
