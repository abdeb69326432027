//! On-chain Position Reader
//!
//! Builds a `PositionState` from four reads:
//!     1. `positions(tokenId)` on the NonfungiblePositionManager
//!     2. `decimals()` / `symbol()` on both tokens (cached)
//!     3. `getPool(token0, token1, fee)` on the factory
//!     4. `slot0()` on the pool
//!
//! Every read is retried under the reader's `RetryPolicy`.
//! When the pool cannot be resolved the current tick falls back to the
//! midpoint of the position's range and the state is flagged
//! `tick_estimated`.

use super::{ChainReader, RetryPolicy};
use crate::contracts::{INonfungiblePositionManager, UniswapV3Factory, UniswapV3Pool, IERC20};
use crate::error::{TrackerError, TrackerResult};
use crate::types::{PositionState, TokenInfo};
use alloy::primitives::{Address, Bytes, U256};
use alloy::sol_types::SolCall;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Helper: convert u32 fee tier to alloy uint24 type for contract calls.
/// Uses from_limbs() because Uint<24, 1> doesn't impl From<u32>.
fn fee_to_u24(fee: u32) -> alloy::primitives::Uint<24, 1> {
    debug_assert!(fee <= 0xFFFFFF, "fee {} exceeds U24 max (16777215)", fee);
    alloy::primitives::Uint::from_limbs([fee as u64])
}

/// Midpoint of a tick range, used when pool state is unavailable
pub fn mid_range_tick(tick_lower: i32, tick_upper: i32) -> i32 {
    ((tick_lower as i64 + tick_upper as i64) / 2) as i32
}

/// Reads position, token and pool state through a `ChainReader`
pub struct PositionReader<C> {
    chain: Arc<C>,
    position_manager: Address,
    factory: Address,
    retry: RetryPolicy,
    /// Token metadata never changes, so it is fetched once per address
    token_cache: HashMap<Address, TokenInfo>,
}

impl<C: ChainReader> PositionReader<C> {
    pub fn new(chain: Arc<C>, position_manager: Address, factory: Address) -> Self {
        Self {
            chain,
            position_manager,
            factory,
            retry: RetryPolicy::default(),
            token_cache: HashMap::new(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn call(&self, what: &str, to: Address, calldata: Bytes) -> TrackerResult<Bytes> {
        self.retry
            .run(what, || self.chain.call(to, calldata.clone()))
            .await
    }

    /// Fetch a fresh snapshot of position `position_id`
    pub async fn fetch(&mut self, position_id: u64) -> TrackerResult<PositionState> {
        let block_number = self
            .retry
            .run("eth_blockNumber", || self.chain.latest_block())
            .await?;

        let call = INonfungiblePositionManager::positionsCall {
            tokenId: U256::from(position_id),
        };
        let raw = self
            .call("positions", self.position_manager, Bytes::from(call.abi_encode()))
            .await?;
        if raw.is_empty() {
            return Err(TrackerError::Decode(format!(
                "positions({}) returned no data",
                position_id
            )));
        }
        let pos = INonfungiblePositionManager::positionsCall::abi_decode_returns(&raw)
            .map_err(|e| TrackerError::Decode(format!("positions({}): {}", position_id, e)))?;

        if pos.token0 == Address::ZERO || pos.token1 == Address::ZERO {
            return Err(TrackerError::Decode(format!(
                "position {} has no tokens (burned or never minted)",
                position_id
            )));
        }

        let tick_lower = i32::try_from(pos.tickLower)
            .map_err(|_| TrackerError::Decode("tickLower out of i32 range".into()))?;
        let tick_upper = i32::try_from(pos.tickUpper)
            .map_err(|_| TrackerError::Decode("tickUpper out of i32 range".into()))?;
        let fee_tier = pos.fee.to::<u32>();

        let token0 = self.token_info(pos.token0).await?;
        let token1 = self.token_info(pos.token1).await?;

        let pool = self.pool_address(pos.token0, pos.token1, fee_tier).await;
        let slot0 = match pool {
            Some(pool) => self.slot0(pool).await,
            None => None,
        };

        let (current_tick, sqrt_price_x96, tick_estimated) = match slot0 {
            Some((tick, sqrt_price)) => (tick, sqrt_price, false),
            None => {
                let mid = mid_range_tick(tick_lower, tick_upper);
                warn!(
                    "Position {}: pool state unavailable, using mid-range tick {} (estimated)",
                    position_id, mid
                );
                (mid, U256::ZERO, true)
            }
        };

        debug!(
            "Position {}: {}/{} fee={} ticks=[{}, {}) current={} liquidity={}",
            position_id,
            token0.symbol,
            token1.symbol,
            fee_tier,
            tick_lower,
            tick_upper,
            current_tick,
            pos.liquidity
        );

        Ok(PositionState {
            position_id,
            token0,
            token1,
            fee_tier,
            liquidity: pos.liquidity,
            tick_lower,
            tick_upper,
            current_tick,
            sqrt_price_x96,
            owed0: pos.tokensOwed0,
            owed1: pos.tokensOwed1,
            pool,
            tick_estimated,
            block_number,
        })
    }

    async fn token_info(&mut self, token: Address) -> TrackerResult<TokenInfo> {
        if let Some(info) = self.token_cache.get(&token) {
            return Ok(info.clone());
        }

        let raw = self
            .call("decimals", token, Bytes::from(IERC20::decimalsCall {}.abi_encode()))
            .await?;
        let decimals = IERC20::decimalsCall::abi_decode_returns(&raw)
            .map_err(|e| TrackerError::Decode(format!("decimals() of {:?}: {}", token, e)))?;

        // Some tokens return bytes32 symbols; a label is not worth failing over
        let symbol = match self
            .call("symbol", token, Bytes::from(IERC20::symbolCall {}.abi_encode()))
            .await
        {
            Ok(raw) => IERC20::symbolCall::abi_decode_returns(&raw)
                .unwrap_or_else(|_| short_address(&token)),
            Err(e) => {
                debug!("symbol() failed for {:?}: {}", token, e);
                short_address(&token)
            }
        };

        let info = TokenInfo::new(token, symbol, decimals);
        self.token_cache.insert(token, info.clone());
        Ok(info)
    }

    async fn pool_address(&self, token0: Address, token1: Address, fee: u32) -> Option<Address> {
        let call = UniswapV3Factory::getPoolCall {
            tokenA: token0,
            tokenB: token1,
            fee: fee_to_u24(fee),
        };
        match self
            .call("getPool", self.factory, Bytes::from(call.abi_encode()))
            .await
        {
            Ok(raw) => match UniswapV3Factory::getPoolCall::abi_decode_returns(&raw) {
                Ok(pool) if pool != Address::ZERO => Some(pool),
                Ok(_) => None,
                Err(e) => {
                    warn!("getPool decode failed: {}", e);
                    None
                }
            },
            Err(e) => {
                warn!("getPool failed: {}", e);
                None
            }
        }
    }

    async fn slot0(&self, pool: Address) -> Option<(i32, U256)> {
        let raw = match self
            .call("slot0", pool, Bytes::from(UniswapV3Pool::slot0Call {}.abi_encode()))
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                warn!("slot0 failed for pool {:?}: {}", pool, e);
                return None;
            }
        };
        match UniswapV3Pool::slot0Call::abi_decode_returns(&raw) {
            Ok(slot0) => {
                let tick = i32::try_from(slot0.tick).ok()?;
                Some((tick, U256::from(slot0.sqrtPriceX96)))
            }
            Err(e) => {
                warn!("slot0 decode failed for pool {:?}: {}", pool, e);
                None
            }
        }
    }
}

fn short_address(address: &Address) -> String {
    let hex = format!("{:?}", address);
    format!("{}..{}", &hex[..6], &hex[hex.len() - 4..])
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::chain::mock::MockChain;
    use crate::types::fixtures::{CBBTC, USDC};
    use alloy::primitives::aliases::{I24, U160, U24, U96};

    pub const NPM: Address = Address::new([0x03; 20]);
    pub const FACTORY: Address = Address::new([0x33; 20]);
    pub const POOL: Address = Address::new([0x77; 20]);

    fn test_reader(chain: Arc<MockChain>) -> PositionReader<MockChain> {
        PositionReader::new(chain, NPM, FACTORY)
            .with_retry(RetryPolicy::new(3, std::time::Duration::from_millis(1)))
    }

    /// Scripts a USDC/cbBTC position on the mock chain
    pub fn script_position(chain: &MockChain, with_pool: bool) {
        let ret = INonfungiblePositionManager::positionsReturn {
            nonce: U96::ZERO,
            operator: Address::ZERO,
            token0: USDC,
            token1: CBBTC,
            fee: U24::from(500u32),
            tickLower: I24::try_from(-66000i32).unwrap(),
            tickUpper: I24::try_from(-62790i32).unwrap(),
            liquidity: 1_000_000_000,
            feeGrowthInside0LastX128: U256::ZERO,
            feeGrowthInside1LastX128: U256::ZERO,
            tokensOwed0: 1_500_000,
            tokensOwed1: 2_000,
        };
        chain.respond(
            NPM,
            INonfungiblePositionManager::positionsCall::SELECTOR,
            INonfungiblePositionManager::positionsCall::abi_encode_returns(&ret),
        );
        chain.respond(
            USDC,
            IERC20::decimalsCall::SELECTOR,
            IERC20::decimalsCall::abi_encode_returns(&6u8),
        );
        chain.respond(
            USDC,
            IERC20::symbolCall::SELECTOR,
            IERC20::symbolCall::abi_encode_returns(&"USDC".to_string()),
        );
        chain.respond(
            CBBTC,
            IERC20::decimalsCall::SELECTOR,
            IERC20::decimalsCall::abi_encode_returns(&8u8),
        );
        chain.respond(
            CBBTC,
            IERC20::symbolCall::SELECTOR,
            IERC20::symbolCall::abi_encode_returns(&"cbBTC".to_string()),
        );
        if with_pool {
            chain.respond(
                FACTORY,
                UniswapV3Factory::getPoolCall::SELECTOR,
                UniswapV3Factory::getPoolCall::abi_encode_returns(&POOL),
            );
            let slot0 = UniswapV3Pool::slot0Return {
                sqrtPriceX96: U160::from(1u128 << 96),
                tick: I24::try_from(-64000i32).unwrap(),
                observationIndex: 0,
                observationCardinality: 1,
                observationCardinalityNext: 1,
                feeProtocol: 0,
                unlocked: true,
            };
            chain.respond(
                POOL,
                UniswapV3Pool::slot0Call::SELECTOR,
                UniswapV3Pool::slot0Call::abi_encode_returns(&slot0),
            );
        }
    }

    #[tokio::test]
    async fn test_fetch_position_with_pool() {
        let chain = Arc::new(MockChain::new(25_000_000));
        script_position(&chain, true);

        let mut reader = test_reader(chain.clone());
        let pos = reader.fetch(42).await.unwrap();

        assert_eq!(pos.position_id, 42);
        assert_eq!(pos.token0.symbol, "USDC");
        assert_eq!(pos.token0.decimals, 6);
        assert_eq!(pos.token1.symbol, "cbBTC");
        assert_eq!(pos.token1.decimals, 8);
        assert_eq!(pos.fee_tier, 500);
        assert_eq!(pos.tick_lower, -66000);
        assert_eq!(pos.tick_upper, -62790);
        assert_eq!(pos.current_tick, -64000);
        assert_eq!(pos.liquidity, 1_000_000_000);
        assert_eq!(pos.owed0, 1_500_000);
        assert_eq!(pos.owed1, 2_000);
        assert_eq!(pos.pool, Some(POOL));
        assert_eq!(pos.sqrt_price_x96, U256::from(1u128 << 96));
        assert!(!pos.tick_estimated);
        assert_eq!(pos.block_number, 25_000_000);
    }

    #[tokio::test]
    async fn test_missing_pool_falls_back_to_mid_range() {
        let chain = Arc::new(MockChain::new(100));
        script_position(&chain, false);

        let mut reader = test_reader(chain);
        let pos = reader.fetch(7).await.unwrap();

        assert!(pos.tick_estimated);
        assert_eq!(pos.current_tick, mid_range_tick(-66000, -62790));
        assert_eq!(pos.current_tick, -64395);
        assert_eq!(pos.pool, None);
        assert!(pos.in_range());
    }

    #[tokio::test]
    async fn test_empty_positions_result_is_decode_error() {
        let chain = Arc::new(MockChain::new(100));
        chain.respond(
            NPM,
            INonfungiblePositionManager::positionsCall::SELECTOR,
            Vec::new(),
        );
        let mut reader = test_reader(chain);
        let err = reader.fetch(9).await.unwrap_err();
        assert!(matches!(err, TrackerError::Decode(_)));
    }

    #[tokio::test]
    async fn test_rate_limited_reads_retried() {
        let chain = Arc::new(MockChain::new(25_000_000));
        script_position(&chain, true);
        *chain.flaky_head.lock().unwrap() = 2;
        *chain.flaky_calls.lock().unwrap() = 2;

        let mut reader = test_reader(chain.clone());
        let pos = reader.fetch(42).await.unwrap();

        assert_eq!(pos.block_number, 25_000_000);
        assert_eq!(pos.liquidity, 1_000_000_000);
        assert!(!pos.tick_estimated);
        assert_eq!(*chain.flaky_calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_persistent_head_failure_is_transport_error() {
        let chain = Arc::new(MockChain::new(100));
        script_position(&chain, true);
        *chain.flaky_head.lock().unwrap() = 5;

        let mut reader = test_reader(chain.clone());
        let err = reader.fetch(42).await.unwrap_err();

        assert!(matches!(err, TrackerError::Transport(_)));
        assert_eq!(*chain.flaky_head.lock().unwrap(), 2);
    }

    #[test]
    fn test_mid_range_tick_rounds_toward_zero() {
        assert_eq!(mid_range_tick(-100, 100), 0);
        assert_eq!(mid_range_tick(10, 21), 15);
        assert_eq!(mid_range_tick(-21, -10), -15);
    }
}
