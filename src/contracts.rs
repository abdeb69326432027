//! Centralized Contract Definitions
//!
//! Solidity interfaces read by the tracker, defined with alloy's `sol!`
//! macro. Calldata is built from the generated `*Call` types and sent
//! through a `ChainReader`, so none of these need a live Provider in tests.

use alloy::primitives::{address, b256, Address, B256};
use alloy::sol;

// ── Deployments (Base) ───────────────────────────────────────────────

/// Uniswap V3 NonfungiblePositionManager on Base
pub const BASE_POSITION_MANAGER: Address = address!("03a520b32C04BF3bEEf7BEb72E919cf822Ed34f1");

/// Uniswap V3 Factory on Base
pub const BASE_V3_FACTORY: Address = address!("33128a8fC17869897dcE68Ed026d694621f6FDfD");

/// Native USDC on Base (6 decimals)
pub const BASE_USDC: Address = address!("833589fcd6edb6e08f4c7c32d4f71b54bda02913");

/// Coinbase wrapped BTC on Base (8 decimals)
pub const BASE_CBBTC: Address = address!("cbb7c0000ab88b473b1f5afd9ef808440eed33bf");

/// keccak256("Collect(uint256,address,uint256,uint256)")
pub const COLLECT_TOPIC: B256 =
    b256!("40d0efd1a53d60ecbf40971b9daf7dc90178c3aadc7aab1765632738fa8b8f01");

// ── ERC20 ─────────────────────────────────────────────────────────────

sol! {
    #[sol(rpc)]
    interface IERC20 {
        function decimals() external view returns (uint8);
        function symbol() external view returns (string);
    }
}

// ── Uniswap V3 ───────────────────────────────────────────────────────

sol! {
    #[sol(rpc)]
    interface INonfungiblePositionManager {
        event Collect(uint256 indexed tokenId, address recipient, uint256 amount0, uint256 amount1);

        function positions(uint256 tokenId) external view returns (
            uint96 nonce,
            address operator,
            address token0,
            address token1,
            uint24 fee,
            int24 tickLower,
            int24 tickUpper,
            uint128 liquidity,
            uint256 feeGrowthInside0LastX128,
            uint256 feeGrowthInside1LastX128,
            uint128 tokensOwed0,
            uint128 tokensOwed1
        );
    }
}

sol! {
    #[sol(rpc)]
    interface UniswapV3Factory {
        function getPool(address tokenA, address tokenB, uint24 fee) external view returns (address pool);
    }
}

sol! {
    #[sol(rpc)]
    interface UniswapV3Pool {
        function slot0() external view returns (uint160 sqrtPriceX96, int24 tick, uint16 observationIndex, uint16 observationCardinality, uint16 observationCardinalityNext, uint8 feeProtocol, bool unlocked);
    }
}
