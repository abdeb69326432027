//! TOML Configuration
//!
//! One `[general]` table plus one `[[position]]` table per tracked
//! position. `RPC_URL` from the environment (or `.env`) overrides the
//! file's `rpc_url`.
//!
//! ```toml
//! [general]
//! rpc_url = "https://mainnet.base.org"
//! data_dir = "data"
//! price_source = "pool"
//!
//! [[position]]
//! id = 1345196
//! label = "cbBTC/USDC 0.05%"
//! initial_invested_usd = 1000
//! deposit_date = "2025-11-24"
//! initial_reference_price = 97000
//! coingecko_id = "coinbase-wrapped-btc"
//! ```

use crate::chain::RetryPolicy;
use crate::contracts::{BASE_POSITION_MANAGER, BASE_USDC, BASE_V3_FACTORY};
use crate::error::TrackerError;
use crate::fees::reconciler::{
    ReconcilerConfig, DEFAULT_CHUNK_SIZE, DEFAULT_DECODE_ERROR_LIMIT, DEFAULT_MAX_RETRIES,
    DEFAULT_START_BLOCK,
};
use crate::history::DEFAULT_HISTORY_CAP;
use crate::oracle::PriceSource;
use crate::store::DEFAULT_LOCK_TTL;
use crate::types::{Baseline, StableSet};
use alloy::primitives::Address;
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level TOML configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct TrackerConfig {
    pub general: GeneralConfig,
    #[serde(rename = "position", default)]
    pub positions: Vec<PositionConfig>,
}

/// General settings
#[derive(Debug, Clone, Deserialize)]
pub struct GeneralConfig {
    #[serde(default)]
    pub rpc_url: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_position_manager")]
    pub position_manager: Address,
    #[serde(default = "default_factory")]
    pub factory: Address,
    #[serde(default = "default_stable_tokens")]
    pub stable_tokens: Vec<Address>,
    #[serde(default)]
    pub price_source: PriceSource,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_rpc_timeout_secs")]
    pub rpc_timeout_secs: u64,
    #[serde(default = "default_start_block")]
    pub default_start_block: u64,
    #[serde(default = "default_decode_error_limit")]
    pub decode_error_limit: u32,
    #[serde(default = "default_history_cap")]
    pub history_cap: usize,
    /// Age after which a leftover `.lock` file is taken over
    #[serde(default = "default_lock_ttl_secs")]
    pub lock_ttl_secs: u64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_data_dir() -> PathBuf { PathBuf::from("data") }
fn default_position_manager() -> Address { BASE_POSITION_MANAGER }
fn default_factory() -> Address { BASE_V3_FACTORY }
fn default_stable_tokens() -> Vec<Address> { vec![BASE_USDC] }
fn default_chunk_size() -> u64 { DEFAULT_CHUNK_SIZE }
fn default_max_retries() -> u32 { DEFAULT_MAX_RETRIES }
fn default_retry_backoff_ms() -> u64 { 1000 }
fn default_rpc_timeout_secs() -> u64 { 30 }
fn default_start_block() -> u64 { DEFAULT_START_BLOCK }
fn default_decode_error_limit() -> u32 { DEFAULT_DECODE_ERROR_LIMIT }
fn default_history_cap() -> usize { DEFAULT_HISTORY_CAP }
fn default_lock_ttl_secs() -> u64 { DEFAULT_LOCK_TTL.as_secs() }
fn default_log_level() -> String { "info".to_string() }

/// One tracked position
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PositionConfig {
    pub id: u64,
    #[serde(default)]
    pub label: Option<String>,
    /// Baseline: principal in USD at deposit
    #[serde(default)]
    pub initial_invested_usd: Option<Decimal>,
    /// `YYYY-MM-DD` (midnight UTC) or RFC 3339
    #[serde(default)]
    pub deposit_date: Option<String>,
    /// Volatile token price at deposit; 0 means unknown
    #[serde(default)]
    pub initial_reference_price: Option<Decimal>,
    /// First block to scan for Collect events (defaults to general.default_start_block)
    #[serde(default)]
    pub start_block: Option<u64>,
    /// CoinGecko id of the volatile token (token0 when neither side is stable)
    #[serde(default)]
    pub coingecko_id: Option<String>,
    /// CoinGecko id of token1 when neither side is stable
    #[serde(default)]
    pub coingecko_id_quote: Option<String>,
    /// Last-resort volatile price, used (flagged stale) when no quote exists
    #[serde(default)]
    pub fallback_price: Option<Decimal>,
    /// Token the Collect event reports first, when it is not token0
    #[serde(default)]
    pub collect_first_token: Option<Address>,
}

/// `YYYY-MM-DD` or RFC 3339 -> UTC timestamp
pub fn parse_deposit_date(value: &str) -> Result<DateTime<Utc>, TrackerError> {
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
            return Ok(midnight.and_utc());
        }
    }
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| TrackerError::Config(format!("invalid deposit_date {:?}: {}", value, e)))
}

impl PositionConfig {
    /// Position requested on the command line without a config entry
    pub fn ad_hoc(id: u64) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }

    pub fn display_name(&self) -> String {
        self.label
            .clone()
            .unwrap_or_else(|| format!("position {}", self.id))
    }

    /// Baseline from the config, when invested amount and deposit date are both set
    pub fn baseline(&self) -> Result<Option<Baseline>, TrackerError> {
        let (Some(invested), Some(date)) = (self.initial_invested_usd, &self.deposit_date) else {
            return Ok(None);
        };
        if invested < Decimal::ZERO {
            return Err(TrackerError::Config(format!(
                "position {}: initial_invested_usd must not be negative",
                self.id
            )));
        }
        Ok(Some(Baseline {
            initial_invested_usd: invested,
            deposit_timestamp: parse_deposit_date(date)?,
            initial_reference_price: self.initial_reference_price.unwrap_or(Decimal::ZERO),
        }))
    }
}

impl TrackerConfig {
    /// Load configuration from a TOML file, then apply `RPC_URL` from the environment
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let mut config = Self::from_toml(&content)?;

        if let Ok(url) = std::env::var("RPC_URL") {
            if !url.trim().is_empty() {
                config.general.rpc_url = url;
            }
        }

        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).with_context(|| "Failed to parse TOML configuration")?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), TrackerError> {
        if self.general.rpc_url.trim().is_empty() {
            return Err(TrackerError::Config(
                "rpc_url not set (config file or RPC_URL)".into(),
            ));
        }
        if self.general.chunk_size == 0 {
            return Err(TrackerError::Config("chunk_size must be > 0".into()));
        }
        let mut seen = std::collections::HashSet::new();
        for position in &self.positions {
            if !seen.insert(position.id) {
                return Err(TrackerError::Config(format!(
                    "position {} listed twice",
                    position.id
                )));
            }
            position.baseline()?;
        }
        Ok(())
    }

    pub fn position(&self, id: u64) -> Option<&PositionConfig> {
        self.positions.iter().find(|p| p.id == id)
    }

    pub fn stable_set(&self) -> StableSet {
        StableSet::new(self.general.stable_tokens.iter().copied())
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.general.rpc_timeout_secs)
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.general.lock_ttl_secs)
    }

    /// Retry budget shared by every RPC read
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.general.max_retries,
            Duration::from_millis(self.general.retry_backoff_ms),
        )
    }

    pub fn reconciler_config(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            chunk_size: self.general.chunk_size,
            max_retries: self.general.max_retries,
            retry_backoff: Duration::from_millis(self.general.retry_backoff_ms),
            default_start_block: self.general.default_start_block,
            decode_error_limit: self.general.decode_error_limit,
        }
    }
}
