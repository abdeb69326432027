//! Tracker Error Taxonomy
//!
//! Every failure the engine can surface. Chain and price failures are
//! recoverable at the sync-cycle level: callers degrade to stale or partial
//! data instead of aborting.

use thiserror::Error;

/// Errors raised by the valuation, fee and sync layers
#[derive(Debug, Error)]
pub enum TrackerError {
    /// RPC / network failure (retried a bounded number of times by callers)
    #[error("transport error: {0}")]
    Transport(String),

    /// Malformed event payload or position data
    #[error("decode error: {0}")]
    Decode(String),

    /// Structurally invalid position (tick_lower >= tick_upper, ...)
    #[error("invalid range: tick_lower={tick_lower} tick_upper={tick_upper}")]
    InvalidRange { tick_lower: i32, tick_upper: i32 },

    /// No usable price for a token (neither live nor last-known-good)
    #[error("price unavailable for {0}")]
    PriceUnavailable(String),

    /// No baseline recorded for a position
    #[error("no baseline configured for position {0}")]
    ConfigMissing(u64),

    /// Persistence failure (I/O, JSON, lock contention)
    #[error("store error: {0}")]
    Store(String),

    /// Malformed settings
    #[error("config error: {0}")]
    Config(String),
}

impl TrackerError {
    /// True for failures worth retrying (network hiccups)
    pub fn is_transient(&self) -> bool {
        matches!(self, TrackerError::Transport(_))
    }
}

impl From<std::io::Error> for TrackerError {
    fn from(e: std::io::Error) -> Self {
        TrackerError::Store(e.to_string())
    }
}

impl From<serde_json::Error> for TrackerError {
    fn from(e: serde_json::Error) -> Self {
        TrackerError::Store(e.to_string())
    }
}

pub type TrackerResult<T> = std::result::Result<T, TrackerError>;
