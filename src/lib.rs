//! Concentrated-Liquidity Position Tracker
//!
//! Values Uniswap V3 style LP positions, keeps an incremental ledger of
//! collected fees reconciled from Collect events, and computes performance
//! metrics (PnL, ROI, fee APR, impermanent loss, LP vs HODL).

pub mod chain;
pub mod config;
pub mod contracts;
pub mod error;
pub mod fees;
pub mod history;
pub mod math;
pub mod metrics;
pub mod oracle;
pub mod store;
pub mod sync;
pub mod types;
pub mod valuation;

// Re-export commonly used types
pub use config::{PositionConfig, TrackerConfig};
pub use error::{TrackerError, TrackerResult};
pub use fees::{FeeLedger, FeeReconciler, ReconcileOutcome};
pub use metrics::{compute_metrics, MetricsInput, MetricsResult};
pub use store::{JsonFileStore, MemoryStore, PositionStore};
pub use sync::{report_from_store, SyncEngine, SyncReport};
pub use types::{Baseline, PositionState, StableSet, StableSide, TokenInfo, ValuationSnapshot};
pub use valuation::{value_position, UsdQuotes, Valuation, ValuationStatus};
