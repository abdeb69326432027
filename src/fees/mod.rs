//! Collected-fee accounting
//!
//! - `ledger`: persisted totals and scan cursor
//! - `collect`: Collect event filter and payload decoding
//! - `reconciler`: incremental chunked log scan

pub mod collect;
pub mod ledger;
pub mod reconciler;

pub use collect::{decode_collect, position_topic, CollectTarget};
pub use ledger::{FeeLedger, LedgerDelta, SlotMapping};
pub use reconciler::{
    FeeReconciler, ReconcileOutcome, ReconcileReport, ReconcilerConfig, ScanPhase,
};
