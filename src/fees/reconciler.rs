//! Fee Ledger Reconciler
//!
//! Incrementally scans Collect events for one position and folds them into
//! its persisted `FeeLedger`.
//!
//! Cycle: Idle -> Scanning -> Merging -> Idle
//!     - Resume at `last_scanned_block + 1` (or the deep-history default)
//!     - Fixed-size chunks, each retried with exponential backoff
//!     - The ledger only advances past fully processed chunks; a chunk that
//!       exhausts its retries stops the scan and keeps the prefix
//!     - A ledger stored under a different position id is discarded

use super::collect::{decode_collect, CollectTarget};
use super::ledger::{FeeLedger, LedgerDelta};
use crate::chain::{retry, ChainReader, LogEntry, RetryPolicy};
use crate::error::{TrackerError, TrackerResult};
use crate::store::PositionStore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Scan defaults
pub const DEFAULT_START_BLOCK: u64 = 20_000_000;
pub const DEFAULT_CHUNK_SIZE: u64 = 5_000;
pub const DEFAULT_MAX_RETRIES: u32 = retry::DEFAULT_ATTEMPTS;
pub const DEFAULT_RETRY_BACKOFF: Duration = retry::DEFAULT_BACKOFF;
/// Malformed Collect payloads tolerated per run before a chunk is treated as failed
pub const DEFAULT_DECODE_ERROR_LIMIT: u32 = 16;

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    pub chunk_size: u64,
    /// Attempts per chunk (including the first)
    pub max_retries: u32,
    /// First retry delay; doubles on every further attempt
    pub retry_backoff: Duration,
    pub default_start_block: u64,
    pub decode_error_limit: u32,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            default_start_block: DEFAULT_START_BLOCK,
            decode_error_limit: DEFAULT_DECODE_ERROR_LIMIT,
        }
    }
}

impl ReconcilerConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, self.retry_backoff)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanPhase {
    Idle,
    Scanning,
    Merging,
}

impl fmt::Display for ScanPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanPhase::Idle => write!(f, "idle"),
            ScanPhase::Scanning => write!(f, "scanning"),
            ScanPhase::Merging => write!(f, "merging"),
        }
    }
}

/// How far a run got
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ReconcileOutcome {
    /// Nothing to scan
    UpToDate,
    /// Scanned through the requested end block
    Complete {
        from_block: u64,
        to_block: u64,
        new_events: u64,
    },
    /// Stopped at a failed chunk; ledger holds the successful prefix
    Partial {
        from_block: u64,
        scanned_to: Option<u64>,
        failed_from: u64,
        failed_to: u64,
        new_events: u64,
        error: String,
    },
    /// The run could not start (head unreadable); the stored ledger was used as is
    Failed { error: String },
}

impl ReconcileOutcome {
    pub fn is_partial(&self) -> bool {
        matches!(self, ReconcileOutcome::Partial { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, ReconcileOutcome::Failed { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileReport {
    pub ledger: FeeLedger,
    pub outcome: ReconcileOutcome,
}

/// Drives the scan for one position at a time
pub struct FeeReconciler<C> {
    chain: Arc<C>,
    config: ReconcilerConfig,
    phase: ScanPhase,
}

impl<C: ChainReader> FeeReconciler<C> {
    pub fn new(chain: Arc<C>, config: ReconcilerConfig) -> Self {
        Self {
            chain,
            config,
            phase: ScanPhase::Idle,
        }
    }

    pub fn phase(&self) -> ScanPhase {
        self.phase
    }

    /// Reconciles up to the chain head at invocation time.
    ///
    /// Fails only when the head cannot be read within the retry budget or
    /// the store cannot be read/written; chunk failures are reported as `Partial`.
    pub async fn reconcile<S: PositionStore + ?Sized>(
        &mut self,
        store: &S,
        target: &CollectTarget,
    ) -> TrackerResult<ReconcileReport> {
        let end_block = self
            .config
            .retry_policy()
            .run("eth_blockNumber", || self.chain.latest_block())
            .await?;
        self.reconcile_to(store, target, end_block).await
    }

    /// Reconciles `[ledger cursor + 1, end_block]`
    pub async fn reconcile_to<S: PositionStore + ?Sized>(
        &mut self,
        store: &S,
        target: &CollectTarget,
        end_block: u64,
    ) -> TrackerResult<ReconcileReport> {
        let mut ledger = match store.load_ledger(target.position_id)? {
            Some(ledger) if ledger.position_id == target.position_id => ledger,
            Some(foreign) => {
                warn!(
                    "Ledger for position {} holds position {} data, starting fresh",
                    target.position_id, foreign.position_id
                );
                FeeLedger::new(target.position_id)
            }
            None => FeeLedger::new(target.position_id),
        };

        let default_start = target.start_block.unwrap_or(self.config.default_start_block);
        let start_block = ledger.next_block(default_start);

        if start_block > end_block {
            debug!(
                "Position {}: fee ledger already up to date (block {})",
                target.position_id, end_block
            );
            return Ok(ReconcileReport {
                ledger,
                outcome: ReconcileOutcome::UpToDate,
            });
        }

        info!(
            "Position {}: scanning Collect events {}-{} ({} blocks)",
            target.position_id,
            start_block,
            end_block,
            end_block - start_block + 1
        );

        let chunk_size = self.config.chunk_size.max(1);
        let mut chunk_start = start_block;
        let mut new_events = 0u64;
        let mut decode_errors = 0u32;
        let mut scanned_to: Option<u64> = None;
        let mut failure: Option<(u64, u64, TrackerError)> = None;

        self.phase = ScanPhase::Scanning;
        while chunk_start <= end_block {
            let chunk_end = chunk_start.saturating_add(chunk_size - 1).min(end_block);

            let logs = match self.fetch_chunk(target, chunk_start, chunk_end).await {
                Ok(logs) => logs,
                Err(e) => {
                    failure = Some((chunk_start, chunk_end, e));
                    break;
                }
            };

            let mut delta = LedgerDelta::default();
            for log in &logs {
                match decode_collect(log, target) {
                    Ok(Some((amount0, amount1))) => delta.add(amount0, amount1),
                    Ok(None) => {}
                    Err(e) => {
                        decode_errors += 1;
                        warn!("Position {}: skipping log: {}", target.position_id, e);
                    }
                }
            }

            if decode_errors > self.config.decode_error_limit {
                failure = Some((
                    chunk_start,
                    chunk_end,
                    TrackerError::Decode(format!(
                        "{} malformed Collect events this run (limit {})",
                        decode_errors, self.config.decode_error_limit
                    )),
                ));
                break;
            }

            self.phase = ScanPhase::Merging;
            ledger.apply(&delta, chunk_end);
            if delta.events > 0 {
                // checkpoint so an aborted run keeps this chunk
                store.save_ledger(target.position_id, &ledger)?;
            }
            self.phase = ScanPhase::Scanning;

            info!(
                "  blocks {}-{} | {} logs | {} collects",
                chunk_start,
                chunk_end,
                logs.len(),
                delta.events
            );

            new_events += delta.events;
            scanned_to = Some(chunk_end);
            chunk_start = chunk_end + 1;
        }

        self.phase = ScanPhase::Merging;
        if scanned_to.is_some() {
            store.save_ledger(target.position_id, &ledger)?;
        }
        self.phase = ScanPhase::Idle;

        let outcome = match failure {
            None => ReconcileOutcome::Complete {
                from_block: start_block,
                to_block: end_block,
                new_events,
            },
            Some((failed_from, failed_to, e)) => {
                warn!(
                    "Position {}: scan stopped at blocks {}-{}: {} (ledger kept at {:?})",
                    target.position_id, failed_from, failed_to, e, ledger.last_scanned_block
                );
                ReconcileOutcome::Partial {
                    from_block: start_block,
                    scanned_to,
                    failed_from,
                    failed_to,
                    new_events,
                    error: e.to_string(),
                }
            }
        };

        Ok(ReconcileReport { ledger, outcome })
    }

    /// Fetch logs with retry
    async fn fetch_chunk(
        &self,
        target: &CollectTarget,
        from_block: u64,
        to_block: u64,
    ) -> TrackerResult<Vec<LogEntry>> {
        let topics = target.topics();
        let what = format!("blocks {}-{}", from_block, to_block);
        self.config
            .retry_policy()
            .run(&what, || {
                self.chain
                    .get_logs(target.emitter, &topics, from_block, to_block)
            })
            .await
    }
}
