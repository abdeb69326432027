//! Sync Orchestration
//!
//! One cycle per position:
//!     lock -> read position -> price -> value -> reconcile fees
//!          -> persist snapshot/history -> metrics
//!
//! Positions are processed sequentially. A failure in one position is
//! logged and reported; the remaining positions still run.

use crate::chain::{ChainReader, PositionReader};
use crate::config::{PositionConfig, TrackerConfig};
use crate::error::{TrackerError, TrackerResult};
use crate::fees::{CollectTarget, FeeLedger, FeeReconciler, ReconcileOutcome, ReconcileReport};
use crate::history::{append_bounded, daily_series, last_known_price, DailyPoint};
use crate::metrics::{compute_metrics, MetricsInput, MetricsResult};
use crate::oracle::{pool_price, resolve_quote, PriceOracle, PriceSource, Quote, QuoteOrigin};
use crate::store::PositionStore;
use crate::types::{Baseline, PositionState, StableSet, StableSide, ValuationSnapshot};
use crate::valuation::{value_position, UsdQuotes, Valuation, ValuationStatus};
use alloy::primitives::Address;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Everything one sync (or offline report) produced for a position
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub label: String,
    pub position: PositionState,
    pub valuation: Valuation,
    /// Origin of the volatile-side quote, `None` when unpriced
    pub price_origin: Option<QuoteOrigin>,
    pub ledger: FeeLedger,
    /// `None` for offline reports
    pub fee_outcome: Option<ReconcileOutcome>,
    pub metrics: MetricsResult,
    pub daily: Vec<DailyPoint>,
    pub generated_at: DateTime<Utc>,
}

pub struct SyncEngine<C, S: ?Sized> {
    store: Arc<S>,
    reader: PositionReader<C>,
    reconciler: FeeReconciler<C>,
    oracle: Option<Arc<dyn PriceOracle>>,
    stables: StableSet,
    price_source: PriceSource,
    position_manager: Address,
    history_cap: usize,
}

impl<C: ChainReader, S: PositionStore + ?Sized> SyncEngine<C, S> {
    pub fn new(chain: Arc<C>, store: Arc<S>, config: &TrackerConfig) -> Self {
        Self {
            reader: PositionReader::new(
                chain.clone(),
                config.general.position_manager,
                config.general.factory,
            )
            .with_retry(config.retry_policy()),
            reconciler: FeeReconciler::new(chain, config.reconciler_config()),
            store,
            oracle: None,
            stables: config.stable_set(),
            price_source: config.general.price_source,
            position_manager: config.general.position_manager,
            history_cap: config.general.history_cap,
        }
    }

    /// External USD quotes (CoinGecko source, and pairs with no stable side)
    pub fn with_oracle(mut self, oracle: Arc<dyn PriceOracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    /// Syncs every position in order, continuing past failures
    pub async fn sync_all(
        &mut self,
        positions: &[PositionConfig],
    ) -> Vec<(u64, TrackerResult<SyncReport>)> {
        let mut results = Vec::with_capacity(positions.len());
        for position in positions {
            let result = self.sync_position(position).await;
            if let Err(e) = &result {
                error!("{} failed: {}", position.display_name(), e);
            }
            results.push((position.id, result));
        }
        results
    }

    /// Full cycle for one position
    pub async fn sync_position(&mut self, cfg: &PositionConfig) -> TrackerResult<SyncReport> {
        let _lock = self.store.lock(cfg.id)?;
        let label = cfg.display_name();
        info!("── {} (#{}) ──", label, cfg.id);

        let position = self.reader.fetch(cfg.id).await?;
        self.store.save_position(&position)?;
        info!(
            "  {} fee {:.2}% | ticks [{}, {}) current {}{} | {}",
            position.pair_symbol(),
            position.fee_percent(),
            position.tick_lower,
            position.tick_upper,
            position.current_tick,
            if position.tick_estimated { " (estimated)" } else { "" },
            if position.in_range() { "IN RANGE" } else { "OUT OF RANGE" }
        );

        let mut history = self.store.load_history(cfg.id)?;
        let (quotes, price_origin) = self.quotes(&position, cfg, &history).await;
        let valuation = value_position(&position, &self.stables, &quotes);

        let target = CollectTarget::for_position(
            &position,
            self.position_manager,
            cfg.collect_first_token,
            cfg.start_block,
        );
        // a failed fee scan must not lose the valuation of this cycle
        let (ledger, outcome) = match self.reconciler.reconcile(self.store.as_ref(), &target).await {
            Ok(ReconcileReport { ledger, outcome }) => (ledger, outcome),
            Err(e) => {
                warn!("  fee reconciliation failed, using stored ledger: {}", e);
                let ledger = self
                    .store
                    .load_ledger(cfg.id)?
                    .filter(|l| l.position_id == cfg.id)
                    .unwrap_or_else(|| FeeLedger::new(cfg.id));
                (ledger, ReconcileOutcome::Failed { error: e.to_string() })
            }
        };

        let now = Utc::now();
        if !matches!(valuation.status, ValuationStatus::Invalid(_)) {
            append_bounded(&mut history, valuation.to_snapshot(now), self.history_cap);
            self.store.save_history(cfg.id, &history)?;
        }

        let baseline = self.baseline(cfg)?;
        let metrics = compute_metrics(&MetricsInput::new(&valuation, &ledger, baseline.clone(), now));
        let daily = daily_for(&history, baseline.as_ref(), &metrics, now);

        log_summary(&valuation, &metrics, &outcome);

        Ok(SyncReport {
            label,
            position,
            valuation,
            price_origin,
            ledger,
            fee_outcome: Some(outcome),
            metrics,
            daily,
            generated_at: now,
        })
    }

    /// Fee reconciliation only (no valuation, no snapshot)
    pub async fn sync_fees(&mut self, cfg: &PositionConfig) -> TrackerResult<ReconcileReport> {
        let _lock = self.store.lock(cfg.id)?;
        let position = match self.store.load_position(cfg.id)? {
            Some(position) => position,
            None => {
                let position = self.reader.fetch(cfg.id).await?;
                self.store.save_position(&position)?;
                position
            }
        };
        let target = CollectTarget::for_position(
            &position,
            self.position_manager,
            cfg.collect_first_token,
            cfg.start_block,
        );
        self.reconciler.reconcile(self.store.as_ref(), &target).await
    }

    /// Config baseline wins and is written through; otherwise the stored one
    fn baseline(&self, cfg: &PositionConfig) -> TrackerResult<Option<Baseline>> {
        if let Some(baseline) = cfg.baseline()? {
            self.store.save_baseline(cfg.id, &baseline)?;
            return Ok(Some(baseline));
        }
        match self.store.load_baseline(cfg.id) {
            Ok(baseline) => Ok(Some(baseline)),
            Err(TrackerError::ConfigMissing(id)) => {
                warn!("Position {}: no baseline, percentage metrics will be zero", id);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn external_price(&self, token_id: Option<&str>) -> TrackerResult<Decimal> {
        match (&self.oracle, token_id) {
            (Some(oracle), Some(id)) => oracle.get_price(id).await,
            (None, _) => Err(TrackerError::PriceUnavailable("no price oracle configured".into())),
            (_, None) => Err(TrackerError::PriceUnavailable("no coingecko_id configured".into())),
        }
    }

    async fn quotes(
        &self,
        position: &PositionState,
        cfg: &PositionConfig,
        history: &[ValuationSnapshot],
    ) -> (UsdQuotes, Option<QuoteOrigin>) {
        let side = position.stable_side(&self.stables);
        let label = position.pair_symbol();

        if side == StableSide::Neither {
            // both sides priced externally; last-known-good covers token0 only
            let live0 = self.external_price(cfg.coingecko_id.as_deref()).await;
            let live1 = self.external_price(cfg.coingecko_id_quote.as_deref()).await;
            let q0 = resolve_quote(&position.token0.symbol, live0, last_known_price(history), cfg.fallback_price);
            let q1 = resolve_quote(&position.token1.symbol, live1, None, None);
            let stale = q0.map(|q| q.is_stale()).unwrap_or(false) || q1.map(|q| q.is_stale()).unwrap_or(false);
            let quotes = UsdQuotes {
                token0: q0.map(|q| q.price),
                token1: q1.map(|q| q.price),
                stale,
            };
            let origin = match (q0, q1) {
                (Some(a), Some(b)) => Some(if a.is_stale() { a.origin } else { b.origin }),
                _ => None,
            };
            return (quotes, origin);
        }

        let live = match self.price_source {
            PriceSource::Pool => pool_price(position, &self.stables),
            PriceSource::Coingecko => self.external_price(cfg.coingecko_id.as_deref()).await,
        };
        match resolve_quote(&label, live, last_known_price(history), cfg.fallback_price) {
            Some(Quote { price, origin }) => (
                UsdQuotes::volatile(side, price, origin != QuoteOrigin::Live),
                Some(origin),
            ),
            None => (UsdQuotes::default(), None),
        }
    }
}

fn daily_for(
    history: &[ValuationSnapshot],
    baseline: Option<&Baseline>,
    metrics: &MetricsResult,
    now: DateTime<Utc>,
) -> Vec<DailyPoint> {
    match baseline {
        Some(b) => daily_series(
            history,
            b.deposit_timestamp.date_naive(),
            b.initial_invested_usd,
            metrics.current_value_usd,
            now.date_naive(),
        ),
        None => Vec::new(),
    }
}

fn log_summary(valuation: &Valuation, metrics: &MetricsResult, outcome: &ReconcileOutcome) {
    match &valuation.status {
        ValuationStatus::Live => {}
        ValuationStatus::Stale => warn!("  price is stale (fallback quote)"),
        ValuationStatus::PriceUnavailable => warn!("  price unavailable, USD values are zero"),
        ValuationStatus::Invalid(reason) => warn!("  invalid position: {}", reason),
    }
    if let Some(range) = &valuation.range {
        info!(
            "  range ${:.2} - ${:.2} | current ${:.2}",
            range.lower, range.upper, range.current
        );
    }
    info!(
        "  value ${:.2} | fees ${:.2} (collected ${:.2} + pending ${:.2})",
        metrics.current_value_usd,
        metrics.total_fees_usd,
        metrics.collected_value_usd,
        metrics.pending_value_usd
    );
    if metrics.baseline_missing {
        info!("  no baseline: PnL/APR not computed");
    } else if metrics.valuation_unpriced {
        warn!("  no usable price: PnL/APR not computed");
    } else {
        info!(
            "  PnL ${:.2} ({:.2}%) | fee APR {:.2}% | total APR {:.2}% | IL {:.2}% | {:.1} days",
            metrics.net_pnl,
            metrics.roi_percent,
            metrics.fee_apr,
            metrics.total_apr,
            metrics.il_percent,
            metrics.days_active
        );
    }
    match outcome {
        ReconcileOutcome::Partial { .. } => {
            warn!("  fee ledger partially reconciled, next run resumes from the gap")
        }
        ReconcileOutcome::Failed { error } => warn!("  fee ledger not reconciled: {}", error),
        _ => {}
    }
}

/// Offline report from persisted state (no RPC).
///
/// Values the last stored position at the last-known-good price (or the
/// configured fallback), so the result is always flagged stale. `None` when the position was never synced.
pub fn report_from_store<S: PositionStore + ?Sized>(
    store: &S,
    cfg: &PositionConfig,
    stables: &StableSet,
    now: DateTime<Utc>,
) -> TrackerResult<Option<SyncReport>> {
    let Some(position) = store.load_position(cfg.id)? else {
        return Ok(None);
    };
    let history = store.load_history(cfg.id)?;
    let ledger = store
        .load_ledger(cfg.id)?
        .filter(|l| l.position_id == cfg.id)
        .unwrap_or_else(|| FeeLedger::new(cfg.id));

    let side = position.stable_side(stables);
    let last = match (last_known_price(&history), cfg.fallback_price) {
        (Some(price), _) => Some((price, QuoteOrigin::LastKnownGood)),
        (None, Some(price)) if price > Decimal::ZERO => Some((price, QuoteOrigin::ConfiguredFallback)),
        _ => None,
    };
    let (quotes, price_origin) = match (side, last) {
        (StableSide::Neither, _) | (_, None) => (UsdQuotes::default(), None),
        (side, Some((price, origin))) => (UsdQuotes::volatile(side, price, true), Some(origin)),
    };
    let valuation = value_position(&position, stables, &quotes);

    let baseline = match cfg.baseline()? {
        Some(b) => Some(b),
        None => match store.load_baseline(cfg.id) {
            Ok(b) => Some(b),
            Err(TrackerError::ConfigMissing(_)) => None,
            Err(e) => return Err(e),
        },
    };
    let metrics = compute_metrics(&MetricsInput::new(&valuation, &ledger, baseline.clone(), now));
    let daily = daily_for(&history, baseline.as_ref(), &metrics, now);

    Ok(Some(SyncReport {
        label: cfg.display_name(),
        position,
        valuation,
        price_origin,
        ledger,
        fee_outcome: None,
        metrics,
        daily,
        generated_at: now,
    }))
}
