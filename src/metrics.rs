//! Performance Metrics
//!
//! Pure, total functions over a valuation, a fee ledger and a baseline.
//! Every ratio has an explicit zero guard and all arithmetic saturates at
//! the `Decimal` bounds, so no input can panic.
//!
//! Definitions:
//! - netPnl    = value + fees - invested
//! - roi%      = netPnl / invested * 100
//! - feeApr%   = fees / invested * 365 / days * 100
//! - totalApr% = roi% * 365 / days (linear annualization, not compounding)
//! - il%       = (2 * sqrt(r) / (1 + r) - 1) * 100, r = price / entry price
//! - hodl      = invested / 2 + (invested / 2 / entry price) * price
//!
//! The HODL baseline assumes a 50/50 USD split at entry. It is a modeling
//! assumption, not derived from the actual entry amounts.

use crate::fees::FeeLedger;
use crate::types::Baseline;
use crate::valuation::Valuation;
use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, MathematicalOps};
use serde::{Deserialize, Serialize};

/// Floor for `days_active` (0.001 days, ~86 seconds)
pub const MIN_DAYS_ACTIVE: Decimal = Decimal::from_parts(1, 0, 0, false, 3);

const SECONDS_PER_DAY: i64 = 86_400;
const DAYS_PER_YEAR: i64 = 365;
const HUNDRED: i64 = 100;

/// Everything the metrics layer consumes, in USD / human units
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsInput {
    pub current_value_usd: Decimal,
    pub collected0: Decimal,
    pub collected1: Decimal,
    /// Stable side pinned to 1
    pub price0_usd: Decimal,
    pub price1_usd: Decimal,
    pub pending_fees_usd: Decimal,
    pub current_volatile_price: Decimal,
    /// False when the valuation has no usable price (unavailable or invalid)
    pub priced: bool,
    pub baseline: Option<Baseline>,
    pub now: DateTime<Utc>,
}

impl MetricsInput {
    pub fn new(
        valuation: &Valuation,
        ledger: &FeeLedger,
        baseline: Option<Baseline>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            current_value_usd: valuation.value_usd,
            collected0: ledger.total_collected0,
            collected1: ledger.total_collected1,
            price0_usd: valuation.price0_usd,
            price1_usd: valuation.price1_usd,
            pending_fees_usd: valuation.pending_fees_usd,
            current_volatile_price: valuation.price_volatile(),
            priced: valuation.is_priced(),
            baseline,
            now,
        }
    }
}

/// Linear extrapolation of the observed average daily fee rate
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeeProjections {
    pub daily: Decimal,
    pub weekly: Decimal,
    pub monthly: Decimal,
    pub yearly: Decimal,
    /// Each period's fee income as a percentage of the invested amount
    pub daily_roi_percent: Decimal,
    pub weekly_roi_percent: Decimal,
    pub monthly_roi_percent: Decimal,
    pub yearly_roi_percent: Decimal,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsResult {
    pub current_value_usd: Decimal,
    pub collected_value_usd: Decimal,
    pub pending_value_usd: Decimal,
    pub total_fees_usd: Decimal,
    pub days_active: Decimal,
    pub net_pnl: Decimal,
    pub roi_percent: Decimal,
    pub fee_apr: Decimal,
    pub total_apr: Decimal,
    pub price_ratio: Decimal,
    pub il_percent: Decimal,
    /// value - hodl, in USD
    pub il_usd: Decimal,
    pub hodl_value_usd: Decimal,
    pub lp_vs_hodl_usd: Decimal,
    pub projections: FeeProjections,
    /// No baseline: only value and fee totals are meaningful
    pub baseline_missing: bool,
    /// Valuation was unpriced or invalid: PnL, percentages and HODL are not computed
    pub valuation_unpriced: bool,
}

/// `max(now - deposit in days, MIN_DAYS_ACTIVE)`
pub fn days_active(deposit: DateTime<Utc>, now: DateTime<Utc>) -> Decimal {
    let seconds = (now - deposit).num_seconds();
    let days = Decimal::from(seconds) / Decimal::from(SECONDS_PER_DAY);
    days.max(MIN_DAYS_ACTIVE)
}

/// `numer / denom`, saturating on overflow, zero when `denom` is zero
fn saturating_div(numer: Decimal, denom: Decimal) -> Decimal {
    if denom.is_zero() {
        return Decimal::ZERO;
    }
    numer.checked_div(denom).unwrap_or_else(|| {
        if numer.is_sign_negative() != denom.is_sign_negative() {
            Decimal::MIN
        } else {
            Decimal::MAX
        }
    })
}

/// `part / whole * 100`, zero when `whole <= 0`
fn percent_of(part: Decimal, whole: Decimal) -> Decimal {
    if whole <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    saturating_div(part.saturating_mul(Decimal::from(HUNDRED)), whole)
}

pub fn net_pnl(current_value: Decimal, total_fees: Decimal, invested: Decimal) -> Decimal {
    current_value.saturating_add(total_fees).saturating_sub(invested)
}

pub fn roi_percent(net_pnl: Decimal, invested: Decimal) -> Decimal {
    percent_of(net_pnl, invested)
}

pub fn fee_apr(total_fees: Decimal, invested: Decimal, days: Decimal) -> Decimal {
    if invested <= Decimal::ZERO || days <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    let per_year = saturating_div(total_fees.saturating_mul(Decimal::from(DAYS_PER_YEAR)), days);
    percent_of(per_year, invested)
}

pub fn total_apr(roi_percent: Decimal, days: Decimal) -> Decimal {
    if days <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    saturating_div(roi_percent.saturating_mul(Decimal::from(DAYS_PER_YEAR)), days)
}

/// `current / initial`, or 1 when there is no usable entry price
pub fn price_ratio(current_price: Decimal, initial_price: Decimal) -> Decimal {
    if initial_price <= Decimal::ZERO {
        return Decimal::ONE;
    }
    saturating_div(current_price, initial_price)
}

/// Constant-product impermanent loss, in percent (always <= 0)
pub fn il_percent(price_ratio: Decimal) -> Decimal {
    if price_ratio <= Decimal::ZERO || price_ratio == Decimal::ONE {
        return Decimal::ZERO;
    }
    let Some(root) = price_ratio.sqrt() else {
        return Decimal::ZERO;
    };
    // 2 * sqrt(r) / (1 + r) tends to 0 as r grows
    let Some(denom) = Decimal::ONE.checked_add(price_ratio) else {
        return -Decimal::from(HUNDRED);
    };
    (Decimal::TWO * root / denom - Decimal::ONE) * Decimal::from(HUNDRED)
}

/// Value of the entry capital held 50/50 instead of pooled
pub fn hodl_value(invested: Decimal, initial_price: Decimal, current_price: Decimal) -> Decimal {
    if initial_price <= Decimal::ZERO {
        return invested;
    }
    let half = invested / Decimal::TWO;
    half.saturating_add(saturating_div(half.saturating_mul(current_price), initial_price))
}

pub fn project_fees(total_fees: Decimal, days: Decimal, invested: Decimal) -> FeeProjections {
    if days <= Decimal::ZERO {
        return FeeProjections::default();
    }
    let daily = saturating_div(total_fees, days);
    let weekly = daily.saturating_mul(Decimal::from(7));
    let monthly = daily.saturating_mul(Decimal::from(30));
    let yearly = daily.saturating_mul(Decimal::from(DAYS_PER_YEAR));
    FeeProjections {
        daily,
        weekly,
        monthly,
        yearly,
        daily_roi_percent: percent_of(daily, invested),
        weekly_roi_percent: percent_of(weekly, invested),
        monthly_roi_percent: percent_of(monthly, invested),
        yearly_roi_percent: percent_of(yearly, invested),
    }
}

/// Computes every metric for one position
pub fn compute_metrics(input: &MetricsInput) -> MetricsResult {
    let collected_value_usd = input
        .collected0
        .saturating_mul(input.price0_usd)
        .saturating_add(input.collected1.saturating_mul(input.price1_usd));
    let pending_value_usd = input.pending_fees_usd;
    let total_fees_usd = collected_value_usd.saturating_add(pending_value_usd);

    let days = input
        .baseline
        .as_ref()
        .map(|b| days_active(b.deposit_timestamp, input.now))
        .unwrap_or(Decimal::ZERO);
    let absolute_only = MetricsResult {
        current_value_usd: input.current_value_usd,
        collected_value_usd,
        pending_value_usd,
        total_fees_usd,
        days_active: days,
        price_ratio: Decimal::ONE,
        baseline_missing: input.baseline.is_none(),
        valuation_unpriced: !input.priced,
        ..MetricsResult::default()
    };

    let Some(baseline) = &input.baseline else {
        return absolute_only;
    };
    // a zero value from a missing price would read as a total loss
    if !input.priced {
        return absolute_only;
    }

    let invested = baseline.initial_invested_usd;
    let pnl = net_pnl(input.current_value_usd, total_fees_usd, invested);
    let roi = roi_percent(pnl, invested);
    let ratio = price_ratio(input.current_volatile_price, baseline.initial_reference_price);
    let hodl = hodl_value(
        invested,
        baseline.initial_reference_price,
        input.current_volatile_price,
    );

    MetricsResult {
        current_value_usd: input.current_value_usd,
        collected_value_usd,
        pending_value_usd,
        total_fees_usd,
        days_active: days,
        net_pnl: pnl,
        roi_percent: roi,
        fee_apr: fee_apr(total_fees_usd, invested, days),
        total_apr: if invested > Decimal::ZERO {
            total_apr(roi, days)
        } else {
            Decimal::ZERO
        },
        price_ratio: ratio,
        il_percent: il_percent(ratio),
        il_usd: input.current_value_usd.saturating_sub(hodl),
        hodl_value_usd: hodl,
        lp_vs_hodl_usd: input
            .current_value_usd
            .saturating_add(total_fees_usd)
            .saturating_sub(hodl),
        projections: project_fees(total_fees_usd, days, invested),
        baseline_missing: false,
        valuation_unpriced: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;

    fn assert_close(actual: Decimal, expected: Decimal) {
        assert!(
            (actual - expected).abs() < dec!(0.000000000001),
            "expected {} got {}",
            expected,
            actual
        );
    }

    fn deposit() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn input(invested: Decimal, value: Decimal, fees: Decimal, days: i64) -> MetricsInput {
        MetricsInput {
            current_value_usd: value,
            collected0: fees,
            collected1: Decimal::ZERO,
            price0_usd: Decimal::ONE,
            price1_usd: dec!(100000),
            pending_fees_usd: Decimal::ZERO,
            current_volatile_price: dec!(100000),
            priced: true,
            baseline: Some(Baseline {
                initial_invested_usd: invested,
                deposit_timestamp: deposit(),
                initial_reference_price: dec!(100000),
            }),
            now: deposit() + Duration::days(days),
        }
    }

    #[test]
    fn test_reference_scenario() {
        let m = compute_metrics(&input(dec!(100), dec!(90), dec!(15), 30));
        assert_eq!(m.days_active, dec!(30));
        assert_eq!(m.total_fees_usd, dec!(15));
        assert_eq!(m.net_pnl, dec!(5));
        assert_eq!(m.roi_percent, dec!(5));
        assert_eq!(m.fee_apr, dec!(182.5));
        assert_close(m.total_apr, dec!(5) * dec!(365) / dec!(30));
        assert_eq!(m.projections.daily, dec!(0.5));
        assert_eq!(m.projections.weekly, dec!(3.5));
        assert_eq!(m.projections.monthly, dec!(15));
        assert_eq!(m.projections.yearly, dec!(182.5));
        assert_eq!(m.projections.yearly_roi_percent, dec!(182.5));
    }

    #[test]
    fn test_zero_invested_percentages_are_zero() {
        let m = compute_metrics(&input(Decimal::ZERO, dec!(90), dec!(15), 30));
        assert_eq!(m.roi_percent, Decimal::ZERO);
        assert_eq!(m.fee_apr, Decimal::ZERO);
        assert_eq!(m.total_apr, Decimal::ZERO);
        assert_eq!(m.projections.daily_roi_percent, Decimal::ZERO);
        assert_eq!(m.net_pnl, dec!(105));
        assert_eq!(m.hodl_value_usd, Decimal::ZERO);
    }

    #[test]
    fn test_il_values() {
        assert_eq!(il_percent(Decimal::ONE), Decimal::ZERO);
        assert_close(il_percent(dec!(4)), dec!(-20));
        // symmetric in log space: r and 1/r give the same loss
        assert_close(il_percent(dec!(0.25)), dec!(-20));
        assert_eq!(il_percent(Decimal::ZERO), Decimal::ZERO);
        assert_eq!(il_percent(dec!(-3)), Decimal::ZERO);
        assert!(il_percent(dec!(1.1)) < Decimal::ZERO);
    }

    #[test]
    fn test_price_ratio_guard() {
        assert_eq!(price_ratio(dec!(200), dec!(100)), dec!(2));
        assert_eq!(price_ratio(dec!(200), Decimal::ZERO), Decimal::ONE);
        assert_eq!(price_ratio(dec!(200), dec!(-5)), Decimal::ONE);
    }

    #[test]
    fn test_hodl_and_lp_vs_hodl() {
        // invested 100 at 100k; price now 120k -> 50 + 50 * 1.2 = 110
        let mut i = input(dec!(100), dec!(104), dec!(3), 10);
        i.current_volatile_price = dec!(120000);
        let m = compute_metrics(&i);
        assert_eq!(m.hodl_value_usd, dec!(110));
        assert_eq!(m.il_usd, dec!(-6));
        assert_eq!(m.lp_vs_hodl_usd, dec!(-3));
        assert_eq!(m.price_ratio, dec!(1.2));

        // no entry price: hodl is just the principal
        assert_eq!(hodl_value(dec!(100), Decimal::ZERO, dec!(5)), dec!(100));
    }

    #[test]
    fn test_days_active_floor() {
        let d = deposit();
        assert_eq!(days_active(d, d), MIN_DAYS_ACTIVE);
        assert_eq!(days_active(d, d - Duration::days(3)), MIN_DAYS_ACTIVE);
        assert_eq!(days_active(d, d + Duration::hours(12)), dec!(0.5));
        assert_eq!(MIN_DAYS_ACTIVE, dec!(0.001));
    }

    #[test]
    fn test_same_day_apr_is_finite() {
        let mut i = input(dec!(1000), dec!(1000), dec!(1), 0);
        i.now = deposit() + Duration::hours(6);
        let m = compute_metrics(&i);
        assert_eq!(m.days_active, dec!(0.25));
        assert_eq!(m.fee_apr, dec!(146));
    }

    #[test]
    fn test_collected_value_uses_both_prices() {
        let mut i = input(dec!(100), dec!(100), Decimal::ZERO, 30);
        i.collected0 = dec!(0.01);
        i.collected1 = dec!(0.0000005);
        i.pending_fees_usd = dec!(1);
        let m = compute_metrics(&i);
        assert_eq!(m.collected_value_usd, dec!(0.06));
        assert_eq!(m.pending_value_usd, dec!(1));
        assert_eq!(m.total_fees_usd, dec!(1.06));
    }

    #[test]
    fn test_missing_baseline_keeps_absolute_values() {
        let mut i = input(dec!(100), dec!(90), dec!(15), 30);
        i.baseline = None;
        let m = compute_metrics(&i);
        assert!(m.baseline_missing);
        assert_eq!(m.current_value_usd, dec!(90));
        assert_eq!(m.total_fees_usd, dec!(15));
        assert_eq!(m.roi_percent, Decimal::ZERO);
        assert_eq!(m.fee_apr, Decimal::ZERO);
        assert_eq!(m.il_percent, Decimal::ZERO);
    }

    #[test]
    fn test_unpriced_valuation_is_not_a_loss() {
        // invalid range with $1000 invested: value is zero because there is no price
        let mut i = input(dec!(1000), Decimal::ZERO, Decimal::ZERO, 30);
        i.priced = false;
        i.current_volatile_price = Decimal::ZERO;
        let m = compute_metrics(&i);
        assert!(m.valuation_unpriced);
        assert!(!m.baseline_missing);
        assert_eq!(m.net_pnl, Decimal::ZERO);
        assert_eq!(m.roi_percent, Decimal::ZERO);
        assert_eq!(m.total_apr, Decimal::ZERO);
        assert_eq!(m.il_percent, Decimal::ZERO);
        assert_eq!(m.hodl_value_usd, Decimal::ZERO);
        assert_eq!(m.lp_vs_hodl_usd, Decimal::ZERO);
        assert_eq!(m.days_active, dec!(30));
    }

    #[test]
    fn test_unpriced_metrics_from_invalid_valuation() {
        use crate::types::fixtures::{cbbtc_usdc_position, USDC};
        use crate::types::StableSet;
        use crate::valuation::{value_position, UsdQuotes, ValuationStatus};

        let mut position = cbbtc_usdc_position();
        position.liquidity = 1_000;
        position.tick_upper = position.tick_lower;
        let quotes = UsdQuotes::volatile(
            position.stable_side(&StableSet::new([USDC])),
            dec!(100000),
            false,
        );
        let valuation = value_position(&position, &StableSet::new([USDC]), &quotes);
        assert!(matches!(valuation.status, ValuationStatus::Invalid(_)));

        let baseline = Baseline {
            initial_invested_usd: dec!(1000),
            deposit_timestamp: deposit(),
            initial_reference_price: dec!(100000),
        };
        let ledger = FeeLedger::new(position.position_id);
        let m = compute_metrics(&MetricsInput::new(
            &valuation,
            &ledger,
            Some(baseline),
            deposit() + Duration::days(30),
        ));
        assert!(m.valuation_unpriced);
        assert_eq!(m.roi_percent, Decimal::ZERO);
        assert_eq!(m.net_pnl, Decimal::ZERO);
    }

    #[test]
    fn test_extreme_inputs_saturate_instead_of_panicking() {
        // dust invested, large value, synced the moment it was deposited
        let mut i = input(dec!(0.000000000000000001), dec!(100000), dec!(15), 0);
        i.now = deposit();
        let m = compute_metrics(&i);
        assert_eq!(m.days_active, MIN_DAYS_ACTIVE);
        assert!(m.roi_percent > Decimal::ZERO);
        assert_eq!(m.total_apr, Decimal::MAX);
        assert!(m.fee_apr > Decimal::ZERO);
        assert!(m.projections.yearly_roi_percent > Decimal::ZERO);

        assert_eq!(total_apr(Decimal::MAX, MIN_DAYS_ACTIVE), Decimal::MAX);
        assert_eq!(total_apr(Decimal::MIN, MIN_DAYS_ACTIVE), Decimal::MIN);
        assert_eq!(percent_of(Decimal::MAX, dec!(0.5)), Decimal::MAX);
        assert_eq!(price_ratio(dec!(10000000000), dec!(0.0000000000000000000001)), Decimal::MAX);
        assert_close(il_percent(Decimal::MAX), dec!(-100));
        assert_eq!(net_pnl(Decimal::MAX, Decimal::MAX, Decimal::ZERO), Decimal::MAX);
    }
}
