//! Valuation History
//!
//! Append-only snapshot sequence with a retention cap (oldest evicted
//! first), plus the day-aggregated series consumed by trend views.

use crate::types::ValuationSnapshot;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Snapshots retained per position
pub const DEFAULT_HISTORY_CAP: usize = 500;

/// Appends `snapshot` and evicts the oldest entries beyond `cap`
pub fn append_bounded(history: &mut Vec<ValuationSnapshot>, snapshot: ValuationSnapshot, cap: usize) {
    history.push(snapshot);
    if history.len() > cap {
        let excess = history.len() - cap;
        history.drain(..excess);
    }
}

/// Last-known-good volatile price, from the newest live-priced snapshot.
///
/// Stale snapshots are skipped: their price was itself a fallback and
/// must not come back as an observed one.
pub fn last_known_price(history: &[ValuationSnapshot]) -> Option<Decimal> {
    history
        .iter()
        .rev()
        .filter(|s| !s.price_stale)
        .map(|s| s.price_volatile)
        .find(|p| *p > Decimal::ZERO)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyPoint {
    pub date: NaiveDate,
    pub value_usd: Decimal,
}

/// One value per day, ascending by date.
///
/// The deposit day is seeded with the invested amount (value at entry),
/// then each day takes its last snapshot with a non-zero value, and
/// `today` is always the current value.
pub fn daily_series(
    history: &[ValuationSnapshot],
    deposit_date: NaiveDate,
    invested: Decimal,
    current_value: Decimal,
    today: NaiveDate,
) -> Vec<DailyPoint> {
    let mut by_day: BTreeMap<NaiveDate, Decimal> = BTreeMap::new();
    by_day.insert(deposit_date, invested);

    let mut ordered: Vec<&ValuationSnapshot> = history.iter().collect();
    ordered.sort_by_key(|s| s.timestamp);
    for snapshot in ordered {
        if snapshot.value_usd > Decimal::ZERO {
            by_day.insert(snapshot.timestamp.date_naive(), snapshot.value_usd);
        }
    }

    by_day.insert(today, current_value);

    by_day
        .into_iter()
        .map(|(date, value_usd)| DailyPoint { date, value_usd })
        .collect()
}
