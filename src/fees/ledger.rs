//! Fee Ledger
//!
//! Persisted cumulative collected-fee totals plus the scan cursor.
//! Totals, event count and cursor only ever move forward.

use alloy::primitives::Address;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// How decoded Collect amounts map onto the position's token slots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotMapping {
    /// First decoded amount is token0
    Direct,
    /// First decoded amount is token1
    Swapped,
}

impl SlotMapping {
    /// Derived from the token the emitter denominates its first amount in.
    ///
    /// The V3 position manager emits amounts in pool order, so for V3 this is
    /// `Direct`; other emitters may not.
    pub fn derive(first_amount_token: Address, position_token0: Address) -> Self {
        if first_amount_token == position_token0 {
            SlotMapping::Direct
        } else {
            SlotMapping::Swapped
        }
    }

    /// Reorders `(first, second)` decoded amounts into `(token0, token1)`
    pub fn apply<T>(&self, first: T, second: T) -> (T, T) {
        match self {
            SlotMapping::Direct => (first, second),
            SlotMapping::Swapped => (second, first),
        }
    }
}

/// Collected fees from one scanned block range, human units
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LedgerDelta {
    pub collected0: Decimal,
    pub collected1: Decimal,
    pub events: u64,
}

impl LedgerDelta {
    pub fn add(&mut self, amount0: Decimal, amount1: Decimal) {
        self.collected0 += amount0;
        self.collected1 += amount1;
        self.events += 1;
    }
}

/// Fee ledger for one position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeLedger {
    pub position_id: u64,
    /// Cumulative collected amounts, human units, position token order
    pub total_collected0: Decimal,
    pub total_collected1: Decimal,
    /// Highest block fully scanned; `None` before the first scan
    pub last_scanned_block: Option<u64>,
    pub events_count: u64,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl FeeLedger {
    pub fn new(position_id: u64) -> Self {
        Self {
            position_id,
            total_collected0: Decimal::ZERO,
            total_collected1: Decimal::ZERO,
            last_scanned_block: None,
            events_count: 0,
            updated_at: None,
        }
    }

    /// First block a resumed scan must read
    pub fn next_block(&self, default_start: u64) -> u64 {
        match self.last_scanned_block {
            Some(block) => block.saturating_add(1),
            None => default_start,
        }
    }

    /// Merges a fully scanned range ending at `scanned_to`.
    ///
    /// Cursor never moves backwards; negative deltas are ignored.
    pub fn apply(&mut self, delta: &LedgerDelta, scanned_to: u64) {
        if delta.collected0 > Decimal::ZERO {
            self.total_collected0 += delta.collected0;
        }
        if delta.collected1 > Decimal::ZERO {
            self.total_collected1 += delta.collected1;
        }
        self.events_count += delta.events;
        self.last_scanned_block = Some(match self.last_scanned_block {
            Some(prev) => prev.max(scanned_to),
            None => scanned_to,
        });
        self.updated_at = Some(Utc::now());
    }

    /// Same totals, count and cursor (ignores `updated_at`)
    pub fn same_progress(&self, other: &FeeLedger) -> bool {
        self.position_id == other.position_id
            && self.total_collected0 == other.total_collected0
            && self.total_collected1 == other.total_collected1
            && self.last_scanned_block == other.last_scanned_block
            && self.events_count == other.events_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_next_block() {
        let mut ledger = FeeLedger::new(1);
        assert_eq!(ledger.next_block(20_000_000), 20_000_000);
        ledger.apply(&LedgerDelta::default(), 20_004_999);
        assert_eq!(ledger.next_block(20_000_000), 20_005_000);
    }

    #[test]
    fn test_apply_is_monotonic() {
        let mut ledger = FeeLedger::new(1);
        let mut delta = LedgerDelta::default();
        delta.add(dec!(0.01), dec!(0.0000005));
        ledger.apply(&delta, 500);

        // A stale range can never pull the cursor back
        ledger.apply(&LedgerDelta::default(), 400);
        assert_eq!(ledger.last_scanned_block, Some(500));

        let negative = LedgerDelta {
            collected0: dec!(-1),
            collected1: dec!(-1),
            events: 0,
        };
        ledger.apply(&negative, 600);
        assert_eq!(ledger.total_collected0, dec!(0.01));
        assert_eq!(ledger.total_collected1, dec!(0.0000005));
        assert_eq!(ledger.events_count, 1);
    }

    #[test]
    fn test_slot_mapping() {
        let a = Address::new([1; 20]);
        let b = Address::new([2; 20]);
        assert_eq!(SlotMapping::derive(a, a), SlotMapping::Direct);
        assert_eq!(SlotMapping::derive(b, a), SlotMapping::Swapped);
        assert_eq!(SlotMapping::Swapped.apply(1, 2), (2, 1));
        assert_eq!(SlotMapping::Direct.apply(1, 2), (1, 2));
    }
}
