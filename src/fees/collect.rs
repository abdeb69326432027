//! Collect Event Decoding
//!
//! `Collect(uint256 indexed tokenId, address recipient, uint256 amount0, uint256 amount1)`
//!
//! topic0 = event signature, topic1 = tokenId (32-byte padded),
//! data = recipient | amount0 | amount1 as three 32-byte words.

use super::ledger::SlotMapping;
use crate::chain::LogEntry;
use crate::contracts::COLLECT_TOPIC;
use crate::error::{TrackerError, TrackerResult};
use crate::math;
use crate::types::{PositionState, TokenInfo};
use alloy::primitives::{Address, B256, U256};
use rust_decimal::Decimal;

/// recipient + amount0 + amount1
const COLLECT_DATA_LEN: usize = 96;

/// 32-byte topic for a position id
pub fn position_topic(position_id: u64) -> B256 {
    B256::from(U256::from(position_id).to_be_bytes::<32>())
}

/// Everything needed to find and decode one position's Collect events
#[derive(Debug, Clone, PartialEq)]
pub struct CollectTarget {
    pub position_id: u64,
    /// Contract emitting the Collect events
    pub emitter: Address,
    pub token0: TokenInfo,
    pub token1: TokenInfo,
    pub mapping: SlotMapping,
    /// Overrides the reconciler's default deep-history start block
    pub start_block: Option<u64>,
}

impl CollectTarget {
    /// Target for a V3 position.
    ///
    /// `first_amount_token` is the token the emitter reports first; it
    /// defaults to the position's token0 (pool order).
    pub fn for_position(
        position: &PositionState,
        emitter: Address,
        first_amount_token: Option<Address>,
        start_block: Option<u64>,
    ) -> Self {
        let first = first_amount_token.unwrap_or(position.token0.address);
        Self {
            position_id: position.position_id,
            emitter,
            token0: position.token0.clone(),
            token1: position.token1.clone(),
            mapping: SlotMapping::derive(first, position.token0.address),
            start_block,
        }
    }

    pub fn topics(&self) -> [B256; 2] {
        [COLLECT_TOPIC, position_topic(self.position_id)]
    }
}

/// Decodes one log into `(collected0, collected1)` human units.
///
/// `Ok(None)` for logs that do not belong to the target (reorged out,
/// foreign emitter or position); `Err(Decode)` for malformed payloads.
pub fn decode_collect(log: &LogEntry, target: &CollectTarget) -> TrackerResult<Option<(Decimal, Decimal)>> {
    if log.removed || log.address != target.emitter {
        return Ok(None);
    }
    let [topic0, topic1] = target.topics();
    if log.topics.first() != Some(&topic0) || log.topics.get(1) != Some(&topic1) {
        return Ok(None);
    }

    let data = &log.data;
    if data.len() < COLLECT_DATA_LEN {
        return Err(TrackerError::Decode(format!(
            "Collect payload too short ({} bytes) in tx {:?}",
            data.len(),
            log.transaction_hash
        )));
    }

    let first_raw = U256::from_be_slice(&data[32..64]);
    let second_raw = U256::from_be_slice(&data[64..96]);
    let (raw0, raw1) = target.mapping.apply(first_raw, second_raw);

    let amount0 = math::raw_u256_to_decimal(raw0, target.token0.decimals)
        .ok_or_else(|| TrackerError::Decode(format!("Collect amount0 out of range: {}", raw0)))?;
    let amount1 = math::raw_u256_to_decimal(raw1, target.token1.decimals)
        .ok_or_else(|| TrackerError::Decode(format!("Collect amount1 out of range: {}", raw1)))?;

    Ok(Some((amount0, amount1)))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::types::fixtures::{cbbtc_usdc_position, CBBTC};
    use alloy::primitives::Bytes;
    use rust_decimal_macros::dec;

    pub const EMITTER: Address = Address::new([0x03; 20]);

    /// Encodes a Collect log the way the position manager emits it
    pub fn collect_log(position_id: u64, block: u64, amount0: u128, amount1: u128) -> LogEntry {
        let mut data = Vec::with_capacity(96);
        data.extend_from_slice(&[0u8; 12]);
        data.extend_from_slice(&[0xaa; 20]);
        data.extend_from_slice(&U256::from(amount0).to_be_bytes::<32>());
        data.extend_from_slice(&U256::from(amount1).to_be_bytes::<32>());
        LogEntry {
            address: EMITTER,
            topics: vec![COLLECT_TOPIC, position_topic(position_id)],
            data: Bytes::from(data),
            block_number: Some(block),
            transaction_hash: Some(B256::repeat_byte(block as u8)),
            removed: false,
        }
    }

    fn target() -> CollectTarget {
        CollectTarget::for_position(&cbbtc_usdc_position(), EMITTER, None, None)
    }

    #[test]
    fn test_position_topic_is_padded_id() {
        let topic = position_topic(1345196);
        assert_eq!(&topic[..29], &[0u8; 29]);
        assert_eq!(&topic[29..], &[0x14, 0x86, 0xac]);
    }

    #[test]
    fn test_decode_human_units() {
        let t = target();
        let log = collect_log(t.position_id, 10, 10_000, 50);
        let decoded = decode_collect(&log, &t).unwrap();
        assert_eq!(decoded, Some((dec!(0.01), dec!(0.0000005))));
    }

    #[test]
    fn test_swapped_mapping() {
        let pos = cbbtc_usdc_position();
        let t = CollectTarget::for_position(&pos, EMITTER, Some(CBBTC), None);
        assert_eq!(t.mapping, SlotMapping::Swapped);

        // first amount is cbBTC (8 decimals), second is USDC (6)
        let log = collect_log(pos.position_id, 10, 50, 10_000);
        assert_eq!(
            decode_collect(&log, &t).unwrap(),
            Some((dec!(0.01), dec!(0.0000005)))
        );
    }

    #[test]
    fn test_foreign_and_removed_logs_ignored() {
        let t = target();

        let other = collect_log(t.position_id + 1, 10, 10_000, 50);
        assert_eq!(decode_collect(&other, &t).unwrap(), None);

        let mut removed = collect_log(t.position_id, 10, 10_000, 50);
        removed.removed = true;
        assert_eq!(decode_collect(&removed, &t).unwrap(), None);

        let mut wrong_emitter = collect_log(t.position_id, 10, 10_000, 50);
        wrong_emitter.address = Address::new([0x44; 20]);
        assert_eq!(decode_collect(&wrong_emitter, &t).unwrap(), None);
    }

    #[test]
    fn test_short_payload_is_decode_error() {
        let t = target();
        let mut log = collect_log(t.position_id, 10, 10_000, 50);
        log.data = Bytes::from(vec![0u8; 64]);
        assert!(matches!(
            decode_collect(&log, &t),
            Err(TrackerError::Decode(_))
        ));
    }
}
