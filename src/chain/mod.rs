//! Chain Access
//!
//! The only surface the tracker needs from an EVM node: `eth_call`,
//! `eth_getLogs` and `eth_blockNumber`. Implementations must report
//! transport failures as `TrackerError::Transport`, never as an empty result.

pub mod position_reader;
pub mod retry;
pub mod rpc;

pub use position_reader::PositionReader;
pub use retry::RetryPolicy;
pub use rpc::{connect_http, RpcChainReader};

use crate::error::TrackerResult;
use alloy::primitives::{Address, Bytes, B256};
use async_trait::async_trait;

/// A log as returned by `eth_getLogs`, reduced to the fields we decode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub block_number: Option<u64>,
    pub transaction_hash: Option<B256>,
    /// Set by the node when the log was dropped in a reorg
    pub removed: bool,
}

/// Read-only JSON-RPC client
#[async_trait]
pub trait ChainReader: Send + Sync {
    /// `eth_call` against the latest block
    async fn call(&self, to: Address, calldata: Bytes) -> TrackerResult<Bytes>;

    /// `eth_getLogs` for one emitter over an inclusive block range.
    ///
    /// `topics[i]` must match topic slot `i` exactly.
    async fn get_logs(
        &self,
        address: Address,
        topics: &[B256],
        from_block: u64,
        to_block: u64,
    ) -> TrackerResult<Vec<LogEntry>>;

    /// `eth_blockNumber`
    async fn latest_block(&self) -> TrackerResult<u64>;
}

#[cfg(test)]
pub(crate) mod mock {
    //! Scriptable in-memory chain used across the crate's tests

    use super::*;
    use crate::error::TrackerError;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct MockChain {
        pub latest: Mutex<u64>,
        pub logs: Mutex<Vec<LogEntry>>,
        /// (to, 4-byte selector) -> return data; missing entries fail as Transport
        pub calls: Mutex<HashMap<(Address, [u8; 4]), Bytes>>,
        /// Chunk start blocks whose get_logs always fails
        pub failing_chunks: Mutex<HashSet<u64>>,
        /// Remaining transient failures before get_logs succeeds
        pub flaky_failures: Mutex<u32>,
        /// Remaining transient failures before eth_call succeeds
        pub flaky_calls: Mutex<u32>,
        /// Remaining transient failures before eth_blockNumber succeeds
        pub flaky_head: Mutex<u32>,
        /// Every (from, to) range requested
        pub log_requests: Mutex<Vec<(u64, u64)>>,
    }

    impl MockChain {
        pub fn new(latest: u64) -> Self {
            Self {
                latest: Mutex::new(latest),
                ..Default::default()
            }
        }

        pub fn set_latest(&self, block: u64) {
            *self.latest.lock().unwrap() = block;
        }

        pub fn push_log(&self, log: LogEntry) {
            self.logs.lock().unwrap().push(log);
        }

        pub fn fail_chunk(&self, from_block: u64) {
            self.failing_chunks.lock().unwrap().insert(from_block);
        }

        pub fn respond(&self, to: Address, selector: [u8; 4], data: Vec<u8>) {
            self.calls
                .lock()
                .unwrap()
                .insert((to, selector), Bytes::from(data));
        }

        pub fn requests(&self) -> Vec<(u64, u64)> {
            self.log_requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChainReader for MockChain {
        async fn call(&self, to: Address, calldata: Bytes) -> TrackerResult<Bytes> {
            take_failure(&self.flaky_calls)?;
            let mut selector = [0u8; 4];
            selector.copy_from_slice(&calldata[..4]);
            self.calls
                .lock()
                .unwrap()
                .get(&(to, selector))
                .cloned()
                .ok_or_else(|| TrackerError::Transport(format!("execution reverted ({:?})", to)))
        }

        async fn get_logs(
            &self,
            address: Address,
            topics: &[B256],
            from_block: u64,
            to_block: u64,
        ) -> TrackerResult<Vec<LogEntry>> {
            self.log_requests.lock().unwrap().push((from_block, to_block));

            if self.failing_chunks.lock().unwrap().contains(&from_block) {
                return Err(TrackerError::Transport("connection reset".into()));
            }
            take_failure(&self.flaky_failures)?;

            Ok(self
                .logs
                .lock()
                .unwrap()
                .iter()
                .filter(|log| log.address == address)
                .filter(|log| {
                    topics
                        .iter()
                        .enumerate()
                        .all(|(i, t)| log.topics.get(i) == Some(t))
                })
                .filter(|log| {
                    log.block_number
                        .map(|b| b >= from_block && b <= to_block)
                        .unwrap_or(false)
                })
                .cloned()
                .collect())
        }

        async fn latest_block(&self) -> TrackerResult<u64> {
            take_failure(&self.flaky_head)?;
            Ok(*self.latest.lock().unwrap())
        }
    }

    fn take_failure(counter: &Mutex<u32>) -> TrackerResult<()> {
        let mut remaining = counter.lock().unwrap();
        if *remaining > 0 {
            *remaining -= 1;
            return Err(TrackerError::Transport("429 too many requests".into()));
        }
        Ok(())
    }
}
