//! alloy HTTP Chain Reader
//!
//! Wraps any alloy `Provider` and bounds every request with a timeout.
//! Uses the HTTP transport (not WS) for reliability on batch log queries.

use super::{ChainReader, LogEntry};
use crate::error::{TrackerError, TrackerResult};
use alloy::primitives::{Address, Bytes, B256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::{Filter, TransactionRequest};
use async_trait::async_trait;
use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;

/// Default per-request timeout
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(30);

/// `ChainReader` over an alloy provider
pub struct RpcChainReader<P> {
    provider: Arc<P>,
    timeout: Duration,
}

/// Connect an HTTP provider to `rpc_url`
pub fn connect_http(
    rpc_url: &str,
    timeout: Duration,
) -> TrackerResult<RpcChainReader<impl Provider + 'static>> {
    let url = rpc_url
        .parse()
        .map_err(|e| TrackerError::Config(format!("invalid RPC URL: {}", e)))?;
    let provider = ProviderBuilder::new().connect_http(url);
    Ok(RpcChainReader::new(Arc::new(provider), timeout))
}

impl<P: Provider + 'static> RpcChainReader<P> {
    pub fn new(provider: Arc<P>, timeout: Duration) -> Self {
        Self { provider, timeout }
    }

    async fn bounded<T, E, F>(&self, what: &str, fut: F) -> TrackerResult<T>
    where
        F: IntoFuture<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(TrackerError::Transport(format!("{}: {}", what, e))),
            Err(_) => Err(TrackerError::Transport(format!(
                "{}: timed out after {:?}",
                what, self.timeout
            ))),
        }
    }
}

#[async_trait]
impl<P: Provider + 'static> ChainReader for RpcChainReader<P> {
    async fn call(&self, to: Address, calldata: Bytes) -> TrackerResult<Bytes> {
        let tx = TransactionRequest::default().to(to).input(calldata.into());
        self.bounded("eth_call", self.provider.call(tx)).await
    }

    async fn get_logs(
        &self,
        address: Address,
        topics: &[B256],
        from_block: u64,
        to_block: u64,
    ) -> TrackerResult<Vec<LogEntry>> {
        let mut filter = Filter::new()
            .address(address)
            .from_block(from_block)
            .to_block(to_block);
        if let Some(topic0) = topics.first() {
            filter = filter.event_signature(*topic0);
        }
        if let Some(topic1) = topics.get(1) {
            filter = filter.topic1(*topic1);
        }
        if let Some(topic2) = topics.get(2) {
            filter = filter.topic2(*topic2);
        }
        if let Some(topic3) = topics.get(3) {
            filter = filter.topic3(*topic3);
        }

        let logs = self
            .bounded("eth_getLogs", self.provider.get_logs(&filter))
            .await?;

        Ok(logs
            .into_iter()
            .map(|log| LogEntry {
                address: log.address(),
                topics: log.topics().to_vec(),
                data: log.inner.data.data.clone(),
                block_number: log.block_number,
                transaction_hash: log.transaction_hash,
                removed: log.removed,
            })
            .collect())
    }

    async fn latest_block(&self) -> TrackerResult<u64> {
        self.bounded("eth_blockNumber", self.provider.get_block_number())
            .await
    }
}
