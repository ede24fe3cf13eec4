//! Chain access capability.
//!
//! Everything in the crate that reads the chain does it through [`ChainState`],
//! passed in explicitly. [`ProviderState`] implements it on top of any
//! [`alloy::providers::Provider`], [`crate::testing::FakeChain`] keeps the whole
//! chain in memory.

use std::future::Future;

use alloy::{
    eips::BlockNumberOrTag,
    primitives::{Address, U256},
    providers::Provider,
    rpc::types::Filter,
};

use crate::{
    abi::{erc20::IERC20, exchange::IExchange},
    error::ProviderError,
    types::{OrderHash, RawLog},
};

/// Inclusive block range and set of emitting contracts to query logs for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogFilter {
    pub addresses: Vec<Address>,
    pub from_block: u64,
    pub to_block: u64,
}

impl LogFilter {
    /// Indicates if the log lies within the filter's range and was emitted by
    /// one of its contracts.
    pub fn matches(&self, log: &RawLog) -> bool {
        self.addresses.contains(&log.address)
            && log
                .block_number
                .is_some_and(|n| n >= self.from_block && n <= self.to_block)
    }
}

impl From<&LogFilter> for Filter {
    fn from(value: &LogFilter) -> Self {
        Filter::new()
            .address(value.addresses.clone())
            .from_block(value.from_block)
            .to_block(value.to_block)
    }
}

/// Reads of chain state the order tracking depends on.
pub trait ChainState: Send + Sync {
    /// Number of the most recent block.
    fn block_number(&self) -> impl Future<Output = Result<u64, ProviderError>> + Send;

    /// Timestamp of the most recent block, in unix seconds.
    fn block_timestamp(&self) -> impl Future<Output = Result<u64, ProviderError>> + Send;

    fn logs(
        &self,
        filter: &LogFilter,
    ) -> impl Future<Output = Result<Vec<RawLog>, ProviderError>> + Send;

    fn balance_of(
        &self,
        token: Address,
        owner: Address,
    ) -> impl Future<Output = Result<U256, ProviderError>> + Send;

    fn allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> impl Future<Output = Result<U256, ProviderError>> + Send;

    /// Cumulative taker token amount filled for the order.
    fn filled_taker_amount(
        &self,
        exchange: Address,
        order_hash: OrderHash,
    ) -> impl Future<Output = Result<U256, ProviderError>> + Send;

    /// Cumulative taker token amount cancelled for the order.
    fn cancelled_taker_amount(
        &self,
        exchange: Address,
        order_hash: OrderHash,
    ) -> impl Future<Output = Result<U256, ProviderError>> + Send;
}

/// [`ChainState`] backed by an RPC provider.
///
/// It is recommended to setup provider with
/// [`alloy::transports::layers::RetryBackoffLayer`], the order watcher treats
/// every failed read as a transient error of the whole tick.
#[derive(Clone, Debug)]
pub struct ProviderState<P> {
    provider: P,
}

impl<P: Provider> ProviderState<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }
}

impl<P: Provider> ChainState for ProviderState<P> {
    async fn block_number(&self) -> Result<u64, ProviderError> {
        Ok(self.provider.get_block_number().await?)
    }

    async fn block_timestamp(&self) -> Result<u64, ProviderError> {
        let block = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Latest)
            .await?
            .ok_or(ProviderError::NullResp)?;
        Ok(block.header.timestamp)
    }

    async fn logs(&self, filter: &LogFilter) -> Result<Vec<RawLog>, ProviderError> {
        let logs = self.provider.get_logs(&Filter::from(filter)).await?;
        Ok(logs.iter().map(RawLog::from).collect())
    }

    async fn balance_of(&self, token: Address, owner: Address) -> Result<U256, ProviderError> {
        Ok(IERC20::new(token, &self.provider)
            .balanceOf(owner)
            .call()
            .await?)
    }

    async fn allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> Result<U256, ProviderError> {
        Ok(IERC20::new(token, &self.provider)
            .allowance(owner, spender)
            .call()
            .await?)
    }

    async fn filled_taker_amount(
        &self,
        exchange: Address,
        order_hash: OrderHash,
    ) -> Result<U256, ProviderError> {
        Ok(IExchange::new(exchange, &self.provider)
            .filled(order_hash)
            .call()
            .await?)
    }

    async fn cancelled_taker_amount(
        &self,
        exchange: Address,
        order_hash: OrderHash,
    ) -> Result<U256, ProviderError> {
        Ok(IExchange::new(exchange, &self.provider)
            .cancelled(order_hash)
            .call()
            .await?)
    }
}
