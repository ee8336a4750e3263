//! Remote collaborators: the JSON-RPC node and the gas price cache

mod gas_feed;
mod provider;

pub use gas_feed::{parse_gwei, GasPriceFeed, GasPriceQuote, HttpGasFeed};
pub use provider::ChainProvider;

#[cfg(test)]
pub use gas_feed::MockGasPriceFeed;

use crate::error::WidgetResult;

use async_trait::async_trait;
use ethers::types::{Address, Bytes, U256};
use serde::Serialize;

/// Parameters of an `eth_estimateGas` simulation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EstimateGasRequest {
    pub from: Address,
    pub to: Address,
    pub gas_price: U256,
    pub value: U256,
    pub data: Bytes,
}

/// The Ethereum JSON-RPC surface the widget relies on
///
/// Every method is a single suspension point; implementations must not retry.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EthRpc: Send + Sync {
    /// `eth_getTransactionCount(address, "latest")`
    async fn transaction_count(&self, address: Address) -> WidgetResult<u64>;

    /// `eth_call({to, data}, "latest")`, returning the raw hex result
    async fn call(&self, to: Address, data: Bytes) -> WidgetResult<String>;

    /// `eth_estimateGas(...)`, returning the raw hex quantity
    async fn estimate_gas(&self, request: EstimateGasRequest) -> WidgetResult<String>;

    /// `eth_sendRawTransaction(bytes)`, returning the transaction hash
    async fn send_raw_transaction(&self, raw: Bytes) -> WidgetResult<String>;

    /// `eth_getBalance(address, "latest")`
    async fn balance(&self, address: Address) -> WidgetResult<U256>;
}
