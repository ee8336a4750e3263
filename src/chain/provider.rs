//! Chain provider with multi-RPC support and failover

use super::{EstimateGasRequest, EthRpc};
use crate::config::NetworkConfig;
use crate::error::{WidgetError, WidgetResult};

use async_trait::async_trait;
use ethers::providers::{Http, Provider, ProviderError, RpcError};
use ethers::types::{Address, Bytes, U256};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Multi-provider wrapper; a failing endpoint is rotated out for the next call
pub struct ChainProvider {
    chain_id: u64,
    /// HTTP providers (multiple for failover)
    http_providers: Vec<Provider<Http>>,
    /// Current active provider index
    current_provider: AtomicUsize,
    request_timeout: Duration,
}

impl ChainProvider {
    /// Create a new chain provider
    pub fn new(config: &NetworkConfig) -> WidgetResult<Self> {
        let mut http_providers = Vec::new();

        for url in &config.rpc_urls {
            match Provider::<Http>::try_from(url.as_str()) {
                Ok(provider) => {
                    http_providers.push(provider);
                    debug!("Added HTTP provider for chain {}: {}", config.chain_id, url);
                }
                Err(e) => {
                    warn!("Failed to create provider for {}: {}", url, e);
                }
            }
        }

        if http_providers.is_empty() {
            return Err(WidgetError::Config(format!(
                "no valid RPC providers for chain {}",
                config.chain_id
            )));
        }

        Ok(Self {
            chain_id: config.chain_id,
            http_providers,
            current_provider: AtomicUsize::new(0),
            request_timeout: Duration::from_millis(config.request_timeout_ms),
        })
    }

    /// Get the active HTTP provider
    pub fn http(&self) -> &Provider<Http> {
        let idx = self.current_provider.load(Ordering::Relaxed);
        &self.http_providers[idx % self.http_providers.len()]
    }

    /// Switch to next available provider
    pub fn failover(&self) {
        if self.http_providers.len() < 2 {
            return;
        }
        let current = self.current_provider.load(Ordering::Relaxed);
        let next = (current + 1) % self.http_providers.len();
        self.current_provider.store(next, Ordering::Relaxed);
        warn!("Chain {} failover to provider {}", self.chain_id, next);
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn request<P, R>(&self, method: &'static str, params: P) -> WidgetResult<R>
    where
        P: Debug + Serialize + Send + Sync,
        R: Debug + Serialize + DeserializeOwned + Send,
    {
        debug!(method, chain_id = self.chain_id, "rpc request");

        match timeout(self.request_timeout, self.http().request(method, params)).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e)) => {
                let err = classify(method, e);
                if matches!(err, WidgetError::Transport { .. }) {
                    self.failover();
                }
                Err(err)
            }
            Err(_) => {
                warn!(method, "rpc request timed out");
                self.failover();
                Err(WidgetError::transport(method, "request timed out"))
            }
        }
    }
}

/// Map a provider failure onto the widget taxonomy
fn classify(method: &'static str, err: ProviderError) -> WidgetError {
    if let Some(resp) = err.as_error_response() {
        return WidgetError::Rpc {
            method,
            message: resp.message.clone(),
        };
    }
    if let Some(serde_err) = err.as_serde_error() {
        return WidgetError::decode(method, serde_err);
    }
    WidgetError::transport(method, err)
}

#[async_trait]
impl EthRpc for ChainProvider {
    async fn transaction_count(&self, address: Address) -> WidgetResult<u64> {
        let count: U256 = self
            .request("eth_getTransactionCount", (address, "latest"))
            .await?;
        if count > U256::from(u64::MAX) {
            return Err(WidgetError::decode("transaction count", "exceeds u64"));
        }
        Ok(count.as_u64())
    }

    async fn call(&self, to: Address, data: Bytes) -> WidgetResult<String> {
        let call = serde_json::json!({ "to": to, "data": data });
        self.request("eth_call", (call, "latest")).await
    }

    async fn estimate_gas(&self, request: EstimateGasRequest) -> WidgetResult<String> {
        self.request("eth_estimateGas", [request]).await
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> WidgetResult<String> {
        self.request("eth_sendRawTransaction", [raw]).await
    }

    async fn balance(&self, address: Address) -> WidgetResult<U256> {
        self.request("eth_getBalance", (address, "latest")).await
    }
}
