//! Gas policy: tiered prices refreshed from the cache, limits from simulation

use crate::abi;
use crate::chain::{EstimateGasRequest, EthRpc, GasPriceFeed};
use crate::config::GasConfig;
use crate::error::WidgetResult;
use crate::intent::Token;

use ethers::types::{Address, U256};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const GWEI: u64 = 1_000_000_000;

/// User-selectable price tier
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GasTier {
    Slow,
    Medium,
    #[default]
    Fast,
}

/// How the caller wants the gas price chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GasPriceSelection {
    Tier(GasTier),
    /// Caller-supplied price in wei, still capped at the max tier
    Custom(U256),
}

impl Default for GasPriceSelection {
    fn default() -> Self {
        GasPriceSelection::Tier(GasTier::default())
    }
}

/// One consistent set of tier prices in wei
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasTiers {
    pub slow: U256,
    pub medium: U256,
    pub fast: U256,
    pub max: U256,
}

impl GasTiers {
    pub fn from_config(config: &GasConfig) -> Self {
        Self {
            slow: U256::from(config.slow_gwei) * GWEI,
            medium: U256::from(config.medium_gwei) * GWEI,
            fast: U256::from(config.fast_gwei) * GWEI,
            max: U256::from(config.max_gwei) * GWEI,
        }
    }

    pub fn price(&self, tier: GasTier) -> U256 {
        match tier {
            GasTier::Slow => self.slow,
            GasTier::Medium => self.medium,
            GasTier::Fast => self.fast,
        }
    }

    /// Resolve a selection against this snapshot, capped at `max`
    pub fn select(&self, selection: GasPriceSelection) -> U256 {
        let price = match selection {
            GasPriceSelection::Tier(tier) => self.price(tier),
            GasPriceSelection::Custom(price) => price,
        };
        price.min(self.max)
    }
}

impl Default for GasTiers {
    fn default() -> Self {
        Self::from_config(&GasConfig::default())
    }
}

/// Result of one poll of the remote cache, not yet applied
#[derive(Debug, Clone, Copy)]
struct CacheUpdate {
    quote: crate::chain::GasPriceQuote,
    max: Option<U256>,
}

/// Process-wide gas price cache with its own refresh timer
pub struct GasPriceCache {
    tiers: RwLock<GasTiers>,
    feed: Arc<dyn GasPriceFeed>,
    refresh_interval: Duration,
}

impl GasPriceCache {
    pub fn new(defaults: GasTiers, feed: Arc<dyn GasPriceFeed>, refresh_interval: Duration) -> Self {
        Self {
            tiers: RwLock::new(defaults),
            feed,
            refresh_interval,
        }
    }

    /// Read all tiers at once
    pub async fn snapshot(&self) -> GasTiers {
        *self.tiers.read().await
    }

    pub async fn price_for(&self, selection: GasPriceSelection) -> U256 {
        self.snapshot().await.select(selection)
    }

    /// Poll the cache once and apply the result
    pub async fn refresh(&self) -> WidgetResult<GasTiers> {
        match self.fetch().await {
            Ok(update) => {
                crate::metrics::record_gas_refresh("ok");
                Ok(self.apply(update).await)
            }
            Err(e) => {
                crate::metrics::record_gas_refresh("error");
                Err(e)
            }
        }
    }

    async fn fetch(&self) -> WidgetResult<CacheUpdate> {
        let quote = self.feed.fetch_prices().await?;
        let max = match self.feed.fetch_max_price().await {
            Ok(max) => Some(max),
            Err(e) => {
                debug!("Max gas price unavailable, keeping previous ceiling: {}", e);
                None
            }
        };
        Ok(CacheUpdate { quote, max })
    }

    async fn apply(&self, update: CacheUpdate) -> GasTiers {
        let mut tiers = self.tiers.write().await;
        if let Some(low) = update.quote.low {
            tiers.slow = low;
        }
        if let Some(standard) = update.quote.standard {
            tiers.medium = standard;
        }
        if let Some(fast) = update.quote.fast {
            tiers.fast = fast;
        }
        if let Some(max) = update.max {
            tiers.max = max;
        }
        debug!(
            slow = %tiers.slow,
            medium = %tiers.medium,
            fast = %tiers.fast,
            max = %tiers.max,
            "gas tiers updated"
        );
        *tiers
    }

    /// Refresh on a fixed period until `cancel` fires
    ///
    /// A poll that completes after cancellation is dropped, never applied.
    pub fn spawn_refresher(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.refresh_interval);
            info!("Gas price refresher started ({:?})", self.refresh_interval);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {}
                }

                let result = tokio::select! {
                    _ = cancel.cancelled() => break,
                    result = self.fetch() => result,
                };

                if cancel.is_cancelled() {
                    break;
                }

                match result {
                    Ok(update) => {
                        self.apply(update).await;
                        crate::metrics::record_gas_refresh("ok");
                    }
                    Err(e) => {
                        warn!("Gas price refresh failed, keeping last known tiers: {}", e);
                        crate::metrics::record_gas_refresh("error");
                    }
                }
            }

            info!("Gas price refresher stopped");
        })
    }
}

/// Operation classes with distinct gas ceilings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationCategory {
    NativeTransfer,
    TokenTransfer,
    /// Same-token payment routed through the pay wrapper
    WrappedPay,
    /// Cross-token trade or pay, and approvals
    Exchange,
}

/// Per-category gas ceilings plus per-token overrides
#[derive(Debug, Clone)]
pub struct GasLimitTable {
    native_transfer: U256,
    token_transfer: U256,
    wrapped_pay: U256,
    exchange: U256,
    token_overrides: HashMap<Address, U256>,
}

impl GasLimitTable {
    pub fn from_config(config: &GasConfig) -> WidgetResult<Self> {
        let mut token_overrides = HashMap::new();
        for (token, limit) in &config.token_limits {
            let address = token.parse::<Address>().map_err(|e| {
                crate::error::WidgetError::Config(format!("token limit key {}: {}", token, e))
            })?;
            token_overrides.insert(address, U256::from(*limit));
        }

        Ok(Self {
            native_transfer: U256::from(config.limits.native_transfer),
            token_transfer: U256::from(config.limits.token_transfer),
            wrapped_pay: U256::from(config.limits.wrapped_pay),
            exchange: U256::from(config.limits.exchange),
            token_overrides,
        })
    }

    pub fn default_for(&self, category: OperationCategory) -> U256 {
        match category {
            OperationCategory::NativeTransfer => self.native_transfer,
            OperationCategory::TokenTransfer => self.token_transfer,
            OperationCategory::WrappedPay => self.wrapped_pay,
            OperationCategory::Exchange => self.exchange,
        }
    }

    /// Ceiling for an operation touching `tokens`, looked up by token identity
    pub fn ceiling(&self, category: OperationCategory, tokens: &[&Token]) -> U256 {
        let base = self.default_for(category);
        if category == OperationCategory::NativeTransfer {
            return base;
        }
        tokens
            .iter()
            .filter_map(|t| self.token_overrides.get(&t.address()))
            .fold(base, |acc, limit| acc.max(*limit))
    }
}

/// Gas limit selection: simulate, add the safety buffer, clamp to the ceiling
#[derive(Debug, Clone)]
pub struct GasLimitPolicy {
    table: GasLimitTable,
    buffer_percent: u64,
}

impl GasLimitPolicy {
    pub fn new(table: GasLimitTable, buffer_percent: u64) -> Self {
        Self {
            table,
            buffer_percent,
        }
    }

    pub fn from_config(config: &GasConfig) -> WidgetResult<Self> {
        Ok(Self::new(
            GasLimitTable::from_config(config)?,
            config.limit_buffer_percent,
        ))
    }

    pub fn table(&self) -> &GasLimitTable {
        &self.table
    }

    pub fn inflate_and_clamp(&self, raw: U256, ceiling: U256) -> U256 {
        let inflated = raw.saturating_add(raw * self.buffer_percent / 100);
        inflated.min(ceiling)
    }

    /// Estimated gas limit, or `ceiling` unchanged when the simulation fails
    pub async fn estimate(
        &self,
        rpc: &dyn EthRpc,
        request: EstimateGasRequest,
        ceiling: U256,
    ) -> U256 {
        let raw = match rpc.estimate_gas(request).await {
            Ok(hex) => abi::parse_quantity("gas estimate", &hex),
            Err(e) => Err(e),
        };

        match raw {
            Ok(raw) => {
                let limit = self.inflate_and_clamp(raw, ceiling);
                debug!(%raw, %limit, %ceiling, "gas limit estimated");
                limit
            }
            Err(e) => {
                warn!("Gas estimation failed, using category ceiling {}: {}", ceiling, e);
                ceiling
            }
        }
    }

    /// Upper bound on the fee in wei
    pub fn estimated_fee(gas_limit: U256, gas_price: U256) -> U256 {
        gas_limit.saturating_mul(gas_price)
    }
}
