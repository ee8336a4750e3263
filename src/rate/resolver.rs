//! Remote rate, balance and cap reads against the liquidity protocol

use super::{convert_amount, normalize_slippage_rate, RateQuote, SlippagePolicy};
use crate::abi::{self, ContractCall};
use crate::chain::EthRpc;
use crate::error::{WidgetError, WidgetResult};
use crate::intent::Token;

use ethers::types::{Address, U256};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type RateKey = (Address, Address, U256);

#[derive(Debug, Clone, Copy)]
struct CachedRate {
    key: RateKey,
    quote: RateQuote,
}

/// Rate & amount resolver with a single-triple cache
pub struct RateResolver {
    rpc: Arc<dyn EthRpc>,
    network_proxy: Address,
    policy: SlippagePolicy,
    cache: RwLock<Option<CachedRate>>,
}

impl RateResolver {
    pub fn new(rpc: Arc<dyn EthRpc>, network_proxy: Address, policy: SlippagePolicy) -> Self {
        Self {
            rpc,
            network_proxy,
            policy,
            cache: RwLock::new(None),
        }
    }

    pub fn policy(&self) -> &SlippagePolicy {
        &self.policy
    }

    /// Expected and slippage rates for trading `amount` of `from` into `to`
    ///
    /// A cached rate for a different triple is dropped before the lookup, and
    /// a failed lookup leaves the cache empty.
    pub async fn quote(&self, from: &Token, to: &Token, amount: U256) -> WidgetResult<RateQuote> {
        if from == to {
            return Ok(RateQuote::identity(to));
        }

        let key = (from.address(), to.address(), amount);
        {
            let mut cache = self.cache.write().await;
            if cache.map_or(false, |c| c.key != key) {
                debug!("Rate triple changed, discarding cached rate");
                *cache = None;
            }
        }

        match self.fetch(from, to, amount).await {
            Ok(quote) => {
                self.store(key, quote).await;
                Ok(quote)
            }
            Err(e) => {
                *self.cache.write().await = None;
                Err(e)
            }
        }
    }

    /// Last quote, only if it was taken for exactly this triple
    pub async fn cached(&self, from: &Token, to: &Token, amount: U256) -> Option<RateQuote> {
        let key = (from.address(), to.address(), amount);
        self.cache
            .read()
            .await
            .filter(|c| c.key == key)
            .map(|c| c.quote)
    }

    async fn store(&self, key: RateKey, quote: RateQuote) {
        *self.cache.write().await = Some(CachedRate { key, quote });
    }

    async fn fetch(&self, from: &Token, to: &Token, amount: U256) -> WidgetResult<RateQuote> {
        let call = ContractCall::GetExpectedRate {
            src: from.address(),
            dest: to.address(),
            src_qty: amount,
        };
        let response = self.rpc.call(self.network_proxy, call.encode()).await?;
        let (expected, slippage) = abi::decode_rate_pair(&response)?;

        let scale = to.rate_scale();
        let expected_rate = expected / scale;
        let slippage_rate = normalize_slippage_rate(
            expected_rate,
            slippage / scale,
            self.policy.default_percent,
        );

        debug!(
            from = from.symbol(),
            to = to.symbol(),
            %expected_rate,
            %slippage_rate,
            "rate resolved"
        );

        Ok(RateQuote {
            expected_rate,
            slippage_rate,
        })
    }

    /// Balance of `owner` in `token`, native or ERC-20
    pub async fn balance_of(&self, token: &Token, owner: Address) -> WidgetResult<U256> {
        if token.is_native() {
            return self.rpc.balance(owner).await;
        }
        let call = ContractCall::BalanceOf { owner };
        let response = self.rpc.call(token.address(), call.encode()).await?;
        abi::decode_uint_or_zero("balance", &response)
    }

    /// Per-user trade cap in wei enforced by the protocol
    pub async fn user_cap(&self, user: Address) -> WidgetResult<U256> {
        let call = ContractCall::GetUserCapInWei { user };
        let response = self.rpc.call(self.network_proxy, call.encode()).await?;
        abi::decode_uint_or_zero("user cap", &response)
    }

    /// Worth of `amount` of `token` in the native asset at the expected rate
    ///
    /// Reads the rate directly, leaving the cached quote untouched.
    pub async fn value_in_native(&self, token: &Token, amount: U256) -> WidgetResult<U256> {
        if token.is_native() {
            return Ok(amount);
        }
        let quote = self.fetch(token, &Token::native("ETH"), amount).await?;
        Ok(convert_amount(amount, token, quote.expected_rate))
    }

    /// Re-quote the triple periodically until `cancel` fires
    ///
    /// Results arriving after cancellation are discarded.
    pub fn spawn_poller(
        self: Arc<Self>,
        from: Token,
        to: Token,
        amount: U256,
        period: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let key = (from.address(), to.address(), amount);
            let mut interval = tokio::time::interval(period);
            info!("Rate poller started for {} -> {}", from, to);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {}
                }

                if from == to {
                    continue;
                }

                let result = tokio::select! {
                    _ = cancel.cancelled() => break,
                    result = self.fetch(&from, &to, amount) => result,
                };

                if cancel.is_cancelled() {
                    break;
                }

                match result {
                    Ok(quote) => self.store(key, quote).await,
                    Err(e) => {
                        warn!("Rate poll for {} -> {} failed: {}", from, to, e);
                        *self.cache.write().await = None;
                    }
                }
            }

            info!("Rate poller stopped for {} -> {}", from, to);
        })
    }
}

/// Map an empty expected rate onto the typed "no liquidity" failure
pub fn require_liquidity(quote: &RateQuote, from: &Token, to: &Token) -> WidgetResult<()> {
    if quote.has_liquidity() {
        Ok(())
    } else {
        Err(WidgetError::NoLiquidity {
            from: from.symbol().to_string(),
            to: to.symbol().to_string(),
        })
    }
}
