//! Allowance/approval orchestration ahead of token-side trades

use crate::abi::{self, ContractCall};
use crate::chain::EthRpc;
use crate::error::WidgetResult;
use crate::intent::{Token, TransactionIntent};
use crate::tx::{
    GasLimitPolicy, GasPriceCache, GasPriceSelection, GasTier, NonceGuard, OperationCategory,
    TransactionBuilder,
};

use ethers::types::{Address, U256};
use std::sync::Arc;
use tracing::{debug, info};

/// What the approval step did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalOutcome {
    /// Native `from` or a plain transfer
    NotRequired,
    /// Existing allowance already covers the amount
    AlreadyApproved { allowance: U256 },
    /// An approve transaction was broadcast
    Approved { tx_hash: String, nonce: u64 },
}

impl ApprovalOutcome {
    pub fn submitted(&self) -> bool {
        matches!(self, ApprovalOutcome::Approved { .. })
    }
}

pub struct ApprovalOrchestrator {
    rpc: Arc<dyn EthRpc>,
    gas: Arc<GasPriceCache>,
    limits: GasLimitPolicy,
    builder: Arc<TransactionBuilder>,
}

impl ApprovalOrchestrator {
    pub fn new(
        rpc: Arc<dyn EthRpc>,
        gas: Arc<GasPriceCache>,
        limits: GasLimitPolicy,
        builder: Arc<TransactionBuilder>,
    ) -> Self {
        Self {
            rpc,
            gas,
            limits,
            builder,
        }
    }

    /// `allowance(owner, spender)` on the token contract
    pub async fn read_allowance(
        &self,
        token: &Token,
        owner: Address,
        spender: Address,
    ) -> WidgetResult<U256> {
        let call = ContractCall::Allowance { owner, spender };
        let response = self.rpc.call(token.address(), call.encode()).await?;
        abi::decode_uint_or_zero("allowance", &response)
    }

    /// Make sure `spender` can pull `intent.amount_from` of `intent.from`
    ///
    /// Runs to completion, including its own broadcast, and advances the
    /// nonce held by `guard` only after the node accepted the approval.
    pub async fn ensure_allowance(
        &self,
        intent: &TransactionIntent,
        spender: Address,
        guard: &mut NonceGuard,
    ) -> WidgetResult<ApprovalOutcome> {
        if !intent.needs_allowance() {
            return Ok(ApprovalOutcome::NotRequired);
        }

        let owner = intent.account.address();
        let allowance = self.read_allowance(&intent.from, owner, spender).await?;
        if allowance >= intent.amount_from {
            debug!(%allowance, amount = %intent.amount_from, "allowance sufficient");
            return Ok(ApprovalOutcome::AlreadyApproved { allowance });
        }

        let nonce = guard.sync(self.rpc.as_ref()).await?;
        let gas_price = self
            .gas
            .price_for(GasPriceSelection::Tier(GasTier::Fast))
            .await;
        let gas_limit = self
            .limits
            .table()
            .ceiling(OperationCategory::Exchange, &[&intent.from]);

        let unsigned = self.builder.draft_approve(
            &intent.from,
            spender,
            nonce,
            gas_price,
            gas_limit,
            intent.chain_id,
        );
        let signed = self.builder.sign(unsigned, &intent.account).await?;
        let tx_hash = self.rpc.send_raw_transaction(signed.raw.clone()).await?;

        guard.advance(&tx_hash);
        crate::metrics::record_approval();
        info!(
            token = intent.from.symbol(),
            ?spender,
            nonce,
            %tx_hash,
            "approval broadcast"
        );

        Ok(ApprovalOutcome::Approved { tx_hash, nonce })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockGasPriceFeed;
    use crate::config::GasConfig;
    use crate::error::WidgetError;
    use crate::intent::{Account, IntentKind};
    use crate::testing::FakeChain;
    use crate::tx::{rlp, ContractAddresses, GasTiers, LocalKeystore, NonceTracker};
    use ethers::signers::LocalWallet;
    use std::time::Duration;

    const TEST_KEY: &str = "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

    fn setup(chain: Arc<FakeChain>) -> (ApprovalOrchestrator, Account) {
        let mut keystore = LocalKeystore::new();
        let account = Account::new(keystore.insert(TEST_KEY.parse::<LocalWallet>().unwrap()));
        let builder = Arc::new(TransactionBuilder::new(
            ContractAddresses {
                network_proxy: FakeChain::proxy(),
                pay_wrapper: None,
            },
            Arc::new(keystore),
        ));
        let gas = Arc::new(GasPriceCache::new(
            GasTiers::default(),
            Arc::new(MockGasPriceFeed::new()),
            Duration::from_secs(30),
        ));
        let limits = GasLimitPolicy::from_config(&GasConfig::default()).unwrap();
        (ApprovalOrchestrator::new(chain, gas, limits, builder), account)
    }

    fn knc_swap(account: Account, amount: u64) -> TransactionIntent {
        TransactionIntent::new(
            IntentKind::Swap,
            FakeChain::knc(),
            Token::native("ETH"),
            account,
            U256::from(amount),
            3,
        )
        .with_min_rate(U256::zero())
    }

    #[tokio::test]
    async fn test_sufficient_allowance_sends_nothing() {
        let chain = Arc::new(FakeChain::new(5));
        chain.set_allowance(U256::from(1_000u64));
        let (orchestrator, account) = setup(chain.clone());
        let tracker = NonceTracker::new();
        let mut guard = tracker.lock(account.address()).await;

        let outcome = orchestrator
            .ensure_allowance(&knc_swap(account, 1_000), FakeChain::proxy(), &mut guard)
            .await
            .unwrap();

        assert_eq!(
            outcome,
            ApprovalOutcome::AlreadyApproved {
                allowance: U256::from(1_000u64)
            }
        );
        assert!(chain.broadcasts().is_empty());
        assert_eq!(guard.current(), None);
    }

    #[tokio::test]
    async fn test_insufficient_allowance_approves_max() {
        let chain = Arc::new(FakeChain::new(5));
        chain.set_allowance(U256::from(10u64));
        let (orchestrator, account) = setup(chain.clone());
        let tracker = NonceTracker::new();
        let mut guard = tracker.lock(account.address()).await;

        // a zero min rate does not block the approval step
        let outcome = orchestrator
            .ensure_allowance(&knc_swap(account, 1_000), FakeChain::proxy(), &mut guard)
            .await
            .unwrap();

        assert!(outcome.submitted());
        assert_eq!(guard.current(), Some(6));

        let sent = chain.broadcasts();
        assert_eq!(sent.len(), 1);
        let approve = &sent[0].fields;
        assert_eq!(approve.nonce, 5);
        assert_eq!(approve.to, Some(FakeChain::knc().address()));
        assert_eq!(approve.value, U256::zero());
        assert_eq!(approve.gas_price, GasTiers::default().fast);
        assert_eq!(approve.gas_limit, U256::from(700_000u64));
        assert_eq!(&approve.data[..4], &[0x09, 0x5e, 0xa7, 0xb3]);
        assert_eq!(U256::from_big_endian(&approve.data[36..68]), abi::max_sentinel());
        assert!(sent[0].v == 41 || sent[0].v == 42);
        assert!(rlp::decode_signed(&chain.raw_broadcasts()[0]).is_ok());
    }

    #[tokio::test]
    async fn test_failed_approval_leaves_nonce() {
        let chain = Arc::new(FakeChain::new(5));
        chain.set_allowance(U256::zero());
        chain.fail_broadcasts(true);
        let (orchestrator, account) = setup(chain.clone());
        let tracker = NonceTracker::new();
        let mut guard = tracker.lock(account.address()).await;

        let err = orchestrator
            .ensure_allowance(&knc_swap(account, 1_000), FakeChain::proxy(), &mut guard)
            .await
            .unwrap_err();

        assert!(matches!(err, WidgetError::Transport { .. }));
        assert_eq!(guard.current(), Some(5));
    }

    #[tokio::test]
    async fn test_native_source_not_required() {
        let chain = Arc::new(FakeChain::new(0));
        let (orchestrator, account) = setup(chain.clone());
        let tracker = NonceTracker::new();
        let mut guard = tracker.lock(account.address()).await;

        let intent = TransactionIntent::new(
            IntentKind::Swap,
            Token::native("ETH"),
            FakeChain::knc(),
            account,
            U256::one(),
            3,
        );
        assert_eq!(
            orchestrator
                .ensure_allowance(&intent, FakeChain::proxy(), &mut guard)
                .await
                .unwrap(),
            ApprovalOutcome::NotRequired
        );
        assert_eq!(chain.calls(), 0);
    }
}
