//! Submission pipeline
//!
//! Drives one intent through
//! `Resolving -> GasPricing -> (Approving) -> Signing -> Broadcasting -> Done`,
//! halting with a [`PipelineError`] in whichever state fails.

use super::approval::{ApprovalOrchestrator, ApprovalOutcome};
use crate::chain::{EthRpc, GasPriceFeed};
use crate::config::Settings;
use crate::error::{ErrorCategory, WidgetError, WidgetResult};
use crate::intent::TransactionIntent;
use crate::rate::{self, RateResolver, SlippagePolicy};
use crate::tx::{
    ContractAddresses, GasLimitPolicy, GasPriceCache, GasPriceSelection, GasTiers, Keystore,
    NonceTracker, TransactionBuilder,
};

use ethers::types::{Address, U256};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Pipeline states; `Failed` is expressed as a [`PipelineError`] carrying the state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineState {
    Resolving,
    GasPricing,
    Approving,
    Signing,
    Broadcasting,
    Done,
}

impl PipelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Resolving => "resolving",
            PipelineState::GasPricing => "gas_pricing",
            PipelineState::Approving => "approving",
            PipelineState::Signing => "signing",
            PipelineState::Broadcasting => "broadcasting",
            PipelineState::Done => "done",
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal failure, recording the state the pipeline halted in
#[derive(Debug, Error)]
#[error("submission failed while {stage}: {source}")]
pub struct PipelineError {
    pub stage: PipelineState,
    #[source]
    pub source: WidgetError,
}

impl PipelineError {
    pub fn is_recoverable(&self) -> bool {
        self.source.is_recoverable()
    }

    /// Single message suitable for the end user
    pub fn user_message(&self) -> String {
        match &self.source {
            WidgetError::NoLiquidity { from, to } => {
                format!("Converting {} to {} is not supported right now", from, to)
            }
            WidgetError::InsufficientBalance { .. } => {
                "Your balance is not enough for this transaction".to_string()
            }
            WidgetError::ExceedsUserCap { .. } => {
                "This amount exceeds your current trading limit".to_string()
            }
            WidgetError::NotWhitelisted(_) => {
                "This wallet is not allowed to make this payment".to_string()
            }
            WidgetError::Validation(reason) => format!("Invalid transaction: {}", reason),
            WidgetError::Cancelled => "The transaction was cancelled".to_string(),
            err => match err.category() {
                ErrorCategory::Transport | ErrorCategory::Decode => format!(
                    "Network problem while {}, please try again",
                    self.stage.as_str().replace('_', " ")
                ),
                ErrorCategory::Signing => {
                    "Could not sign the transaction, check your wallet credentials".to_string()
                }
                _ => "Something went wrong, please try again later".to_string(),
            },
        }
    }
}

/// One request to the pipeline
#[derive(Debug, Clone)]
pub struct SubmissionRequest {
    pub intent: TransactionIntent,
    pub gas_price: GasPriceSelection,
    /// Slippage tolerance in percent; the configured default when unset
    pub slippage_percent: Option<u32>,
}

impl SubmissionRequest {
    pub fn new(intent: TransactionIntent) -> Self {
        Self {
            intent,
            gas_price: GasPriceSelection::default(),
            slippage_percent: None,
        }
    }

    pub fn with_gas_price(mut self, selection: GasPriceSelection) -> Self {
        self.gas_price = selection;
        self
    }

    pub fn with_slippage(mut self, percent: u32) -> Self {
        self.slippage_percent = Some(percent);
        self
    }
}

/// Successful broadcast
#[derive(Debug, Clone)]
pub struct SubmissionReceipt {
    pub tx_hash: String,
    pub nonce: u64,
    pub approval: ApprovalOutcome,
    /// The intent as signed, with rates and gas filled in
    pub intent: TransactionIntent,
    pub estimated_fee: U256,
    /// States visited, in order
    pub trace: Vec<PipelineState>,
}

/// Client-side checks beyond the intent's own invariants
#[derive(Debug, Clone, Default)]
pub struct ValidationPolicy {
    pub signer_whitelist: Vec<Address>,
    pub min_native_amount: U256,
    pub enforce_user_cap: bool,
    pub check_balance: bool,
    /// Chain the node serves; intents for any other chain are rejected
    pub chain_id: Option<u64>,
}

impl ValidationPolicy {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            signer_whitelist: settings.wallet.signer_whitelist.clone(),
            min_native_amount: U256::from(settings.validation.min_native_amount_wei),
            enforce_user_cap: settings.validation.enforce_user_cap,
            check_balance: settings.validation.check_balance,
            chain_id: Some(settings.network.chain_id),
        }
    }
}

struct RunState {
    stage: PipelineState,
    trace: Vec<PipelineState>,
}

impl RunState {
    fn enter(&mut self, stage: PipelineState) {
        debug!(from = %self.stage, to = %stage, "pipeline transition");
        self.stage = stage;
        self.trace.push(stage);
    }
}

/// Race a remote read against cancellation
async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> WidgetResult<T>
where
    F: Future<Output = WidgetResult<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(WidgetError::Cancelled),
        result = fut => result,
    }
}

/// Composes the resolver, gas policy, nonce tracker, approval step and signer
pub struct SubmissionPipeline {
    rpc: Arc<dyn EthRpc>,
    rates: Arc<RateResolver>,
    gas: Arc<GasPriceCache>,
    limits: GasLimitPolicy,
    nonces: Arc<NonceTracker>,
    builder: Arc<TransactionBuilder>,
    approvals: ApprovalOrchestrator,
    validation: ValidationPolicy,
}

impl SubmissionPipeline {
    /// Wire up every component from configuration and the external collaborators
    pub fn from_settings(
        settings: &Settings,
        rpc: Arc<dyn EthRpc>,
        feed: Arc<dyn GasPriceFeed>,
        keystore: Arc<dyn Keystore>,
    ) -> WidgetResult<Self> {
        let gas = Arc::new(GasPriceCache::new(
            GasTiers::from_config(&settings.gas),
            feed,
            Duration::from_secs(settings.gas.refresh_interval_secs),
        ));
        let limits = GasLimitPolicy::from_config(&settings.gas)?;
        let rates = Arc::new(RateResolver::new(
            rpc.clone(),
            settings.network.network_proxy,
            SlippagePolicy::from_config(&settings.slippage),
        ));
        let builder = Arc::new(TransactionBuilder::new(
            ContractAddresses {
                network_proxy: settings.network.network_proxy,
                pay_wrapper: settings.network.pay_wrapper,
            },
            keystore,
        ));
        let approvals =
            ApprovalOrchestrator::new(rpc.clone(), gas.clone(), limits.clone(), builder.clone());

        Ok(Self {
            rpc,
            rates,
            gas,
            limits,
            nonces: Arc::new(NonceTracker::new()),
            builder,
            approvals,
            validation: ValidationPolicy::from_settings(settings),
        })
    }

    pub fn gas_cache(&self) -> Arc<GasPriceCache> {
        self.gas.clone()
    }

    pub fn rates(&self) -> Arc<RateResolver> {
        self.rates.clone()
    }

    pub fn nonces(&self) -> Arc<NonceTracker> {
        self.nonces.clone()
    }

    /// Run one intent to a broadcast transaction hash
    ///
    /// `cancel` is honoured up to the broadcast; once broadcasting starts the
    /// submission completes or fails on its own.
    pub async fn submit(
        &self,
        request: SubmissionRequest,
        cancel: &CancellationToken,
    ) -> Result<SubmissionReceipt, PipelineError> {
        let span = info_span!(
            "submission",
            id = %Uuid::new_v4(),
            kind = %request.intent.kind,
            account = ?request.intent.account.address(),
        );

        async move {
            let mut state = RunState {
                stage: PipelineState::Resolving,
                trace: vec![PipelineState::Resolving],
            };

            match self.execute(request, cancel, &mut state).await {
                Ok(receipt) => Ok(receipt),
                Err(source) => {
                    crate::metrics::record_failure(state.stage.as_str());
                    if source.category() == ErrorCategory::Validation {
                        warn!(stage = %state.stage, "submission rejected: {}", source);
                    } else {
                        error!(stage = %state.stage, "submission failed: {}", source);
                    }
                    Err(PipelineError {
                        stage: state.stage,
                        source,
                    })
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn execute(
        &self,
        request: SubmissionRequest,
        cancel: &CancellationToken,
        state: &mut RunState,
    ) -> WidgetResult<SubmissionReceipt> {
        let SubmissionRequest {
            mut intent,
            gas_price: gas_selection,
            slippage_percent,
        } = request;

        // Resolving
        let percent = self.validate_offline(&intent, slippage_percent)?;
        self.resolve(&mut intent, percent, cancel).await?;

        // GasPricing
        state.enter(PipelineState::GasPricing);
        let gas_price = self.gas.price_for(gas_selection).await;
        let ceiling = self.limits.table().ceiling(
            self.builder.gas_category(&intent),
            &[&intent.from, &intent.to],
        );
        let estimate = self.builder.estimate_request(&intent, gas_price)?;
        let gas_limit = cancellable(cancel, async {
            Ok::<_, WidgetError>(self
                .limits
                .estimate(self.rpc.as_ref(), estimate, ceiling)
                .await)
        })
        .await?;
        intent.gas_price = Some(gas_price);
        intent.gas_limit = Some(gas_limit);

        let mut guard = cancellable(cancel, async {
            Ok::<_, WidgetError>(self.nonces.lock(intent.account.address()).await)
        })
        .await?;

        // Approving
        let approval = if intent.needs_allowance() {
            state.enter(PipelineState::Approving);
            if cancel.is_cancelled() {
                return Err(WidgetError::Cancelled);
            }
            let spender = self.builder.spender(&intent)?;
            self.approvals
                .ensure_allowance(&intent, spender, &mut guard)
                .await?
        } else {
            ApprovalOutcome::NotRequired
        };

        // Signing
        state.enter(PipelineState::Signing);
        intent.validate_for_signing()?;
        let nonce = cancellable(cancel, guard.sync(self.rpc.as_ref())).await?;
        let unsigned = self.builder.draft(&intent, nonce)?;
        let signed = self.builder.sign(unsigned, &intent.account).await?;
        if cancel.is_cancelled() {
            return Err(WidgetError::Cancelled);
        }

        // Broadcasting
        state.enter(PipelineState::Broadcasting);
        let tx_hash = self.rpc.send_raw_transaction(signed.raw.clone()).await?;
        guard.advance(&tx_hash);
        drop(guard);

        state.enter(PipelineState::Done);
        crate::metrics::record_submission(intent.kind.as_str());
        info!(%tx_hash, nonce, "transaction broadcast");

        Ok(SubmissionReceipt {
            tx_hash,
            nonce,
            approval,
            estimated_fee: GasLimitPolicy::estimated_fee(gas_limit, gas_price),
            intent,
            trace: state.trace.clone(),
        })
    }

    /// Checks made before any network call; returns the slippage tolerance
    fn validate_offline(
        &self,
        intent: &TransactionIntent,
        slippage_percent: Option<u32>,
    ) -> WidgetResult<u32> {
        let account = intent.account.address();
        if !self.validation.signer_whitelist.is_empty()
            && !self.validation.signer_whitelist.contains(&account)
        {
            return Err(WidgetError::NotWhitelisted(account));
        }

        if let Some(chain_id) = self.validation.chain_id {
            if intent.chain_id != chain_id {
                return Err(WidgetError::Validation(format!(
                    "intent targets chain {} but the node serves chain {}",
                    intent.chain_id, chain_id
                )));
            }
        }

        intent.validate_amount()?;

        if intent.from.is_native() && intent.amount_to.is_none() {
            self.check_min_native(intent.amount_from)?;
        }

        self.rates.policy().resolve(intent.kind, slippage_percent)
    }

    fn check_min_native(&self, amount: U256) -> WidgetResult<()> {
        if amount <= self.validation.min_native_amount {
            return Err(WidgetError::Validation(format!(
                "amount {} wei must exceed the minimum of {} wei",
                amount, self.validation.min_native_amount
            )));
        }
        Ok(())
    }

    /// Fill in rates and the debited amount
    async fn resolve(
        &self,
        intent: &mut TransactionIntent,
        percent: u32,
        cancel: &CancellationToken,
    ) -> WidgetResult<()> {
        let quote = cancellable(
            cancel,
            self.rates.quote(&intent.from, &intent.to, intent.amount_from),
        )
        .await?;
        if !intent.is_transfer() {
            rate::require_liquidity(&quote, &intent.from, &intent.to)?;
        }
        intent.expected_rate = Some(quote.expected_rate);

        let min_rate = match intent.min_rate {
            Some(rate) => rate,
            None if intent.is_transfer() => quote.expected_rate,
            None => rate::min_rate(quote.expected_rate, percent),
        };
        intent.min_rate = Some(min_rate);
        if min_rate > quote.expected_rate {
            return Err(WidgetError::Validation(format!(
                "min rate {} exceeds expected rate {}",
                min_rate, quote.expected_rate
            )));
        }

        let owner = intent.account.address();
        let needs_balance = intent.amount_to.is_some() || self.validation.check_balance;
        let balance = if needs_balance {
            Some(cancellable(cancel, self.rates.balance_of(&intent.from, owner)).await?)
        } else {
            None
        };

        if let Some(amount_to) = intent.amount_to {
            intent.amount_from = rate::resolve_amount_from(
                amount_to,
                &intent.from,
                min_rate,
                intent.amount_from,
                balance.unwrap_or_default(),
            )?;
            debug!(%amount_to, amount_from = %intent.amount_from, "resolved debited amount");
            intent.validate_amount()?;
        }

        if intent.to.is_native() && !intent.from.is_native() && intent.amount_to.is_none() {
            let received =
                rate::convert_amount(intent.amount_from, &intent.from, quote.expected_rate);
            self.check_min_native(received)?;
        }

        if self.validation.check_balance {
            let have = balance.unwrap_or_default();
            if intent.amount_from > have {
                return Err(WidgetError::InsufficientBalance {
                    have,
                    need: intent.amount_from,
                });
            }
        }

        if self.validation.enforce_user_cap && !intent.is_transfer() {
            let worth = if intent.from.is_native() {
                Ok(intent.amount_from)
            } else if intent.to.is_native() {
                Ok(rate::convert_amount(intent.amount_from, &intent.from, quote.expected_rate))
            } else {
                cancellable(cancel, self.rates.value_in_native(&intent.from, intent.amount_from))
                    .await
            };
            let cap = match worth {
                Ok(worth) => cancellable(cancel, self.rates.user_cap(owner))
                    .await
                    .map(|cap| (worth, cap)),
                Err(e) => Err(e),
            };
            match cap {
                Ok((worth, cap)) if worth > cap => {
                    return Err(WidgetError::ExceedsUserCap { amount: worth, cap })
                }
                Ok(_) => {}
                Err(WidgetError::Cancelled) => return Err(WidgetError::Cancelled),
                Err(e) => warn!("User cap unavailable, not enforcing: {}", e),
            }
        }

        Ok(())
    }
}
