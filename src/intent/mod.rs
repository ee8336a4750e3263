//! Transaction intents produced by the embedding application

mod token;

pub use token::{Account, Token, MAX_DECIMALS, NATIVE_TOKEN_ADDRESS};

use crate::error::{WidgetError, WidgetResult};

use ethers::types::{Address, Bytes, U256};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What the user is trying to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntentKind {
    /// Pay a merchant address, optionally converting on the way
    Pay,
    /// Swap between two tokens, receiving into the own wallet
    Swap,
    /// Buy a fixed token with whatever the user holds
    Buy,
}

impl IntentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentKind::Pay => "pay",
            IntentKind::Swap => "swap",
            IntentKind::Buy => "buy",
        }
    }
}

impl fmt::Display for IntentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The central entity consumed by the submission pipeline
#[derive(Debug, Clone)]
pub struct TransactionIntent {
    pub kind: IntentKind,
    pub from: Token,
    pub to: Token,
    pub account: Account,
    /// Recipient address; empty means the account itself
    pub destination_wallet: String,
    /// Amount debited, scaled by `from.decimals`
    pub amount_from: U256,
    /// Fixed received amount, scaled by `to.decimals`
    pub amount_to: Option<U256>,
    /// Lowest acceptable rate, scaled by `to.decimals`
    pub min_rate: Option<U256>,
    pub gas_price: Option<U256>,
    pub gas_limit: Option<U256>,
    pub expected_rate: Option<U256>,
    pub chain_id: u64,
    pub commission_id: Option<Address>,
    /// Opaque payment reference forwarded to the pay wrapper
    pub payment_data: Bytes,
}

impl TransactionIntent {
    pub fn new(
        kind: IntentKind,
        from: Token,
        to: Token,
        account: Account,
        amount_from: U256,
        chain_id: u64,
    ) -> Self {
        Self {
            kind,
            from,
            to,
            account,
            destination_wallet: String::new(),
            amount_from,
            amount_to: None,
            min_rate: None,
            gas_price: None,
            gas_limit: None,
            expected_rate: None,
            chain_id,
            commission_id: None,
            payment_data: Bytes::default(),
        }
    }

    pub fn with_destination(mut self, wallet: impl Into<String>) -> Self {
        self.destination_wallet = wallet.into();
        self
    }

    pub fn with_amount_to(mut self, amount_to: U256) -> Self {
        self.amount_to = Some(amount_to);
        self
    }

    pub fn with_min_rate(mut self, min_rate: U256) -> Self {
        self.min_rate = Some(min_rate);
        self
    }

    pub fn with_commission(mut self, commission_id: Address) -> Self {
        self.commission_id = Some(commission_id);
        self
    }

    pub fn with_payment_data(mut self, data: impl Into<Bytes>) -> Self {
        self.payment_data = data.into();
        self
    }

    pub fn with_gas(mut self, gas_price: U256, gas_limit: U256) -> Self {
        self.gas_price = Some(gas_price);
        self.gas_limit = Some(gas_limit);
        self
    }

    /// Same token on both sides: a plain transfer
    pub fn is_transfer(&self) -> bool {
        self.from == self.to
    }

    /// Whether an allowance must be in place before the main call
    pub fn needs_allowance(&self) -> bool {
        !self.is_transfer() && !self.from.is_native()
    }

    /// Resolve the recipient, falling back to the account for send-to-self
    pub fn destination_address(&self) -> WidgetResult<Address> {
        let wallet = self.destination_wallet.trim();
        if wallet.is_empty() {
            return Ok(self.account.address());
        }
        wallet.parse::<Address>().map_err(|e| {
            WidgetError::Validation(format!("invalid destination wallet {}: {}", wallet, e))
        })
    }

    /// Checks that need no network access
    pub fn validate_amount(&self) -> WidgetResult<()> {
        if self.amount_from.is_zero() && self.amount_to.map_or(true, |a| a.is_zero()) {
            return Err(WidgetError::Validation("amount must be positive".into()));
        }
        self.destination_address()?;
        Ok(())
    }

    /// Final gate before the signer is invoked
    pub fn validate_for_signing(&self) -> WidgetResult<()> {
        if self.amount_from.is_zero() {
            return Err(WidgetError::Validation("amount must be positive".into()));
        }

        if !self.is_transfer() {
            match self.min_rate {
                None => {
                    return Err(WidgetError::Validation(
                        "min rate must be set for a cross-token trade".into(),
                    ))
                }
                Some(rate) if rate.is_zero() => {
                    return Err(WidgetError::Validation(
                        "min rate must be non-zero for a cross-token trade".into(),
                    ))
                }
                Some(_) => {}
            }
        }

        if let (Some(min), Some(expected)) = (self.min_rate, self.expected_rate) {
            if min > expected {
                return Err(WidgetError::Validation(format!(
                    "min rate {} exceeds expected rate {}",
                    min, expected
                )));
            }
        }

        if self.gas_price.is_none() || self.gas_limit.is_none() {
            return Err(WidgetError::Validation("gas fields are not resolved".into()));
        }

        Ok(())
    }
}
