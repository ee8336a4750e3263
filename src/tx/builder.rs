//! Transaction intent builder and signer
//!
//! Turns a fully resolved [`TransactionIntent`] into one of five call shapes,
//! resolves the `to`/`value` pair, and produces EIP-155 signed wire bytes.

use super::gas::OperationCategory;
use super::rlp::{self, SignedFields, TransactionFields};
use super::signer::{Keystore, UnsignedTransaction};
use crate::abi::{self, ContractCall, PayArgs, TradeArgs, PERMISSIONED_HINT};
use crate::chain::EstimateGasRequest;
use crate::error::{WidgetError, WidgetResult};
use crate::intent::{Account, IntentKind, Token, TransactionIntent};

use ethers::types::{Address, Bytes, H256, U256};
use std::sync::Arc;
use tracing::debug;

/// Contracts the widget calls into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContractAddresses {
    /// Liquidity protocol proxy, target of `trade`
    pub network_proxy: Address,
    /// Optional wrapper exposing `pay`
    pub pay_wrapper: Option<Address>,
}

/// Call shapes the builder can emit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallShape {
    /// Native asset moved directly, no call data
    NativeTransfer,
    /// ERC-20 `transfer` on the token contract
    TokenTransfer,
    /// `trade` on the network proxy
    Trade,
    /// `pay` on the pay wrapper
    Pay,
    /// ERC-20 `approve` ahead of a trade or pay
    Approve,
}

/// EIP-155 recovery value
pub fn eip155_v(recovery_id: u8, chain_id: u64) -> u64 {
    if chain_id == 0 {
        recovery_id as u64 + 27
    } else {
        recovery_id as u64 + 35 + 2 * chain_id
    }
}

/// Signed, serialised transaction ready for broadcast
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    pub raw: Bytes,
    pub fields: SignedFields,
}

impl SignedTransaction {
    /// Transaction hash, i.e. keccak256 of the wire bytes
    pub fn hash(&self) -> H256 {
        rlp::keccak256(&self.raw)
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(&self.raw))
    }

    pub fn nonce(&self) -> u64 {
        self.fields.fields.nonce
    }
}

pub struct TransactionBuilder {
    contracts: ContractAddresses,
    keystore: Arc<dyn Keystore>,
}

impl TransactionBuilder {
    pub fn new(contracts: ContractAddresses, keystore: Arc<dyn Keystore>) -> Self {
        Self {
            contracts,
            keystore,
        }
    }

    pub fn contracts(&self) -> &ContractAddresses {
        &self.contracts
    }

    pub fn call_shape(&self, intent: &TransactionIntent) -> CallShape {
        let wrapped_pay = intent.kind == IntentKind::Pay
            && self.contracts.pay_wrapper.is_some()
            && (!intent.is_transfer() || intent.from.is_native());

        if wrapped_pay {
            CallShape::Pay
        } else if intent.is_transfer() {
            if intent.from.is_native() {
                CallShape::NativeTransfer
            } else {
                CallShape::TokenTransfer
            }
        } else {
            CallShape::Trade
        }
    }

    pub fn gas_category(&self, intent: &TransactionIntent) -> OperationCategory {
        match self.call_shape(intent) {
            CallShape::NativeTransfer => OperationCategory::NativeTransfer,
            CallShape::TokenTransfer => OperationCategory::TokenTransfer,
            CallShape::Pay if intent.is_transfer() => OperationCategory::WrappedPay,
            CallShape::Pay | CallShape::Trade | CallShape::Approve => OperationCategory::Exchange,
        }
    }

    /// Contract that will pull `from` tokens, and therefore needs the allowance
    pub fn spender(&self, intent: &TransactionIntent) -> WidgetResult<Address> {
        self.target(intent, self.call_shape(intent))
    }

    /// `to` field of the outer transaction
    fn target(&self, intent: &TransactionIntent, shape: CallShape) -> WidgetResult<Address> {
        match shape {
            CallShape::NativeTransfer => intent.destination_address(),
            CallShape::TokenTransfer | CallShape::Approve => Ok(intent.from.address()),
            CallShape::Trade => Ok(self.contracts.network_proxy),
            CallShape::Pay => self.contracts.pay_wrapper.ok_or_else(|| {
                WidgetError::Internal("pay shape selected without a pay wrapper".into())
            }),
        }
    }

    /// Native value attached; tokens travel inside the call data instead
    pub fn value(intent: &TransactionIntent) -> U256 {
        if intent.from.is_native() {
            intent.amount_from
        } else {
            U256::zero()
        }
    }

    /// `minConversionRate` in the protocol's 18-decimal precision
    fn min_conversion_rate(intent: &TransactionIntent) -> WidgetResult<U256> {
        let min_rate = match intent.min_rate {
            Some(rate) => rate,
            None if intent.is_transfer() => intent.to.unit(),
            None => U256::zero(),
        };
        min_rate
            .checked_mul(intent.to.rate_scale())
            .ok_or_else(|| WidgetError::Encoding(format!("min rate {} overflows", min_rate)))
    }

    fn trade_args(intent: &TransactionIntent) -> WidgetResult<TradeArgs> {
        Ok(TradeArgs {
            src: intent.from.address(),
            src_amount: intent.amount_from,
            dest: intent.to.address(),
            dest_address: intent.destination_address()?,
            max_dest_amount: intent.amount_to,
            min_conversion_rate: Self::min_conversion_rate(intent)?,
            wallet_id: intent.commission_id,
        })
    }

    pub fn call_data(&self, intent: &TransactionIntent) -> WidgetResult<Bytes> {
        let call = match self.call_shape(intent) {
            CallShape::NativeTransfer => return Ok(Bytes::default()),
            CallShape::TokenTransfer => ContractCall::Transfer {
                to: intent.destination_address()?,
                value: intent.amount_from,
            },
            CallShape::Trade => ContractCall::Trade(Self::trade_args(intent)?),
            CallShape::Pay => ContractCall::Pay(PayArgs {
                trade: Self::trade_args(intent)?,
                payment_data: intent.payment_data.clone(),
                hint: Bytes::from(PERMISSIONED_HINT.to_vec()),
                network_proxy: self.contracts.network_proxy,
            }),
            CallShape::Approve => {
                return Err(WidgetError::Internal(
                    "approve is built with draft_approve".into(),
                ))
            }
        };
        Ok(call.encode())
    }

    /// Simulation request mirroring the transaction that will be signed
    pub fn estimate_request(
        &self,
        intent: &TransactionIntent,
        gas_price: U256,
    ) -> WidgetResult<EstimateGasRequest> {
        Ok(EstimateGasRequest {
            from: intent.account.address(),
            to: self.target(intent, self.call_shape(intent))?,
            gas_price,
            value: Self::value(intent),
            data: self.call_data(intent)?,
        })
    }

    /// Assemble the unsigned fields for a validated intent
    pub fn draft(&self, intent: &TransactionIntent, nonce: u64) -> WidgetResult<UnsignedTransaction> {
        intent.validate_for_signing()?;

        let (gas_price, gas_limit) = match (intent.gas_price, intent.gas_limit) {
            (Some(price), Some(limit)) => (price, limit),
            _ => return Err(WidgetError::Validation("gas fields are not resolved".into())),
        };

        let shape = self.call_shape(intent);
        let fields = TransactionFields {
            nonce,
            gas_price,
            gas_limit,
            to: Some(self.target(intent, shape)?),
            value: Self::value(intent),
            data: self.call_data(intent)?,
        };
        debug!(?shape, nonce, to = ?fields.to, value = %fields.value, "drafted transaction");

        Ok(UnsignedTransaction {
            fields,
            chain_id: intent.chain_id,
        })
    }

    /// Unbounded `approve(spender, 2^255)` on the token contract
    pub fn draft_approve(
        &self,
        token: &Token,
        spender: Address,
        nonce: u64,
        gas_price: U256,
        gas_limit: U256,
        chain_id: u64,
    ) -> UnsignedTransaction {
        let call = ContractCall::Approve {
            spender,
            amount: abi::max_sentinel(),
        };

        UnsignedTransaction {
            fields: TransactionFields {
                nonce,
                gas_price,
                gas_limit,
                to: Some(token.address()),
                value: U256::zero(),
                data: call.encode(),
            },
            chain_id,
        }
    }

    /// Ask the keystore for a signature and serialise the result
    pub async fn sign(
        &self,
        unsigned: UnsignedTransaction,
        account: &Account,
    ) -> WidgetResult<SignedTransaction> {
        let signature = self.keystore.sign(&unsigned, account).await?;

        let signed = SignedFields {
            v: eip155_v(signature.recovery_id, unsigned.chain_id),
            r: signature.r,
            s: signature.s,
            fields: unsigned.fields,
        };
        let raw = rlp::encode_signed(&signed);

        Ok(SignedTransaction {
            raw,
            fields: signed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SigningError;
    use crate::tx::rlp::decode_signed;
    use crate::tx::signer::{LocalKeystore, MockKeystore};
    use ethers::signers::{LocalWallet, Signer};
    use ethers::types::Signature;

    const TEST_KEY: &str = "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

    fn proxy() -> Address {
        Address::repeat_byte(0x81)
    }

    fn wrapper() -> Address {
        Address::repeat_byte(0x82)
    }

    fn knc() -> Token {
        Token::new(Address::repeat_byte(0x11), 18, "KNC").unwrap()
    }

    fn usdc() -> Token {
        Token::new(Address::repeat_byte(0x12), 6, "USDC").unwrap()
    }

    fn builder(pay_wrapper: Option<Address>) -> (TransactionBuilder, Account) {
        let wallet: LocalWallet = TEST_KEY.parse().unwrap();
        let mut keystore = LocalKeystore::new();
        let account = Account::new(keystore.insert(wallet));
        let builder = TransactionBuilder::new(
            ContractAddresses {
                network_proxy: proxy(),
                pay_wrapper,
            },
            Arc::new(keystore),
        );
        (builder, account)
    }

    fn intent(kind: IntentKind, from: Token, to: Token, account: Account) -> TransactionIntent {
        TransactionIntent::new(kind, from, to, account, U256::exp10(18), 3)
            .with_gas(U256::from(10_000_000_000u64), U256::from(21_000u64))
    }

    #[tokio::test]
    async fn test_native_transfer_scenario() {
        let (builder, account) = builder(None);
        let mut intent = intent(
            IntentKind::Pay,
            Token::native("ETH"),
            Token::native("ETH"),
            account,
        )
        .with_destination("0x2222222222222222222222222222222222222222");
        intent.amount_from = U256::from(15u64) * U256::exp10(17);

        let unsigned = builder.draft(&intent, 7).unwrap();
        let signed = builder.sign(unsigned.clone(), &account).await.unwrap();
        let decoded = decode_signed(&signed.raw).unwrap();

        assert_eq!(decoded.fields.nonce, 7);
        assert_eq!(decoded.fields.value, U256::from(1_500_000_000_000_000_000u64));
        assert_eq!(decoded.fields.gas_price, U256::from(10_000_000_000u64));
        assert_eq!(decoded.fields.gas_limit, U256::from(21_000u64));
        assert_eq!(decoded.fields.to, Some(Address::repeat_byte(0x22)));
        assert!(decoded.fields.data.is_empty());
        assert!(decoded.v == 41 || decoded.v == 42);
        assert_eq!(decoded, signed.fields);

        let recovered = Signature {
            r: decoded.r,
            s: decoded.s,
            v: decoded.v - 35 - 2 * 3 + 27,
        }
        .recover(unsigned.signing_hash())
        .unwrap();
        assert_eq!(recovered, account.address());
    }

    #[tokio::test]
    async fn test_matches_ethers_legacy_signing() {
        use ethers::types::transaction::eip2718::TypedTransaction;
        use ethers::types::TransactionRequest;

        let (builder, account) = builder(None);
        let intent = intent(
            IntentKind::Swap,
            Token::native("ETH"),
            Token::native("ETH"),
            account,
        )
        .with_destination("0x3535353535353535353535353535353535353535");

        let signed = builder.sign(builder.draft(&intent, 9).unwrap(), &account).await.unwrap();

        let wallet: LocalWallet = TEST_KEY.parse::<LocalWallet>().unwrap().with_chain_id(3u64);
        let request: TypedTransaction = TransactionRequest::new()
            .nonce(9)
            .to(Address::repeat_byte(0x35))
            .value(U256::exp10(18))
            .gas(21_000u64)
            .gas_price(10_000_000_000u64)
            .chain_id(3u64)
            .into();
        let signature = wallet.sign_transaction(&request).await.unwrap();

        assert_eq!(signed.raw, request.rlp_signed(&signature));
    }

    #[test]
    fn test_token_transfer_targets_contract() {
        let (builder, account) = builder(None);
        let intent = intent(IntentKind::Pay, knc(), knc(), account)
            .with_destination("0x2222222222222222222222222222222222222222");

        assert_eq!(builder.call_shape(&intent), CallShape::TokenTransfer);
        let unsigned = builder.draft(&intent, 0).unwrap();
        assert_eq!(unsigned.fields.to, Some(knc().address()));
        assert_eq!(unsigned.fields.value, U256::zero());
        assert_eq!(&unsigned.fields.data[..4], &[0xa9, 0x05, 0x9c, 0xbb]);
        assert_eq!(&unsigned.fields.data[16..36], &[0x22u8; 20]);
    }

    #[test]
    fn test_trade_targets_proxy_not_destination() {
        let (builder, account) = builder(None);
        let intent = intent(IntentKind::Swap, Token::native("ETH"), usdc(), account)
            .with_min_rate(U256::from(300_000_000u64));

        assert_eq!(builder.call_shape(&intent), CallShape::Trade);
        assert_eq!(builder.gas_category(&intent), OperationCategory::Exchange);
        let unsigned = builder.draft(&intent, 1).unwrap();
        assert_eq!(unsigned.fields.to, Some(proxy()));
        assert_eq!(unsigned.fields.value, U256::exp10(18));

        // destAddress falls back to the account for a swap
        assert_eq!(&unsigned.fields.data[4 + 3 * 32 + 12..4 + 4 * 32], account.address().as_bytes());
        // 300 USDC per ETH scaled back to 18 decimals
        let min_conversion = U256::from_big_endian(&unsigned.fields.data[4 + 5 * 32..4 + 6 * 32]);
        assert_eq!(min_conversion, U256::from(300u64) * U256::exp10(18));
    }

    #[test]
    fn test_token_side_value_is_zero() {
        let (builder, account) = builder(None);
        let intent = intent(IntentKind::Swap, knc(), Token::native("ETH"), account)
            .with_min_rate(U256::from(1_000u64));
        let unsigned = builder.draft(&intent, 0).unwrap();
        assert_eq!(unsigned.fields.value, U256::zero());
        assert_eq!(builder.spender(&intent).unwrap(), proxy());
    }

    #[test]
    fn test_pay_uses_wrapper() {
        let (builder, account) = builder(Some(wrapper()));
        let cross = intent(IntentKind::Pay, knc(), Token::native("ETH"), account)
            .with_min_rate(U256::from(1_000u64))
            .with_payment_data(vec![0x01u8, 0x02]);
        assert_eq!(builder.call_shape(&cross), CallShape::Pay);
        assert_eq!(builder.spender(&cross).unwrap(), wrapper());
        assert_eq!(builder.draft(&cross, 0).unwrap().fields.to, Some(wrapper()));

        let native = intent(
            IntentKind::Pay,
            Token::native("ETH"),
            Token::native("ETH"),
            account,
        );
        assert_eq!(builder.call_shape(&native), CallShape::Pay);
        assert_eq!(builder.gas_category(&native), OperationCategory::WrappedPay);

        let token = intent(IntentKind::Pay, knc(), knc(), account);
        assert_eq!(builder.call_shape(&token), CallShape::TokenTransfer);

        let swap = intent(IntentKind::Swap, knc(), Token::native("ETH"), account)
            .with_min_rate(U256::from(1_000u64));
        assert_eq!(builder.call_shape(&swap), CallShape::Trade);
    }

    #[test]
    fn test_draft_rejects_zero_min_rate() {
        let (builder, account) = builder(None);
        let intent = intent(IntentKind::Swap, knc(), Token::native("ETH"), account)
            .with_min_rate(U256::zero());
        assert!(matches!(
            builder.draft(&intent, 0),
            Err(WidgetError::Validation(_))
        ));
    }

    #[test]
    fn test_draft_approve() {
        let (builder, _) = builder(None);
        let unsigned = builder.draft_approve(
            &knc(),
            proxy(),
            4,
            U256::from(15_000_000_000u64),
            U256::from(700_000u64),
            1,
        );
        assert_eq!(unsigned.fields.to, Some(knc().address()));
        assert_eq!(unsigned.fields.nonce, 4);
        assert_eq!(&unsigned.fields.data[..4], &[0x09, 0x5e, 0xa7, 0xb3]);
        assert_eq!(U256::from_big_endian(&unsigned.fields.data[36..68]), abi::max_sentinel());
    }

    #[test]
    fn test_eip155_v() {
        assert_eq!(eip155_v(0, 1), 37);
        assert_eq!(eip155_v(1, 1), 38);
        assert_eq!(eip155_v(1, 3), 42);
        assert_eq!(eip155_v(0, 0), 27);
        assert_eq!(eip155_v(1, 0), 28);
    }

    #[tokio::test]
    async fn test_signing_failure_is_reported() {
        let mut keystore = MockKeystore::new();
        keystore
            .expect_sign()
            .times(1)
            .returning(|_, account| Err(SigningError::Locked(account.address())));

        let builder = TransactionBuilder::new(
            ContractAddresses {
                network_proxy: proxy(),
                pay_wrapper: None,
            },
            Arc::new(keystore),
        );
        let account = Account::new(Address::repeat_byte(0xaa));
        let intent = intent(
            IntentKind::Swap,
            Token::native("ETH"),
            Token::native("ETH"),
            account,
        );

        let err = builder
            .sign(builder.draft(&intent, 0).unwrap(), &account)
            .await
            .unwrap_err();
        assert!(matches!(err, WidgetError::Signing(SigningError::Locked(_))));
    }

    #[test]
    fn test_hash_is_keccak_of_raw() {
        let signed = SignedTransaction {
            raw: Bytes::from(vec![0xc0]),
            fields: SignedFields {
                fields: TransactionFields {
                    nonce: 0,
                    gas_price: U256::zero(),
                    gas_limit: U256::zero(),
                    to: None,
                    value: U256::zero(),
                    data: Bytes::default(),
                },
                v: 27,
                r: U256::zero(),
                s: U256::zero(),
            },
        };
        assert_eq!(signed.hash(), rlp::keccak256(&[0xc0]));
        assert_eq!(signed.to_hex(), "0xc0");
    }
}
