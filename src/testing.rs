//! Scripted in-memory chain for pipeline scenario tests

use crate::abi::ContractCall;
use crate::chain::{EstimateGasRequest, EthRpc};
use crate::error::{WidgetError, WidgetResult};
use crate::intent::Token;
use crate::tx::rlp::{self, SignedFields};

use async_trait::async_trait;
use ethers::types::{Address, Bytes, U256};
use std::sync::Mutex;

struct FakeState {
    remote_nonce: u64,
    allowance: U256,
    token_balance: U256,
    native_balance: U256,
    rate: (U256, U256),
    user_cap: Option<U256>,
    estimate: Option<String>,
    fail_broadcasts: bool,
    broadcasts: Vec<Bytes>,
    estimates: Vec<EstimateGasRequest>,
    calls: usize,
}

/// Node double that answers the widget's reads and records every broadcast
pub struct FakeChain {
    state: Mutex<FakeState>,
}

fn word(value: U256) -> String {
    let mut buf = [0u8; 32];
    value.to_big_endian(&mut buf);
    hex::encode(buf)
}

impl FakeChain {
    pub fn new(remote_nonce: u64) -> Self {
        Self {
            state: Mutex::new(FakeState {
                remote_nonce,
                allowance: U256::zero(),
                token_balance: U256::from(1_000_000u64) * U256::exp10(18),
                native_balance: U256::from(100u64) * U256::exp10(18),
                rate: (
                    U256::from(2u64) * U256::exp10(15),
                    U256::from(194u64) * U256::exp10(13),
                ),
                user_cap: None,
                estimate: Some("0x7530".to_string()),
                fail_broadcasts: false,
                broadcasts: Vec::new(),
                estimates: Vec::new(),
                calls: 0,
            }),
        }
    }

    pub fn proxy() -> Address {
        Address::repeat_byte(0x81)
    }

    pub fn knc() -> Token {
        Token::new(Address::repeat_byte(0x11), 18, "KNC").unwrap()
    }

    fn with<R>(&self, f: impl FnOnce(&mut FakeState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    pub fn set_allowance(&self, allowance: U256) {
        self.with(|s| s.allowance = allowance);
    }

    pub fn set_token_balance(&self, balance: U256) {
        self.with(|s| s.token_balance = balance);
    }

    pub fn set_native_balance(&self, balance: U256) {
        self.with(|s| s.native_balance = balance);
    }

    /// Rates as the protocol reports them, with 18 decimals
    pub fn set_rate(&self, expected: U256, slippage: U256) {
        self.with(|s| s.rate = (expected, slippage));
    }

    pub fn set_user_cap(&self, cap: U256) {
        self.with(|s| s.user_cap = Some(cap));
    }

    pub fn set_estimate(&self, estimate: Option<&str>) {
        self.with(|s| s.estimate = estimate.map(str::to_string));
    }

    pub fn fail_broadcasts(&self, fail: bool) {
        self.with(|s| s.fail_broadcasts = fail);
    }

    pub fn remote_nonce(&self) -> u64 {
        self.with(|s| s.remote_nonce)
    }

    pub fn raw_broadcasts(&self) -> Vec<Bytes> {
        self.with(|s| s.broadcasts.clone())
    }

    pub fn broadcasts(&self) -> Vec<SignedFields> {
        self.raw_broadcasts()
            .iter()
            .map(|raw| rlp::decode_signed(raw).unwrap())
            .collect()
    }

    pub fn estimates(&self) -> Vec<EstimateGasRequest> {
        self.with(|s| s.estimates.clone())
    }

    /// Number of `eth_call` reads served
    pub fn calls(&self) -> usize {
        self.with(|s| s.calls)
    }
}

#[async_trait]
impl EthRpc for FakeChain {
    async fn transaction_count(&self, _address: Address) -> WidgetResult<u64> {
        Ok(self.remote_nonce())
    }

    async fn call(&self, _to: Address, data: Bytes) -> WidgetResult<String> {
        let zero = Address::zero();
        let allowance = ContractCall::Allowance { owner: zero, spender: zero }.selector();
        let balance_of = ContractCall::BalanceOf { owner: zero }.selector();
        let expected_rate = ContractCall::GetExpectedRate {
            src: zero,
            dest: zero,
            src_qty: U256::zero(),
        }
        .selector();
        let user_cap = ContractCall::GetUserCapInWei { user: zero }.selector();
        let selector = &data[..4];

        self.with(|s| {
            s.calls += 1;

            if selector == allowance {
                Ok(format!("0x{}", word(s.allowance)))
            } else if selector == balance_of {
                Ok(format!("0x{}", word(s.token_balance)))
            } else if selector == expected_rate {
                Ok(format!("0x{}{}", word(s.rate.0), word(s.rate.1)))
            } else if selector == user_cap {
                Ok(s.user_cap
                    .map(|cap| format!("0x{}", word(cap)))
                    .unwrap_or_else(|| "0x".to_string()))
            } else {
                Err(WidgetError::Rpc {
                    method: "eth_call",
                    message: "execution reverted".to_string(),
                })
            }
        })
    }

    async fn estimate_gas(&self, request: EstimateGasRequest) -> WidgetResult<String> {
        self.with(|s| {
            s.estimates.push(request);
            s.estimate.clone().ok_or_else(|| WidgetError::Rpc {
                method: "eth_estimateGas",
                message: "execution reverted".to_string(),
            })
        })
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> WidgetResult<String> {
        self.with(|s| {
            if s.fail_broadcasts {
                return Err(WidgetError::transport("eth_sendRawTransaction", "connection reset"));
            }
            let hash = rlp::keccak256(&raw);
            s.broadcasts.push(raw);
            s.remote_nonce += 1;
            Ok(format!("0x{}", hex::encode(hash)))
        })
    }

    async fn balance(&self, _address: Address) -> WidgetResult<U256> {
        Ok(self.with(|s| s.native_balance))
    }
}
