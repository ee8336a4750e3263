//! Native ABI encoding and decoding for the contract calls the widget makes
//!
//! Covers the ERC-20 surface (`transfer`, `approve`, `allowance`, `balanceOf`)
//! and the liquidity protocol surface (`getExpectedRate`, `trade`, `pay`,
//! `getUserCapInWei`).

use crate::error::{WidgetError, WidgetResult};

use ethers::abi::{self, ParamType, Token};
use ethers::types::{Address, Bytes, U256};

/// Hint passed to the pay wrapper to restrict routing to permissioned reserves
pub const PERMISSIONED_HINT: &[u8] = b"PERM";

/// `2^255`, the "unbounded" sentinel for approvals and `maxDestAmount`
pub fn max_sentinel() -> U256 {
    U256::one() << 255
}

/// Arguments shared by `trade` and `pay`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeArgs {
    pub src: Address,
    pub src_amount: U256,
    pub dest: Address,
    pub dest_address: Address,
    /// Defaults to the unbounded sentinel when unset
    pub max_dest_amount: Option<U256>,
    /// Rate with 18 decimals, as the protocol expects it
    pub min_conversion_rate: U256,
    /// Commission recipient; zero address when unset
    pub wallet_id: Option<Address>,
}

/// Extra arguments of the pay wrapper's `pay`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayArgs {
    pub trade: TradeArgs,
    pub payment_data: Bytes,
    pub hint: Bytes,
    pub network_proxy: Address,
}

/// Structured description of one contract call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContractCall {
    Transfer { to: Address, value: U256 },
    Approve { spender: Address, amount: U256 },
    Allowance { owner: Address, spender: Address },
    BalanceOf { owner: Address },
    /// `src_qty` is sent with its top bit set to request the reference reserve
    GetExpectedRate { src: Address, dest: Address, src_qty: U256 },
    Trade(TradeArgs),
    Pay(PayArgs),
    GetUserCapInWei { user: Address },
}

impl ContractCall {
    pub fn name(&self) -> &'static str {
        match self {
            ContractCall::Transfer { .. } => "transfer",
            ContractCall::Approve { .. } => "approve",
            ContractCall::Allowance { .. } => "allowance",
            ContractCall::BalanceOf { .. } => "balanceOf",
            ContractCall::GetExpectedRate { .. } => "getExpectedRate",
            ContractCall::Trade(_) => "trade",
            ContractCall::Pay(_) => "pay",
            ContractCall::GetUserCapInWei { .. } => "getUserCapInWei",
        }
    }

    fn param_types(&self) -> Vec<ParamType> {
        use ParamType::{Address as A, Bytes as B, Uint};

        match self {
            ContractCall::Transfer { .. } | ContractCall::Approve { .. } => vec![A, Uint(256)],
            ContractCall::Allowance { .. } => vec![A, A],
            ContractCall::BalanceOf { .. } | ContractCall::GetUserCapInWei { .. } => vec![A],
            ContractCall::GetExpectedRate { .. } => vec![A, A, Uint(256)],
            ContractCall::Trade(_) => vec![A, Uint(256), A, A, Uint(256), Uint(256), A],
            ContractCall::Pay(_) => vec![
                A,
                Uint(256),
                A,
                A,
                Uint(256),
                Uint(256),
                A,
                B,
                B,
                A,
            ],
        }
    }

    fn tokens(&self) -> Vec<Token> {
        match self {
            ContractCall::Transfer { to, value } => {
                vec![Token::Address(*to), Token::Uint(*value)]
            }
            ContractCall::Approve { spender, amount } => {
                vec![Token::Address(*spender), Token::Uint(*amount)]
            }
            ContractCall::Allowance { owner, spender } => {
                vec![Token::Address(*owner), Token::Address(*spender)]
            }
            ContractCall::BalanceOf { owner } => vec![Token::Address(*owner)],
            ContractCall::GetUserCapInWei { user } => vec![Token::Address(*user)],
            ContractCall::GetExpectedRate { src, dest, src_qty } => vec![
                Token::Address(*src),
                Token::Address(*dest),
                Token::Uint(*src_qty | max_sentinel()),
            ],
            ContractCall::Trade(args) => trade_tokens(args),
            ContractCall::Pay(args) => {
                let mut tokens = trade_tokens(&args.trade);
                tokens.push(Token::Bytes(args.payment_data.to_vec()));
                tokens.push(Token::Bytes(args.hint.to_vec()));
                tokens.push(Token::Address(args.network_proxy));
                tokens
            }
        }
    }

    /// Four-byte function selector
    pub fn selector(&self) -> [u8; 4] {
        abi::short_signature(self.name(), &self.param_types())
    }

    /// Selector followed by the ABI-encoded arguments
    pub fn encode(&self) -> Bytes {
        let mut data = self.selector().to_vec();
        data.extend(abi::encode(&self.tokens()));
        Bytes::from(data)
    }
}

fn trade_tokens(args: &TradeArgs) -> Vec<Token> {
    vec![
        Token::Address(args.src),
        Token::Uint(args.src_amount),
        Token::Address(args.dest),
        Token::Address(args.dest_address),
        Token::Uint(args.max_dest_amount.unwrap_or_else(max_sentinel)),
        Token::Uint(args.min_conversion_rate),
        Token::Address(args.wallet_id.unwrap_or_else(Address::zero)),
    ]
}

fn hex_payload(what: &'static str, response: &str) -> WidgetResult<Vec<u8>> {
    let trimmed = response.trim();
    let stripped = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    hex::decode(stripped).map_err(|e| WidgetError::decode(what, e))
}

/// Decode a single `uint256` return value, reading an empty `0x` as zero
///
/// Nodes answer `0x` for calls against addresses without code, which is how
/// balance and allowance reads against fresh tokens look.
pub fn decode_uint_or_zero(what: &'static str, response: &str) -> WidgetResult<U256> {
    let bytes = hex_payload(what, response)?;
    if bytes.is_empty() {
        return Ok(U256::zero());
    }
    decode_uint(what, &bytes)
}

fn decode_uint(what: &'static str, bytes: &[u8]) -> WidgetResult<U256> {
    abi::decode(&[ParamType::Uint(256)], bytes)
        .map_err(|e| WidgetError::decode(what, e))?
        .into_iter()
        .next()
        .and_then(Token::into_uint)
        .ok_or_else(|| WidgetError::decode(what, "missing uint256 word"))
}

/// Decode the `(expectedRate, slippageRate)` pair returned by `getExpectedRate`
pub fn decode_rate_pair(response: &str) -> WidgetResult<(U256, U256)> {
    let bytes = hex_payload("expected rate", response)?;
    let mut tokens = abi::decode(&[ParamType::Uint(256), ParamType::Uint(256)], &bytes)
        .map_err(|e| WidgetError::decode("expected rate", e))?
        .into_iter();

    let expected = tokens.next().and_then(Token::into_uint);
    let slippage = tokens.next().and_then(Token::into_uint);
    match (expected, slippage) {
        (Some(expected), Some(slippage)) => Ok((expected, slippage)),
        _ => Err(WidgetError::decode("expected rate", "missing rate words")),
    }
}

/// Parse a JSON-RPC hex quantity such as `0x7530`
pub fn parse_quantity(what: &'static str, response: &str) -> WidgetResult<U256> {
    let trimmed = response.trim();
    let digits = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    if digits.is_empty() {
        return Err(WidgetError::decode(what, "empty quantity"));
    }
    U256::from_str_radix(digits, 16).map_err(|e| WidgetError::decode(what, e))
}
