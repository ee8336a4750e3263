//! Token and account descriptors

use crate::error::{WidgetError, WidgetResult};

use ethers::types::{Address, H160, U256};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Sentinel address the liquidity protocol uses for the chain's native asset
pub const NATIVE_TOKEN_ADDRESS: Address = H160([0xee; 20]);

/// Highest decimal precision the protocol's rate arithmetic supports
pub const MAX_DECIMALS: u32 = 18;

/// Immutable token descriptor; equality and hashing use the address only
#[derive(Debug, Clone)]
pub struct Token {
    address: Address,
    decimals: u32,
    symbol: String,
}

impl Token {
    pub fn new(address: Address, decimals: u32, symbol: impl Into<String>) -> WidgetResult<Self> {
        if decimals > MAX_DECIMALS {
            return Err(WidgetError::Validation(format!(
                "token decimals {} exceed {}",
                decimals, MAX_DECIMALS
            )));
        }
        Ok(Self {
            address,
            decimals,
            symbol: symbol.into(),
        })
    }

    /// The chain's native asset (18 decimals)
    pub fn native(symbol: impl Into<String>) -> Self {
        Self {
            address: NATIVE_TOKEN_ADDRESS,
            decimals: MAX_DECIMALS,
            symbol: symbol.into(),
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn decimals(&self) -> u32 {
        self.decimals
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn is_native(&self) -> bool {
        self.address == NATIVE_TOKEN_ADDRESS
    }

    /// One whole unit, i.e. `10^decimals`
    pub fn unit(&self) -> U256 {
        U256::exp10(self.decimals as usize)
    }

    /// Factor between the protocol's 18-decimal rates and this token's precision
    pub fn rate_scale(&self) -> U256 {
        U256::exp10((MAX_DECIMALS - self.decimals) as usize)
    }
}

impl PartialEq for Token {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl Eq for Token {}

impl Hash for Token {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address.hash(state);
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol)
    }
}

/// Handle to a signing identity held by the key-management collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Account {
    address: Address,
}

impl Account {
    pub fn new(address: Address) -> Self {
        Self { address }
    }

    pub fn address(&self) -> Address {
        self.address
    }
}

impl From<Address> for Account {
    fn from(address: Address) -> Self {
        Self::new(address)
    }
}
