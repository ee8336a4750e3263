//! Signing capability
//!
//! The widget never handles key storage itself; it asks a [`Keystore`] for a
//! recoverable signature over the EIP-155 signing hash.

use super::rlp::{signing_hash, TransactionFields};
use crate::error::{SigningError, WidgetError, WidgetResult};
use crate::intent::Account;

use async_trait::async_trait;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, H256, U256};
use std::collections::HashMap;
use tracing::info;

/// Fields awaiting a signature, bound to a chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedTransaction {
    pub fields: TransactionFields,
    pub chain_id: u64,
}

impl UnsignedTransaction {
    pub fn signing_hash(&self) -> H256 {
        signing_hash(&self.fields, self.chain_id)
    }
}

/// Recoverable secp256k1 signature before `v` is chain-adjusted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawSignature {
    pub r: U256,
    pub s: U256,
    /// 0 or 1
    pub recovery_id: u8,
}

/// Narrow signing interface owned by the key-management layer
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Keystore: Send + Sync {
    async fn sign(
        &self,
        tx: &UnsignedTransaction,
        account: &Account,
    ) -> Result<RawSignature, SigningError>;
}

/// In-process keystore holding plain local wallets
#[derive(Default)]
pub struct LocalKeystore {
    wallets: HashMap<Address, LocalWallet>,
}

impl LocalKeystore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a single hex private key from an environment variable
    pub fn from_env(var: &str) -> WidgetResult<Self> {
        let key = std::env::var(var).map_err(|_| {
            WidgetError::Config(format!("No wallet configured. Set {} to a hex private key", var))
        })?;

        let wallet = key
            .trim()
            .parse::<LocalWallet>()
            .map_err(|e| WidgetError::Config(format!("Invalid private key: {}", e)))?;

        let mut keystore = Self::new();
        let address = keystore.insert(wallet);
        info!("Local keystore loaded account {:?}", address);
        Ok(keystore)
    }

    pub fn insert(&mut self, wallet: LocalWallet) -> Address {
        let address = wallet.address();
        self.wallets.insert(address, wallet);
        address
    }

    pub fn accounts(&self) -> Vec<Account> {
        self.wallets.keys().copied().map(Account::new).collect()
    }
}

#[async_trait]
impl Keystore for LocalKeystore {
    async fn sign(
        &self,
        tx: &UnsignedTransaction,
        account: &Account,
    ) -> Result<RawSignature, SigningError> {
        let wallet = self
            .wallets
            .get(&account.address())
            .ok_or(SigningError::UnknownAccount(account.address()))?;

        let signature = wallet
            .sign_hash(tx.signing_hash())
            .map_err(|e| SigningError::Backend(e.to_string()))?;

        let recovery_id = match signature.v {
            0 | 1 => signature.v as u8,
            27 | 28 => (signature.v - 27) as u8,
            v => {
                return Err(SigningError::Backend(format!(
                    "unexpected recovery value {}",
                    v
                )))
            }
        };

        Ok(RawSignature {
            r: signature.r,
            s: signature.s,
            recovery_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::{Bytes, Signature};

    const TEST_KEY: &str = "4646464646464646464646464646464646464646464646464646464646464646";

    fn eip155_example() -> UnsignedTransaction {
        UnsignedTransaction {
            fields: TransactionFields {
                nonce: 9,
                gas_price: U256::from(20_000_000_000u64),
                gas_limit: U256::from(21_000u64),
                to: Some(Address::repeat_byte(0x35)),
                value: U256::exp10(18),
                data: Bytes::default(),
            },
            chain_id: 1,
        }
    }

    #[tokio::test]
    async fn test_signature_recovers_signer() {
        let mut keystore = LocalKeystore::new();
        let address = keystore.insert(TEST_KEY.parse().unwrap());
        let tx = eip155_example();

        let raw = keystore.sign(&tx, &Account::new(address)).await.unwrap();
        assert!(raw.recovery_id <= 1);

        let signature = Signature {
            r: raw.r,
            s: raw.s,
            v: raw.recovery_id as u64 + 27,
        };
        assert_eq!(signature.recover(tx.signing_hash()).unwrap(), address);
    }

    #[tokio::test]
    async fn test_unknown_account() {
        let keystore = LocalKeystore::new();
        let err = keystore
            .sign(&eip155_example(), &Account::new(Address::repeat_byte(9)))
            .await
            .unwrap_err();
        assert_eq!(err, SigningError::UnknownAccount(Address::repeat_byte(9)));
    }

    #[test]
    fn test_from_env_missing_key() {
        assert!(matches!(
            LocalKeystore::from_env("KYBER_WIDGET_TEST_UNSET_KEY"),
            Err(WidgetError::Config(_))
        ));
    }

    #[test]
    fn test_from_env_loads_wallet() {
        std::env::set_var("KYBER_WIDGET_TEST_KEY", format!("0x{}", TEST_KEY));
        let keystore = LocalKeystore::from_env("KYBER_WIDGET_TEST_KEY").unwrap();
        assert_eq!(keystore.accounts().len(), 1);
    }
}
