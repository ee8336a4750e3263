//! Transaction construction: gas policy, nonce tracking, encoding and signing

mod builder;
mod gas;
mod nonce;
pub mod rlp;
mod signer;

pub use builder::{eip155_v, CallShape, ContractAddresses, SignedTransaction, TransactionBuilder};
pub use gas::{
    GasLimitPolicy, GasLimitTable, GasPriceCache, GasPriceSelection, GasTier, GasTiers,
    OperationCategory,
};
pub use nonce::{NonceGuard, NonceTracker};
pub use signer::{Keystore, LocalKeystore, RawSignature, UnsignedTransaction};

#[cfg(test)]
pub use signer::MockKeystore;
