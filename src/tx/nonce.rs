//! Nonce tracking for reliable transaction submission
//!
//! Handles:
//! - Lazy initialisation from the remote transaction count
//! - Reconciliation where the local floor always wins over a lagging node
//! - Per-account mutual exclusion across a whole approve + trade run

use crate::chain::EthRpc;
use crate::error::WidgetResult;

use dashmap::DashMap;
use ethers::types::Address;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

/// Per-account nonce state
#[derive(Debug, Default)]
struct NonceState {
    /// Next nonce to use; `None` until the first remote sync
    current: Option<u64>,
    /// Hash of the last broadcast that consumed a nonce
    last_tx_hash: Option<String>,
}

/// Manages nonces across accounts
#[derive(Default)]
pub struct NonceTracker {
    accounts: DashMap<Address, Arc<Mutex<NonceState>>>,
}

impl NonceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take exclusive ownership of an account's sequence
    ///
    /// Held for the duration of one intent so that a second intent for the
    /// same account cannot interleave between approval and trade.
    pub async fn lock(&self, address: Address) -> NonceGuard {
        let state = self
            .accounts
            .entry(address)
            .or_insert_with(|| Arc::new(Mutex::new(NonceState::default())))
            .clone();

        NonceGuard {
            address,
            state: state.lock_owned().await,
        }
    }

    /// Current local floor, if the account has been synced
    pub async fn peek(&self, address: Address) -> Option<u64> {
        let state = self.accounts.get(&address).map(|s| s.clone())?;
        let state = state.lock().await;
        state.current
    }
}

/// Exclusive handle on one account's nonce
pub struct NonceGuard {
    address: Address,
    state: OwnedMutexGuard<NonceState>,
}

impl NonceGuard {
    pub fn address(&self) -> Address {
        self.address
    }

    /// Reconcile with the node: `effective = max(local, remote)`
    pub async fn sync(&mut self, rpc: &dyn EthRpc) -> WidgetResult<u64> {
        let remote = rpc.transaction_count(self.address).await?;

        let effective = match self.state.current {
            Some(local) if local > remote => {
                warn!(
                    "Node reports nonce {} for {:?} below local floor {}, keeping local",
                    remote, self.address, local
                );
                local
            }
            Some(local) if remote > local => {
                debug!(
                    "Nonce for {:?} advanced remotely: {} -> {}",
                    self.address, local, remote
                );
                remote
            }
            _ => remote,
        };

        self.state.current = Some(effective);
        Ok(effective)
    }

    /// Nonce the next transaction must use
    pub fn current(&self) -> Option<u64> {
        self.state.current
    }

    /// Record a successful broadcast
    pub fn advance(&mut self, tx_hash: &str) -> u64 {
        let next = self.state.current.map_or(1, |n| n + 1);
        self.state.current = Some(next);
        self.state.last_tx_hash = Some(tx_hash.to_string());
        debug!("Nonce for {:?} advanced to {} after {}", self.address, next, tx_hash);
        next
    }

    pub fn last_tx_hash(&self) -> Option<&str> {
        self.state.last_tx_hash.as_deref()
    }
}
