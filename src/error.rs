//! Error types for the transaction construction and signing core

use ethers::types::{Address, U256};
use thiserror::Error;

/// Failure reported by a signing capability
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SigningError {
    #[error("No key material for account {0:?}")]
    UnknownAccount(Address),

    #[error("Key for account {0:?} is locked")]
    Locked(Address),

    #[error("Signer backend failed: {0}")]
    Backend(String),
}

/// Main error type for the widget core
#[derive(Error, Debug)]
pub enum WidgetError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Transport error on {method}: {message}")]
    Transport {
        method: &'static str,
        message: String,
    },

    #[error("Node rejected {method}: {message}")]
    Rpc {
        method: &'static str,
        message: String,
    },

    #[error("Failed to decode {what}: {message}")]
    Decode { what: &'static str, message: String },

    #[error("Signing failed: {0}")]
    Signing(#[from] SigningError),

    #[error("Invalid intent: {0}")]
    Validation(String),

    #[error("No liquidity for pair {from} -> {to}")]
    NoLiquidity { from: String, to: String },

    #[error("Insufficient balance: have {have}, need {need}")]
    InsufficientBalance { have: U256, need: U256 },

    #[error("Amount {amount} exceeds user cap {cap}")]
    ExceedsUserCap { amount: U256, cap: U256 },

    #[error("Account {0:?} is not allowed to pay")]
    NotWhitelisted(Address),

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse error taxonomy surfaced to the embedding application
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Transport,
    Decode,
    Signing,
    Validation,
    Fatal,
    Cancelled,
}

impl WidgetError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            WidgetError::Transport { .. } | WidgetError::Rpc { .. } => ErrorCategory::Transport,
            WidgetError::Decode { .. } => ErrorCategory::Decode,
            WidgetError::Signing(_) => ErrorCategory::Signing,
            WidgetError::Validation(_)
            | WidgetError::NoLiquidity { .. }
            | WidgetError::InsufficientBalance { .. }
            | WidgetError::ExceedsUserCap { .. }
            | WidgetError::NotWhitelisted(_) => ErrorCategory::Validation,
            WidgetError::Cancelled => ErrorCategory::Cancelled,
            WidgetError::Config(_) | WidgetError::Encoding(_) | WidgetError::Internal(_) => {
                ErrorCategory::Fatal
            }
        }
    }

    /// Check if the caller may simply resubmit the same intent later
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Transport | ErrorCategory::Decode | ErrorCategory::Cancelled
        )
    }

    pub(crate) fn transport(method: &'static str, err: impl std::fmt::Display) -> Self {
        WidgetError::Transport {
            method,
            message: err.to_string(),
        }
    }

    pub(crate) fn decode(what: &'static str, err: impl std::fmt::Display) -> Self {
        WidgetError::Decode {
            what,
            message: err.to_string(),
        }
    }
}

/// Result type for widget operations
pub type WidgetResult<T> = Result<T, WidgetError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories() {
        assert_eq!(
            WidgetError::transport("eth_call", "connection refused").category(),
            ErrorCategory::Transport
        );
        assert_eq!(
            WidgetError::Signing(SigningError::Locked(Address::zero())).category(),
            ErrorCategory::Signing
        );
        assert_eq!(
            WidgetError::Validation("zero amount".into()).category(),
            ErrorCategory::Validation
        );
        assert_eq!(
            WidgetError::Encoding("bad list".into()).category(),
            ErrorCategory::Fatal
        );
    }

    #[test]
    fn test_recoverable() {
        assert!(WidgetError::transport("eth_sendRawTransaction", "timeout").is_recoverable());
        assert!(WidgetError::decode("allowance", "odd length").is_recoverable());
        assert!(!WidgetError::Validation("zero min rate".into()).is_recoverable());
        assert!(!WidgetError::Signing(SigningError::Backend("hsm".into())).is_recoverable());
    }
}
