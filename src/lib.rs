//! Kyber widget transaction core
//!
//! Builds, prices and signs the transactions behind the pay, swap and buy
//! widget: rate and amount resolution, gas policy, nonce tracking, allowance
//! approval, EIP-155 signing and the submission pipeline that drives them.

pub mod abi;
pub mod chain;
pub mod config;
pub mod error;
pub mod intent;
pub mod metrics;
pub mod pipeline;
pub mod rate;
pub mod tx;

#[cfg(test)]
mod testing;

pub use config::Settings;
pub use error::{WidgetError, WidgetResult};
pub use intent::{Account, IntentKind, Token, TransactionIntent};
pub use pipeline::{PipelineError, PipelineState, SubmissionPipeline, SubmissionReceipt, SubmissionRequest};
