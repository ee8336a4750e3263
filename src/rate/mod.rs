//! Rate and amount resolution
//!
//! Pure arithmetic lives here; [`RateResolver`] performs the remote reads.

mod resolver;

pub use resolver::{require_liquidity, RateResolver};

use crate::config::SlippageConfig;
use crate::error::{WidgetError, WidgetResult};
use crate::intent::{IntentKind, Token};

use ethers::types::{U256, U512};

/// Rates for one `(from, to, amount)` triple, scaled by `to.decimals`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateQuote {
    pub expected_rate: U256,
    pub slippage_rate: U256,
}

impl RateQuote {
    /// `from == to` always converts one-to-one
    pub fn identity(to: &Token) -> Self {
        Self {
            expected_rate: to.unit(),
            slippage_rate: to.unit(),
        }
    }

    pub fn has_liquidity(&self) -> bool {
        !self.expected_rate.is_zero()
    }
}

/// Slippage tolerance policy; the numbers are product decisions, kept in config
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlippagePolicy {
    pub default_percent: u32,
    pub max_pay_percent: u32,
    pub max_other_percent: u32,
}

impl SlippagePolicy {
    pub fn from_config(config: &SlippageConfig) -> Self {
        Self {
            default_percent: config.default_percent,
            max_pay_percent: config.max_pay_percent,
            max_other_percent: config.max_other_percent,
        }
    }

    pub fn ceiling(&self, kind: IntentKind) -> u32 {
        match kind {
            IntentKind::Pay => self.max_pay_percent,
            IntentKind::Swap | IntentKind::Buy => self.max_other_percent,
        }
    }

    /// The tolerance to apply, rejecting values above the intent's ceiling
    pub fn resolve(&self, kind: IntentKind, requested: Option<u32>) -> WidgetResult<u32> {
        let percent = requested.unwrap_or(self.default_percent);
        let ceiling = self.ceiling(kind);
        if percent > ceiling {
            return Err(WidgetError::Validation(format!(
                "slippage {}% exceeds the {}% limit for {} intents",
                percent, ceiling, kind
            )));
        }
        Ok(percent)
    }
}

impl Default for SlippagePolicy {
    fn default() -> Self {
        Self::from_config(&SlippageConfig::default())
    }
}

/// `expected × (100 − percent) / 100`, rounding down
pub fn min_rate(expected_rate: U256, percent: u32) -> U256 {
    let keep = 100u32.saturating_sub(percent);
    expected_rate * keep / 100
}

/// Express the protocol's slippage rate as a whole-percent haircut of `expected`
///
/// A haircut that rounds to 0% is replaced by `100 − fallback_percent`.
pub fn normalize_slippage_rate(expected_rate: U256, slippage_rate: U256, fallback_percent: u32) -> U256 {
    if expected_rate.is_zero() {
        return U256::zero();
    }
    let mut percent = slippage_rate.saturating_mul(U256::from(100u64)) / expected_rate;
    if percent.is_zero() {
        percent = U256::from(100u32.saturating_sub(fallback_percent));
    }
    expected_rate.saturating_mul(percent) / 100
}

/// `amount × rate / from.unit()`, the received amount at `rate`
///
/// Saturates at `U256::MAX`.
pub fn convert_amount(amount: U256, from: &Token, rate: U256) -> U256 {
    let quotient = amount.full_mul(rate) / U512::from(from.unit());
    U256::try_from(quotient).unwrap_or(U256::MAX)
}

/// Amount of `from` to authorise when the received amount is fixed
///
/// Divides by the floor rate so adverse slippage cannot starve the trade. A
/// zero floor falls back to `max(original, balance)`.
pub fn resolve_amount_from(
    amount_to: U256,
    from: &Token,
    min_rate: U256,
    original_amount_from: U256,
    balance: U256,
) -> WidgetResult<U256> {
    if min_rate.is_zero() {
        return Ok(original_amount_from.max(balance));
    }

    let numerator = amount_to.full_mul(from.unit());
    let quotient = numerator / U512::from(min_rate);
    U256::try_from(quotient).map_err(|_| {
        WidgetError::Validation(format!(
            "resolved amount for {} overflows 256 bits",
            from.symbol()
        ))
    })
}
