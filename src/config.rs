//! Configuration management for the widget core
//!
//! Loads configuration from TOML files with environment variable substitution.

use crate::intent::IntentKind;
use crate::tx::GasTier;

use anyhow::{Context, Result};
use ethers::types::Address;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub network: NetworkConfig,
    #[serde(default)]
    pub gas: GasConfig,
    #[serde(default)]
    pub slippage: SlippageConfig,
    #[serde(default)]
    pub wallet: WalletConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Intent submitted by the binary
    pub intent: Option<IntentConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    pub chain_id: u64,
    pub rpc_urls: Vec<String>,
    /// Liquidity protocol proxy; spender for `trade` allowances
    pub network_proxy: Address,
    /// Optional pay wrapper contract used for pay intents
    pub pay_wrapper: Option<Address>,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GasConfig {
    #[serde(default = "default_gas_cache_url")]
    pub cache_url: String,
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
    #[serde(default = "default_slow_gwei")]
    pub slow_gwei: u64,
    #[serde(default = "default_medium_gwei")]
    pub medium_gwei: u64,
    #[serde(default = "default_fast_gwei")]
    pub fast_gwei: u64,
    #[serde(default = "default_max_gwei")]
    pub max_gwei: u64,
    #[serde(default = "default_limit_buffer_percent")]
    pub limit_buffer_percent: u64,
    #[serde(default)]
    pub limits: GasLimitConfig,
    /// Token address -> gas ceiling for tokens with expensive transfer logic
    #[serde(default)]
    pub token_limits: HashMap<String, u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GasLimitConfig {
    #[serde(default = "default_native_transfer_limit")]
    pub native_transfer: u64,
    #[serde(default = "default_token_transfer_limit")]
    pub token_transfer: u64,
    #[serde(default = "default_wrapped_pay_limit")]
    pub wrapped_pay: u64,
    #[serde(default = "default_exchange_limit")]
    pub exchange: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SlippageConfig {
    #[serde(default = "default_slippage_percent")]
    pub default_percent: u32,
    #[serde(default = "default_max_pay_percent")]
    pub max_pay_percent: u32,
    #[serde(default = "default_max_other_percent")]
    pub max_other_percent: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WalletConfig {
    /// Environment variable holding a hex private key for the local keystore
    pub private_key_env: Option<String>,
    /// Addresses allowed to pay; empty means anyone
    #[serde(default)]
    pub signer_whitelist: Vec<Address>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ValidationConfig {
    #[serde(default = "default_min_native_amount_wei")]
    pub min_native_amount_wei: u128,
    #[serde(default)]
    pub enforce_user_cap: bool,
    #[serde(default = "default_true")]
    pub check_balance: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub json: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfig {
    pub address: Address,
    pub decimals: u32,
    pub symbol: String,
}

/// Declarative intent for the command line binary
#[derive(Debug, Clone, Deserialize)]
pub struct IntentConfig {
    pub kind: IntentKind,
    pub from: TokenConfig,
    pub to: TokenConfig,
    #[serde(default)]
    pub destination_wallet: String,
    /// Human readable amount, e.g. "1.5"
    pub amount_from: String,
    pub amount_to: Option<String>,
    pub slippage_percent: Option<u32>,
    #[serde(default)]
    pub gas_tier: GasTier,
    pub custom_gas_price_gwei: Option<String>,
    pub commission_id: Option<Address>,
    /// Hex encoded payment reference forwarded to the pay wrapper
    pub payment_data: Option<String>,
}

impl Default for GasConfig {
    fn default() -> Self {
        Self {
            cache_url: default_gas_cache_url(),
            refresh_interval_secs: default_refresh_interval_secs(),
            slow_gwei: default_slow_gwei(),
            medium_gwei: default_medium_gwei(),
            fast_gwei: default_fast_gwei(),
            max_gwei: default_max_gwei(),
            limit_buffer_percent: default_limit_buffer_percent(),
            limits: GasLimitConfig::default(),
            token_limits: HashMap::new(),
        }
    }
}

impl Default for GasLimitConfig {
    fn default() -> Self {
        Self {
            native_transfer: default_native_transfer_limit(),
            token_transfer: default_token_transfer_limit(),
            wrapped_pay: default_wrapped_pay_limit(),
            exchange: default_exchange_limit(),
        }
    }
}

impl Default for SlippageConfig {
    fn default() -> Self {
        Self {
            default_percent: default_slippage_percent(),
            max_pay_percent: default_max_pay_percent(),
            max_other_percent: default_max_other_percent(),
        }
    }
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            min_native_amount_wei: default_min_native_amount_wei(),
            enforce_user_cap: false,
            check_balance: true,
        }
    }
}

fn default_request_timeout_ms() -> u64 {
    15_000
}
fn default_gas_cache_url() -> String {
    "https://production-cache.kyber.network".to_string()
}
fn default_refresh_interval_secs() -> u64 {
    30
}
fn default_slow_gwei() -> u64 {
    5
}
fn default_medium_gwei() -> u64 {
    10
}
fn default_fast_gwei() -> u64 {
    15
}
fn default_max_gwei() -> u64 {
    50
}
fn default_limit_buffer_percent() -> u64 {
    20
}
fn default_native_transfer_limit() -> u64 {
    21_000
}
fn default_token_transfer_limit() -> u64 {
    60_000
}
fn default_wrapped_pay_limit() -> u64 {
    350_000
}
fn default_exchange_limit() -> u64 {
    700_000
}
fn default_slippage_percent() -> u32 {
    3
}
fn default_max_pay_percent() -> u32 {
    90
}
fn default_max_other_percent() -> u32 {
    100
}
fn default_min_native_amount_wei() -> u128 {
    1_000_000_000_000_000
}
fn default_true() -> bool {
    true
}

impl Settings {
    /// Load settings from the configured file
    pub fn load() -> Result<Self> {
        let config_path = env::var("KYBER_WIDGET_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        Self::load_from(&config_path)
    }

    /// Load settings from a specific file
    pub fn load_from(path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        Self::from_toml_str(&config_str)
    }

    /// Parse settings from TOML text, substituting `${VAR}` references
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config_str = substitute_env_vars(input);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.network.rpc_urls.is_empty() {
            anyhow::bail!("At least one RPC URL must be configured");
        }
        if self.network.network_proxy.is_zero() {
            anyhow::bail!("Network proxy address must be set");
        }

        let gas = &self.gas;
        if !(gas.slow_gwei <= gas.medium_gwei
            && gas.medium_gwei <= gas.fast_gwei
            && gas.fast_gwei <= gas.max_gwei)
        {
            anyhow::bail!("Gas tiers must satisfy slow <= medium <= fast <= max");
        }
        if gas.refresh_interval_secs == 0 {
            anyhow::bail!("Gas refresh interval must be positive");
        }
        for token in gas.token_limits.keys() {
            token
                .parse::<Address>()
                .with_context(|| format!("Invalid token address in gas.token_limits: {}", token))?;
        }

        let slippage = &self.slippage;
        if slippage.max_pay_percent > 100 || slippage.max_other_percent > 100 {
            anyhow::bail!("Slippage ceilings cannot exceed 100%");
        }
        if slippage.default_percent > slippage.max_pay_percent.min(slippage.max_other_percent) {
            anyhow::bail!(
                "Default slippage {}% exceeds a configured ceiling",
                slippage.default_percent
            );
        }

        if self.intent.as_ref().map(|i| i.kind) == Some(IntentKind::Pay)
            && self.network.pay_wrapper.is_none()
        {
            tracing::warn!("Pay intent configured without a pay wrapper - will use trade()");
        }

        Ok(())
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    let mut result = input.to_string();
    let re = regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("static pattern");

    for cap in re.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}
