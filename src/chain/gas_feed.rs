//! Client for the remote gas price cache

use crate::error::{WidgetError, WidgetResult};

use async_trait::async_trait;
use ethers::types::U256;
use ethers::utils::parse_units;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Tier prices reported by the cache; a missing field keeps the previous value
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GasPriceQuote {
    pub low: Option<U256>,
    pub standard: Option<U256>,
    pub fast: Option<U256>,
}

/// Source of fresh gas prices
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GasPriceFeed: Send + Sync {
    async fn fetch_prices(&self) -> WidgetResult<GasPriceQuote>;

    /// Current hard ceiling for any gas price
    async fn fetch_max_price(&self) -> WidgetResult<U256>;
}

#[derive(Debug, Deserialize)]
struct PriceEnvelope {
    data: PriceData,
}

#[derive(Debug, Deserialize)]
struct PriceData {
    low: Option<serde_json::Value>,
    standard: Option<serde_json::Value>,
    fast: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct MaxPriceEnvelope {
    data: serde_json::Value,
}

/// Gas feed backed by the HTTP cache (`/getGasPrice`, `/getMaxGasPrice`)
pub struct HttpGasFeed {
    client: reqwest::Client,
    base_url: String,
}

impl HttpGasFeed {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> WidgetResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| WidgetError::Config(format!("gas feed client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &'static str,
    ) -> WidgetResult<T> {
        let url = format!("{}{}", self.base_url, path);
        debug!(%url, "fetching gas cache");

        let response = self
            .client
            .get(&url)
            .header("content-type", "application/json")
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| WidgetError::transport(path, e))?;

        response
            .json::<T>()
            .await
            .map_err(|e| WidgetError::decode(path, e))
    }
}

#[async_trait]
impl GasPriceFeed for HttpGasFeed {
    async fn fetch_prices(&self) -> WidgetResult<GasPriceQuote> {
        let envelope: PriceEnvelope = self.get_json("/getGasPrice").await?;
        let data = envelope.data;

        Ok(GasPriceQuote {
            low: data.low.as_ref().and_then(gwei_value),
            standard: data.standard.as_ref().and_then(gwei_value),
            fast: data.fast.as_ref().and_then(gwei_value),
        })
    }

    async fn fetch_max_price(&self) -> WidgetResult<U256> {
        let envelope: MaxPriceEnvelope = self.get_json("/getMaxGasPrice").await?;
        gwei_value(&envelope.data)
            .ok_or_else(|| WidgetError::decode("/getMaxGasPrice", "unparseable max price"))
    }
}

/// The cache reports gwei either as a decimal string or as a bare number
fn gwei_value(value: &serde_json::Value) -> Option<U256> {
    match value {
        serde_json::Value::String(s) => parse_gwei(s),
        serde_json::Value::Number(n) => parse_gwei(&n.to_string()),
        _ => None,
    }
}

/// Convert a decimal gwei string such as `"12.5"` into wei
pub fn parse_gwei(value: &str) -> Option<U256> {
    parse_units(value.trim(), "gwei").ok().map(U256::from)
}
