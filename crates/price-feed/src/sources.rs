//! Upstream price source adapters
//!
//! Each adapter maps one provider's REST shapes onto the internal quote
//! and history contracts. The fetcher consults adapters as a ranked list,
//! highest priority first.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::debug;

use cryptodash_core::{AssetId, FetchError, FetchResult};

/// Current price and 24h stats for one asset
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuoteData {
    pub price_usd: f64,
    pub change_24h_pct: f64,
    pub volume_24h_usd: f64,
    pub market_cap_usd: f64,
}

/// Source of current quotes
#[async_trait]
pub trait QuoteSource: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch_quote(&self, asset: &AssetId) -> FetchResult<QuoteData>;
}

/// Source of daily price history (oldest first)
#[async_trait]
pub trait HistorySource: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch_history(&self, asset: &AssetId, window_days: u32) -> FetchResult<Vec<f64>>;
}

/// CoinGecko-shaped REST adapter (the primary source)
#[derive(Debug, Clone)]
pub struct CoinGeckoSource {
    client: reqwest::Client,
    base_url: String,
}

pub const COINGECKO_API: &str = "https://api.coingecko.com/api/v3";

/// Quote response entry: `{ "<id>": { usd, usd_24h_change, ... } }`
///
/// Missing numeric fields default to zero, matching what the dashboard
/// tolerates from this provider.
#[derive(Debug, Deserialize)]
struct QuoteEntry {
    usd: Option<f64>,
    usd_24h_change: Option<f64>,
    usd_24h_vol: Option<f64>,
    usd_market_cap: Option<f64>,
}

/// History response: `{ "prices": [[ts_ms, price], ...] }`
#[derive(Debug, Deserialize)]
struct HistoryResponse {
    prices: Vec<(i64, f64)>,
}

impl CoinGeckoSource {
    pub fn new() -> Self {
        Self::with_base_url(COINGECKO_API)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    async fn get(&self, url: &str) -> FetchResult<reqwest::Response> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(FetchError::RateLimited);
        }
        if !status.is_success() {
            return Err(FetchError::Unavailable(format!("status {status}")));
        }

        Ok(response)
    }
}

impl Default for CoinGeckoSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QuoteSource for CoinGeckoSource {
    fn name(&self) -> &str {
        "coingecko"
    }

    async fn fetch_quote(&self, asset: &AssetId) -> FetchResult<QuoteData> {
        let url = format!(
            "{}/simple/price?ids={}&vs_currencies=usd&include_24hr_change=true\
             &include_24hr_vol=true&include_market_cap=true",
            self.base_url, asset
        );

        let response = self.get(&url).await?;
        let body: HashMap<String, QuoteEntry> = response
            .json()
            .await
            .map_err(|e| FetchError::MalformedResponse(e.to_string()))?;

        let entry = body.get(asset.as_str()).ok_or(FetchError::NoData)?;
        debug!(asset = %asset, "quote fetched");

        Ok(QuoteData {
            price_usd: entry.usd.unwrap_or(0.0),
            change_24h_pct: entry.usd_24h_change.unwrap_or(0.0),
            volume_24h_usd: entry.usd_24h_vol.unwrap_or(0.0),
            market_cap_usd: entry.usd_market_cap.unwrap_or(0.0),
        })
    }
}

#[async_trait]
impl HistorySource for CoinGeckoSource {
    fn name(&self) -> &str {
        "coingecko"
    }

    async fn fetch_history(&self, asset: &AssetId, window_days: u32) -> FetchResult<Vec<f64>> {
        let url = format!(
            "{}/coins/{}/market_chart?vs_currency=usd&days={}&interval=daily",
            self.base_url, asset, window_days
        );

        let response = self.get(&url).await?;
        let body: HistoryResponse = response
            .json()
            .await
            .map_err(|e| FetchError::MalformedResponse(e.to_string()))?;

        debug!(asset = %asset, points = body.prices.len(), "history fetched");
        Ok(body.prices.into_iter().map(|(_, price)| price).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_response_shape() {
        let json = r#"{
            "bitcoin": {
                "usd": 50000.0,
                "usd_24h_change": 2.5,
                "usd_24h_vol": 1e9,
                "usd_market_cap": 1e12
            }
        }"#;
        let body: HashMap<String, QuoteEntry> = serde_json::from_str(json).unwrap();
        let entry = body.get("bitcoin").unwrap();
        assert_eq!(entry.usd, Some(50_000.0));
        assert_eq!(entry.usd_24h_change, Some(2.5));
    }

    #[test]
    fn test_quote_entry_tolerates_missing_fields() {
        let json = r#"{ "bitcoin": { "usd": 50000.0 } }"#;
        let body: HashMap<String, QuoteEntry> = serde_json::from_str(json).unwrap();
        let entry = body.get("bitcoin").unwrap();
        assert_eq!(entry.usd_24h_vol, None);
    }

    #[test]
    fn test_history_response_shape() {
        let json = r#"{ "prices": [[1700000000000, 49000.0], [1700086400000, 50000.0]] }"#;
        let body: HistoryResponse = serde_json::from_str(json).unwrap();
        let series: Vec<f64> = body.prices.into_iter().map(|(_, p)| p).collect();
        assert_eq!(series, vec![49_000.0, 50_000.0]);
    }
}
