//! Snapshot fetcher - coordinates sources, cache and fallback tiers
//!
//! `get_price_snapshot` is the pull side of the subsystem and never fails:
//! fresh cache, then live upstream with retry/backoff, then stale cache,
//! then a synthetic snapshot built from static fallback constants.

use futures::FutureExt;
use rand::Rng;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};

use cryptodash_core::{
    fallback_quote, AssetId, FetchError, FetchResult, FetcherConfig, PriceSnapshot, Provenance,
};

use crate::cache::{CacheKey, SnapshotCache};
use crate::sources::{HistorySource, QuoteData, QuoteSource};

/// Pull-side entry point of the price core
pub struct PriceFetcher {
    config: FetcherConfig,
    cache: Arc<SnapshotCache>,
    quote_sources: Vec<Arc<dyn QuoteSource>>,
    history_sources: Vec<Arc<dyn HistorySource>>,
}

impl PriceFetcher {
    pub fn new(config: FetcherConfig, cache: Arc<SnapshotCache>) -> Self {
        Self {
            config,
            cache,
            quote_sources: vec![],
            history_sources: vec![],
        }
    }

    /// Append a quote source; sources are consulted in registration order
    pub fn with_quote_source(mut self, source: Arc<dyn QuoteSource>) -> Self {
        self.quote_sources.push(source);
        self
    }

    /// Append a history source; sources are consulted in registration order
    pub fn with_history_source(mut self, source: Arc<dyn HistorySource>) -> Self {
        self.history_sources.push(source);
        self
    }

    pub fn cache(&self) -> Arc<SnapshotCache> {
        Arc::clone(&self.cache)
    }

    /// Get a snapshot for the asset over the requested window
    ///
    /// Always returns a structurally valid snapshot; every failure tier is
    /// absorbed here and surfaces only through the provenance tag.
    pub async fn get_price_snapshot(&self, asset: &AssetId, window_days: u32) -> PriceSnapshot {
        match AssertUnwindSafe(self.snapshot_inner(asset, window_days))
            .catch_unwind()
            .await
        {
            Ok(snapshot) => snapshot,
            Err(_) => {
                error!(%asset, "snapshot path panicked, serving error fallback");
                self.error_fallback_snapshot(asset, window_days)
            }
        }
    }

    async fn snapshot_inner(&self, asset: &AssetId, window_days: u32) -> PriceSnapshot {
        let key = CacheKey::new(asset.clone(), window_days);

        // At most one upstream call per key per freshness window
        if let Some(entry) = self.cache.get(&key) {
            if entry.is_fresh(self.config.freshness_window) {
                return entry.snapshot;
            }
        }

        match self.fetch_quote_ranked(asset).await {
            Ok(quote) => {
                let series = match self.fetch_history_ranked(asset, window_days).await {
                    Ok(series) => series,
                    Err(e) => {
                        warn!(%asset, "history unavailable, serving quote without series: {e}");
                        Vec::new()
                    }
                };

                let snapshot = PriceSnapshot {
                    asset: asset.clone(),
                    price_usd: quote.price_usd,
                    change_24h_pct: quote.change_24h_pct,
                    volume_24h_usd: quote.volume_24h_usd,
                    market_cap_usd: quote.market_cap_usd,
                    historical_series: series,
                    fetched_at_ms: chrono::Utc::now().timestamp_millis(),
                    provenance: Provenance::Live,
                };

                info!(
                    %asset,
                    price = snapshot.price_usd,
                    points = snapshot.historical_series.len(),
                    "live snapshot fetched"
                );
                self.cache.put(key, snapshot.clone());
                snapshot
            }
            Err(e) => {
                // Any prior success beats failing the caller, however stale
                if let Some(entry) = self.cache.get(&key) {
                    warn!(%asset, "quote failed, serving stale cache: {e}");
                    let mut snapshot = entry.snapshot;
                    snapshot.provenance = Provenance::StaleCache;
                    return snapshot;
                }

                warn!(%asset, "quote failed with no cache, synthesizing fallback: {e}");
                let snapshot = self.fallback_snapshot(asset, window_days, Provenance::Fallback);

                // Cache the synthesis so calls within the window are stable
                self.cache.put(key, snapshot.clone());
                snapshot
            }
        }
    }

    async fn fetch_quote_ranked(&self, asset: &AssetId) -> FetchResult<QuoteData> {
        let mut last_err = FetchError::NoData;

        for source in &self.quote_sources {
            let result = retry_with_backoff(
                self.config.quote_retries,
                self.config.retry_base_delay,
                || source.fetch_quote(asset),
            )
            .await;

            match result {
                Ok(quote) => return Ok(quote),
                Err(e) => {
                    warn!(source = source.name(), %asset, "quote source failed: {e}");
                    last_err = e;
                }
            }
        }

        Err(last_err)
    }

    async fn fetch_history_ranked(
        &self,
        asset: &AssetId,
        window_days: u32,
    ) -> FetchResult<Vec<f64>> {
        let mut last_err = FetchError::NoData;

        for source in &self.history_sources {
            let result = retry_with_backoff(
                self.config.history_retries,
                self.config.retry_base_delay,
                || source.fetch_history(asset, window_days),
            )
            .await;

            match result {
                Ok(series) => return Ok(series),
                Err(e) => {
                    warn!(source = source.name(), %asset, "history source failed: {e}");
                    last_err = e;
                }
            }
        }

        Err(last_err)
    }

    /// Synthesize a snapshot from static constants for the asset
    /// (generic defaults when the asset is unrecognized).
    fn fallback_snapshot(
        &self,
        asset: &AssetId,
        window_days: u32,
        provenance: Provenance,
    ) -> PriceSnapshot {
        let quote = fallback_quote(asset);

        PriceSnapshot {
            asset: asset.clone(),
            price_usd: quote.price_usd,
            change_24h_pct: quote.change_24h_pct,
            volume_24h_usd: quote.volume_24h_usd,
            market_cap_usd: quote.market_cap_usd,
            historical_series: synthetic_series(
                quote.price_usd,
                window_days,
                self.config.fallback_volatility,
            ),
            fetched_at_ms: chrono::Utc::now().timestamp_millis(),
            provenance,
        }
    }

    /// Catch-all snapshot for the consumer boundary (e.g. a panicked
    /// fetch task): synthetic data tagged `error_fallback`.
    pub fn error_fallback_snapshot(&self, asset: &AssetId, window_days: u32) -> PriceSnapshot {
        self.fallback_snapshot(asset, window_days, Provenance::ErrorFallback)
    }
}

/// Retry a call with exponential backoff
///
/// `retries` is the number of retries after the initial attempt. A 429
/// (rate limit) or availability failure is retried while attempts remain;
/// malformed responses and missing data abort the source immediately.
async fn retry_with_backoff<T, Fut, F>(
    retries: u32,
    base_delay: Duration,
    mut call: F,
) -> FetchResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = FetchResult<T>>,
{
    let mut attempt = 0;
    let mut delay = base_delay;

    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < retries => {
                attempt += 1;
                warn!("attempt {attempt}/{retries} failed ({e}), retrying in {delay:?}");
                sleep(delay).await;
                delay *= 2;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Random-walk series anchored to the current price
///
/// Starts 5% below current, steps with the configured daily volatility,
/// floors each step at 90% of the prior price, and forces the final point
/// to the current price. `window_days + 1` points for inclusive bounds.
pub fn synthetic_series(current_price: f64, window_days: u32, volatility: f64) -> Vec<f64> {
    let mut rng = rand::thread_rng();
    let mut prices = Vec::with_capacity(window_days as usize + 1);
    let mut price = current_price * 0.95;

    for _ in 0..=window_days {
        prices.push(price);
        let step = (rng.gen::<f64>() - 0.45) * volatility * price;
        price = (price + step).max(price * 0.9);
    }

    if let Some(last) = prices.last_mut() {
        *last = current_price;
    }
    prices
}
