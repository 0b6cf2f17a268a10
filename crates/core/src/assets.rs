//! Tracked asset registry
//!
//! Static table of the assets the dashboard follows, with per-asset
//! fallback constants (approximate values, used when every upstream is
//! unreachable) and the exchange stream symbol each asset trades under.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::LazyLock;

use crate::AssetId;

/// Static per-asset data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetInfo {
    pub id: AssetId,
    pub name: String,
    /// Ticker symbol on the streaming exchange feed (e.g. "BTCUSDT")
    pub stream_symbol: String,
    pub fallback: FallbackQuote,
}

/// Last-resort quote constants for one asset
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FallbackQuote {
    pub price_usd: f64,
    pub change_24h_pct: f64,
    pub volume_24h_usd: f64,
    pub market_cap_usd: f64,
}

impl AssetInfo {
    fn new(
        id: &str,
        name: &str,
        stream_symbol: &str,
        fallback: FallbackQuote,
    ) -> Self {
        Self {
            id: AssetId::new(id),
            name: name.to_string(),
            stream_symbol: stream_symbol.to_string(),
            fallback,
        }
    }
}

/// The tracked assets, keyed by internal id
pub static ASSETS: LazyLock<HashMap<&'static str, AssetInfo>> = LazyLock::new(|| {
    let mut assets = HashMap::new();

    assets.insert("bitcoin", AssetInfo::new(
        "bitcoin", "Bitcoin", "BTCUSDT",
        FallbackQuote {
            price_usd: 89_800.0,
            change_24h_pct: 1.2,
            volume_24h_usd: 25_000_000_000.0,
            market_cap_usd: 1_780_000_000_000.0,
        },
    ));
    assets.insert("ethereum", AssetInfo::new(
        "ethereum", "Ethereum", "ETHUSDT",
        FallbackQuote {
            price_usd: 3_055.0,
            change_24h_pct: 0.8,
            volume_24h_usd: 12_000_000_000.0,
            market_cap_usd: 367_000_000_000.0,
        },
    ));
    assets.insert("solana", AssetInfo::new(
        "solana", "Solana", "SOLUSDT",
        FallbackQuote {
            price_usd: 127.0,
            change_24h_pct: 2.1,
            volume_24h_usd: 2_500_000_000.0,
            market_cap_usd: 55_000_000_000.0,
        },
    ));
    assets.insert("cardano", AssetInfo::new(
        "cardano", "Cardano", "ADAUSDT",
        FallbackQuote {
            price_usd: 0.375,
            change_24h_pct: -0.5,
            volume_24h_usd: 400_000_000.0,
            market_cap_usd: 13_500_000_000.0,
        },
    ));
    assets.insert("ripple", AssetInfo::new(
        "ripple", "XRP", "XRPUSDT",
        FallbackQuote {
            price_usd: 1.94,
            change_24h_pct: 0.3,
            volume_24h_usd: 1_800_000_000.0,
            market_cap_usd: 112_000_000_000.0,
        },
    ));

    assets
});

/// Get asset info by internal id
pub fn get_asset(id: &AssetId) -> Option<&'static AssetInfo> {
    ASSETS.get(id.as_str())
}

/// Map an exchange stream symbol back to an internal asset id
///
/// Symbols outside the tracked set map to None and are dropped by the
/// stream layer.
pub fn asset_for_stream_symbol(symbol: &str) -> Option<&'static AssetInfo> {
    ASSETS.values().find(|a| a.stream_symbol == symbol)
}

/// Fallback constants for an asset, or the generic default (bitcoin's)
/// when the id is unrecognized.
pub fn fallback_quote(id: &AssetId) -> FallbackQuote {
    get_asset(id)
        .map(|a| a.fallback)
        .unwrap_or_else(|| ASSETS["bitcoin"].fallback)
}

/// All tracked asset ids
pub fn tracked_assets() -> impl Iterator<Item = &'static AssetId> {
    ASSETS.values().map(|a| &a.id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_covers_tracked_set() {
        for id in ["bitcoin", "ethereum", "solana", "cardano", "ripple"] {
            assert!(get_asset(&AssetId::new(id)).is_some(), "{id} missing");
        }
        assert_eq!(ASSETS.len(), 5);
    }

    #[test]
    fn test_stream_symbol_mapping() {
        let btc = asset_for_stream_symbol("BTCUSDT").unwrap();
        assert_eq!(btc.id.as_str(), "bitcoin");

        let ada = asset_for_stream_symbol("ADAUSDT").unwrap();
        assert_eq!(ada.id.as_str(), "cardano");

        assert!(asset_for_stream_symbol("DOGEUSDT").is_none());
    }

    #[test]
    fn test_unknown_asset_gets_generic_default() {
        let quote = fallback_quote(&AssetId::new("dogecoin"));
        assert_eq!(quote.price_usd, ASSETS["bitcoin"].fallback.price_usd);
    }

    #[test]
    fn test_fallback_constants() {
        let eth = fallback_quote(&AssetId::new("ethereum"));
        assert_eq!(eth.price_usd, 3_055.0);
        assert_eq!(eth.change_24h_pct, 0.8);

        let ada = fallback_quote(&AssetId::new("cardano"));
        assert!(ada.change_24h_pct < 0.0);
    }
}
