//! Core type definitions

use serde::{Deserialize, Serialize};
use std::fmt;

/// Internal asset identifier ("bitcoin", "ethereum", ...)
///
/// Unrecognized ids are legal everywhere; the registry decides what
/// fallback data an unknown asset gets.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetId(String);

impl AssetId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AssetId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for AssetId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// How a snapshot's data was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Fresh data from the upstream quote API
    Live,
    /// A previously fetched snapshot served past its freshness window
    StaleCache,
    /// Synthesized from static per-asset constants
    Fallback,
    /// Synthesized after an internal error, from generic defaults
    ErrorFallback,
}

impl Provenance {
    pub fn name(&self) -> &'static str {
        match self {
            Provenance::Live => "live",
            Provenance::StaleCache => "stale_cache",
            Provenance::Fallback => "fallback",
            Provenance::ErrorFallback => "error_fallback",
        }
    }

    /// True when the data did not come from a live upstream response
    pub fn is_synthetic(&self) -> bool {
        matches!(self, Provenance::Fallback | Provenance::ErrorFallback)
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Point-in-time price record with provenance tracking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSnapshot {
    pub asset: AssetId,
    pub price_usd: f64,
    pub change_24h_pct: f64,
    pub volume_24h_usd: f64,
    pub market_cap_usd: f64,
    /// Daily closes, oldest first
    pub historical_series: Vec<f64>,
    pub fetched_at_ms: i64,
    pub provenance: Provenance,
}

impl PriceSnapshot {
    pub fn age_ms(&self, now_ms: i64) -> i64 {
        now_ms.saturating_sub(self.fetched_at_ms)
    }

    /// Structural validity: non-negative price and, for synthetic data,
    /// a series anchored to the current price.
    pub fn is_valid(&self) -> bool {
        if self.price_usd < 0.0 {
            return false;
        }
        if self.provenance.is_synthetic() {
            match self.historical_series.last() {
                Some(last) => (last - self.price_usd).abs() < f64::EPSILON,
                None => false,
            }
        } else {
            true
        }
    }
}

/// Normalized tick from the streaming ticker feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamTick {
    pub asset: AssetId,
    pub price_usd: f64,
    pub change_24h_pct: f64,
    pub ts_ms: i64,
}

/// Stream connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Terminal: reconnect budget exhausted, no further attempts
    Errored,
}

impl ConnectionState {
    pub fn name(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Errored => "errored",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Errored)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provenance_serde_is_snake_case() {
        let json = serde_json::to_string(&Provenance::StaleCache).unwrap();
        assert_eq!(json, "\"stale_cache\"");

        let back: Provenance = serde_json::from_str("\"error_fallback\"").unwrap();
        assert_eq!(back, Provenance::ErrorFallback);
    }

    #[test]
    fn test_synthetic_snapshot_must_anchor_series() {
        let mut snapshot = PriceSnapshot {
            asset: "bitcoin".into(),
            price_usd: 50_000.0,
            change_24h_pct: 1.0,
            volume_24h_usd: 1e9,
            market_cap_usd: 1e12,
            historical_series: vec![49_000.0, 50_000.0],
            fetched_at_ms: 0,
            provenance: Provenance::Fallback,
        };
        assert!(snapshot.is_valid());

        snapshot.historical_series = vec![49_000.0, 48_000.0];
        assert!(!snapshot.is_valid());

        // Live snapshots are not required to anchor
        snapshot.provenance = Provenance::Live;
        assert!(snapshot.is_valid());
    }

    #[test]
    fn test_negative_price_is_invalid() {
        let snapshot = PriceSnapshot {
            asset: "bitcoin".into(),
            price_usd: -1.0,
            change_24h_pct: 0.0,
            volume_24h_usd: 0.0,
            market_cap_usd: 0.0,
            historical_series: vec![],
            fetched_at_ms: 0,
            provenance: Provenance::Live,
        };
        assert!(!snapshot.is_valid());
    }
}
