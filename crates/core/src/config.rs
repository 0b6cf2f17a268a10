//! Configuration types

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Snapshot fetcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetcherConfig {
    /// Max age before a cached snapshot is refetched
    #[serde(with = "duration_ms")]
    pub freshness_window: Duration,
    /// Retry budget for the quote call
    pub quote_retries: u32,
    /// Retry budget for the history call
    pub history_retries: u32,
    /// First backoff delay; doubles each attempt
    #[serde(with = "duration_ms")]
    pub retry_base_delay: Duration,
    /// Daily volatility of the synthetic fallback series
    pub fallback_volatility: f64,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            freshness_window: Duration::from_secs(30),
            quote_retries: 2,
            history_retries: 1,
            retry_base_delay: Duration::from_millis(500),
            fallback_volatility: 0.02,
        }
    }
}

/// Stream reconnection manager configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    pub ws_url: String,
    /// Reconnect budget before the manager goes terminal
    pub max_reconnect_attempts: u32,
    /// First reconnect delay; doubles each attempt
    #[serde(with = "duration_ms")]
    pub reconnect_base_delay: Duration,
    /// Pause between the stop and restart of a forced reconnect
    #[serde(with = "duration_ms")]
    pub force_reconnect_delay: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            ws_url: "wss://stream.binance.com:9443/ws/!ticker@arr".to_string(),
            max_reconnect_attempts: 5,
            reconnect_base_delay: Duration::from_millis(3000),
            force_reconnect_delay: Duration::from_millis(1000),
        }
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let ms = u64::deserialize(d)?;
        Ok(Duration::from_millis(ms))
    }
}
