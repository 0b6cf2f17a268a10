//! Price feed core for the cryptodash dashboard
//!
//! Features:
//! - Pull: cached snapshot fetches with retry/backoff and fallback tiers
//! - Push: reconnecting WebSocket ticker stream with a bounded budget
//! - Ranked upstream source adapters behind trait seams
//! - Provenance tagging so consumers can render live vs fallback data

pub mod cache;
pub mod fetcher;
pub mod reconnect;
pub mod sources;
pub mod stream;

pub use cache::{CacheEntry, CacheKey, SnapshotCache};
pub use fetcher::PriceFetcher;
pub use sources::{CoinGeckoSource, HistorySource, QuoteSource};
pub use stream::{StreamConnection, StreamConnector, StreamManager};
