//! Error types
//!
//! Both taxonomies stay inside the price-feed subsystem: fetch errors are
//! absorbed by the fallback tiers, stream errors surface only as
//! connection-state transitions.

use thiserror::Error;

/// Snapshot fetch errors
#[derive(Debug, Error)]
pub enum FetchError {
    /// HTTP 429 from upstream; always worth a retry
    #[error("Upstream rate limited")]
    RateLimited,

    /// Network failure or non-2xx status; retryable while attempts remain
    #[error("Upstream unavailable: {0}")]
    Unavailable(String),

    /// Body did not parse into the expected shape
    #[error("Malformed upstream response: {0}")]
    MalformedResponse(String),

    /// Upstream answered but had nothing for this asset
    #[error("No data available for asset")]
    NoData,
}

impl FetchError {
    /// Whether a retry can possibly help for this attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::RateLimited | FetchError::Unavailable(_))
    }
}

/// Stream connection errors
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("WebSocket connection failed: {0}")]
    ConnectFailed(String),

    #[error("Invalid message format: {0}")]
    InvalidMessage(String),

    #[error("Stream closed by remote")]
    Closed,
}

pub type FetchResult<T> = Result<T, FetchError>;
pub type StreamResult<T> = Result<T, StreamError>;
