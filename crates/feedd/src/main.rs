//! Cryptodash feed daemon
//!
//! Runs the streaming ticker connection and serves as a reference consumer
//! of the price core: ticks are logged as they arrive, and once the stream
//! exhausts its reconnect budget the daemon falls back to polling
//! snapshots through the fetcher.

use std::env;
use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use cryptodash_core::{tracked_assets, ConnectionState, FetcherConfig, StreamConfig};
use cryptodash_price_feed::{CoinGeckoSource, PriceFetcher, SnapshotCache, StreamManager};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    info!("Starting cryptodash feedd v{}", env!("CARGO_PKG_VERSION"));

    let stream_config = StreamConfig {
        ws_url: env::var("TICKER_WS_URL")
            .unwrap_or_else(|_| StreamConfig::default().ws_url),
        ..StreamConfig::default()
    };
    let poll_interval: u64 = env::var("POLL_INTERVAL_SECS")
        .unwrap_or_else(|_| "30".to_string())
        .parse()
        .unwrap_or(30);
    let window_days: u32 = env::var("HISTORY_WINDOW_DAYS")
        .unwrap_or_else(|_| "30".to_string())
        .parse()
        .unwrap_or(30);

    let source = Arc::new(match env::var("PRICE_API_URL") {
        Ok(base) => CoinGeckoSource::with_base_url(base),
        Err(_) => CoinGeckoSource::new(),
    });

    let cache = Arc::new(SnapshotCache::new());
    let fetcher = Arc::new(
        PriceFetcher::new(FetcherConfig::default(), Arc::clone(&cache))
            .with_quote_source(Arc::<CoinGeckoSource>::clone(&source))
            .with_history_source(source),
    );

    let manager = Arc::new(StreamManager::new(stream_config));
    manager.on_tick(|tick| {
        info!(
            asset = %tick.asset,
            price = tick.price_usd,
            change = tick.change_24h_pct,
            "tick"
        );
    });
    manager.start();
    info!("ticker stream started");

    // Poll loop: the pull path covers assets while the stream is down and
    // takes over entirely once the reconnect budget is exhausted.
    let poll_fetcher = Arc::clone(&fetcher);
    let poll_manager = Arc::clone(&manager);
    let poll_handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(poll_interval));

        loop {
            interval.tick().await;

            let (state, _) = poll_manager.connection_state();
            if state == ConnectionState::Connected {
                continue;
            }
            if state == ConnectionState::Errored {
                warn!("stream errored; serving snapshots via polling");
            }

            for asset in tracked_assets() {
                let snapshot = poll_fetcher.get_price_snapshot(asset, window_days).await;
                info!(
                    asset = %snapshot.asset,
                    price = snapshot.price_usd,
                    provenance = %snapshot.provenance,
                    "snapshot"
                );
            }
        }
    });

    shutdown_signal().await;
    info!("shutting down");

    poll_handle.abort();
    manager.stop().await;

    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C");
        }
        _ = terminate => {
            info!("Received termination signal");
        }
    }
}
