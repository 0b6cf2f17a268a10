//! Streaming ticker connection
//!
//! Maintains one persistent WebSocket to the exchange ticker feed,
//! normalizes batches of ticker records into StreamTicks, and reconnects
//! with exponential backoff until the budget runs out. Transport sits
//! behind a trait so tests drive the manager with scripted connections.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde::Deserialize;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{error, info, warn};

use cryptodash_core::{
    asset_for_stream_symbol, ConnectionState, StreamConfig, StreamError, StreamResult, StreamTick,
};

use crate::reconnect::{transition, Action, ReconnectPolicy, StreamEvent};

/// Consumer tick handler; the last registration wins
pub type TickCallback = Arc<dyn Fn(StreamTick) + Send + Sync>;

/// One live connection to the ticker source
#[async_trait]
pub trait StreamConnection: Send {
    /// Next text payload. None means the stream closed cleanly;
    /// Err means the transport failed.
    async fn next_text(&mut self) -> Option<StreamResult<String>>;

    /// Close with a normal-closure code
    async fn close(&mut self);
}

/// Opens connections to the ticker source
#[async_trait]
pub trait StreamConnector: Send + Sync + 'static {
    async fn connect(&self, url: &str) -> StreamResult<Box<dyn StreamConnection>>;
}

/// Production connector over tokio-tungstenite
pub struct WsConnector;

struct WsConnection {
    inner: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl StreamConnector for WsConnector {
    async fn connect(&self, url: &str) -> StreamResult<Box<dyn StreamConnection>> {
        let (stream, _) = connect_async(url)
            .await
            .map_err(|e| StreamError::ConnectFailed(e.to_string()))?;
        Ok(Box::new(WsConnection { inner: stream }))
    }
}

#[async_trait]
impl StreamConnection for WsConnection {
    async fn next_text(&mut self) -> Option<StreamResult<String>> {
        while let Some(message) = self.inner.next().await {
            match message {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Ping(data)) => {
                    if self.inner.send(Message::Pong(data)).await.is_err() {
                        return Some(Err(StreamError::Closed));
                    }
                }
                Ok(Message::Close(_)) => return None,
                Ok(_) => {}
                Err(e) => return Some(Err(StreamError::ConnectFailed(e.to_string()))),
            }
        }
        None
    }

    async fn close(&mut self) {
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: "client shutdown".into(),
        };
        let _ = self.inner.send(Message::Close(Some(frame))).await;
    }
}

/// State shared between the manager handle and its connection task
struct StreamShared {
    state: RwLock<(ConnectionState, u32)>,
    callback: RwLock<Option<TickCallback>>,
    policy: ReconnectPolicy,
}

impl StreamShared {
    fn snapshot(&self) -> (ConnectionState, u32) {
        *self.state.read()
    }

    /// Apply an event under the lock so transitions never interleave
    fn apply(&self, event: StreamEvent) -> Action {
        let mut guard = self.state.write();
        let (state, attempt) = *guard;
        let (next, next_attempt, action) = transition(state, attempt, event, &self.policy);
        *guard = (next, next_attempt);
        action
    }

    fn reset(&self) {
        *self.state.write() = (ConnectionState::Disconnected, 0);
    }
}

/// Push-side entry point of the price core
pub struct StreamManager {
    config: StreamConfig,
    connector: Arc<dyn StreamConnector>,
    shared: Arc<StreamShared>,
    task: Mutex<Option<JoinHandle<()>>>,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
}

impl StreamManager {
    pub fn new(config: StreamConfig) -> Self {
        Self::with_connector(config, Arc::new(WsConnector))
    }

    pub fn with_connector(config: StreamConfig, connector: Arc<dyn StreamConnector>) -> Self {
        let shared = Arc::new(StreamShared {
            state: RwLock::new((ConnectionState::Disconnected, 0)),
            callback: RwLock::new(None),
            policy: ReconnectPolicy::from(&config),
        });

        Self {
            config,
            connector,
            shared,
            task: Mutex::new(None),
            shutdown: Mutex::new(None),
        }
    }

    /// Register the tick handler; replaces any previous registration
    pub fn on_tick<F>(&self, callback: F)
    where
        F: Fn(StreamTick) + Send + Sync + 'static,
    {
        *self.shared.callback.write() = Some(Arc::new(callback));
    }

    pub fn connection_state(&self) -> (ConnectionState, u32) {
        self.shared.snapshot()
    }

    /// Open the stream; no-op while already running or after the budget
    /// was exhausted (use force_reconnect to leave Errored).
    pub fn start(&self) {
        let mut task = self.task.lock();
        if let Some(handle) = task.as_ref() {
            if !handle.is_finished() {
                return;
            }
        }

        if self.shared.apply(StreamEvent::StartRequested) != Action::Connect {
            return;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        *self.shutdown.lock() = Some(shutdown_tx);

        let handle = tokio::spawn(run_loop(
            Arc::clone(&self.connector),
            self.config.ws_url.clone(),
            Arc::clone(&self.shared),
            shutdown_rx,
        ));
        *task = Some(handle);
    }

    /// Close the stream and cancel any pending reconnect timer; idempotent
    pub async fn stop(&self) {
        let shutdown = self.shutdown.lock().take();
        if let Some(tx) = shutdown {
            let _ = tx.send(true);
        }

        let task = self.task.lock().take();
        if let Some(handle) = task {
            if handle.await.is_err() {
                warn!("stream task terminated abnormally");
            }
        }

        let (state, attempt) = self.shared.snapshot();
        if state != ConnectionState::Disconnected {
            *self.shared.state.write() = (ConnectionState::Disconnected, attempt);
        }
    }

    /// Manual reconnect: stop, reset the attempt budget, start again
    /// after a short fixed delay.
    pub async fn force_reconnect(&self) {
        info!("forcing stream reconnect");
        self.stop().await;
        self.shared.reset();
        sleep(self.config.force_reconnect_delay).await;
        self.start();
    }
}

async fn run_loop(
    connector: Arc<dyn StreamConnector>,
    url: String,
    shared: Arc<StreamShared>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        let connected = tokio::select! {
            result = connector.connect(&url) => result,
            _ = shutdown_rx.changed() => {
                shared.apply(StreamEvent::Closed { deliberate: true });
                return;
            }
        };

        match connected {
            Ok(mut conn) => {
                shared.apply(StreamEvent::Opened);
                info!(%url, "stream connected");

                let deliberate = read_until_closed(&mut conn, &shared, &mut shutdown_rx).await;
                if deliberate {
                    conn.close().await;
                    shared.apply(StreamEvent::Closed { deliberate: true });
                    info!("stream stopped");
                    return;
                }
            }
            Err(e) => {
                warn!("stream connect failed: {e}");
            }
        }

        match shared.apply(StreamEvent::Closed { deliberate: false }) {
            Action::ScheduleReconnect(delay) => {
                let (_, attempt) = shared.snapshot();
                warn!(attempt, "stream disconnected, reconnecting in {delay:?}");

                tokio::select! {
                    _ = sleep(delay) => {
                        shared.apply(StreamEvent::ReconnectTimerFired);
                    }
                    _ = shutdown_rx.changed() => {
                        shared.apply(StreamEvent::Closed { deliberate: true });
                        return;
                    }
                }
            }
            Action::GiveUp => {
                error!("stream reconnect budget exhausted; consumers should poll");
                return;
            }
            _ => return,
        }
    }
}

/// Read ticks until the connection ends. Returns true when the exit was
/// a consumer shutdown rather than a transport failure.
async fn read_until_closed(
    conn: &mut Box<dyn StreamConnection>,
    shared: &StreamShared,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> bool {
    loop {
        tokio::select! {
            message = conn.next_text() => match message {
                Some(Ok(text)) => match parse_ticker_batch(&text) {
                    Ok(ticks) => {
                        let callback = shared.callback.read().clone();
                        if let Some(callback) = callback {
                            for tick in ticks {
                                callback(tick);
                            }
                        }
                    }
                    // Malformed payloads never terminate the connection
                    Err(e) => warn!("dropping malformed stream payload: {e}"),
                },
                Some(Err(e)) => {
                    warn!("stream transport error: {e}");
                    return false;
                }
                None => {
                    info!("stream closed by server");
                    return false;
                }
            },
            _ = shutdown_rx.changed() => return true,
        }
    }
}

/// One record of the exchange's batched ticker frame
#[derive(Debug, Deserialize)]
struct TickerRecord {
    /// Exchange symbol, e.g. "BTCUSDT"
    s: String,
    /// Last price (sent as a string)
    c: Option<String>,
    /// 24h change percent (sent as a string)
    #[serde(rename = "P")]
    change_pct: Option<String>,
    /// Event time in ms
    #[serde(rename = "E")]
    event_time_ms: Option<i64>,
}

/// Normalize one batched ticker frame
///
/// Unmapped symbols and records missing price or change are dropped
/// silently; non-array frames are ignored.
pub fn parse_ticker_batch(text: &str) -> StreamResult<Vec<StreamTick>> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| StreamError::InvalidMessage(e.to_string()))?;

    if !value.is_array() {
        return Ok(Vec::new());
    }

    let records: Vec<TickerRecord> =
        serde_json::from_value(value).map_err(|e| StreamError::InvalidMessage(e.to_string()))?;

    let now_ms = chrono::Utc::now().timestamp_millis();
    let mut ticks = Vec::with_capacity(records.len());

    for record in records {
        let Some(asset) = asset_for_stream_symbol(&record.s) else {
            continue;
        };
        let (Some(price), Some(change)) = (record.c, record.change_pct) else {
            continue;
        };
        let (Ok(price_usd), Ok(change_24h_pct)) = (price.parse::<f64>(), change.parse::<f64>())
        else {
            continue;
        };

        ticks.push(StreamTick {
            asset: asset.id.clone(),
            price_usd,
            change_24h_pct,
            ts_ms: record.event_time_ms.unwrap_or(now_ms),
        });
    }

    Ok(ticks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::time::Duration;
    use tokio::time::Instant;

    fn config() -> StreamConfig {
        StreamConfig {
            ws_url: "wss://example.invalid/ticker".to_string(),
            ..StreamConfig::default()
        }
    }

    enum ConnScript {
        Fail,
        Serve {
            frames: Vec<String>,
            then_pending: bool,
        },
    }

    struct ScriptedConnector {
        scripts: Mutex<VecDeque<ConnScript>>,
        connects: Mutex<Vec<Instant>>,
    }

    impl ScriptedConnector {
        fn new(scripts: Vec<ConnScript>) -> Arc<Self> {
            Arc::new(Self {
                scripts: Mutex::new(scripts.into()),
                connects: Mutex::new(Vec::new()),
            })
        }

        fn connect_count(&self) -> usize {
            self.connects.lock().len()
        }

        fn connect_instants(&self) -> Vec<Instant> {
            self.connects.lock().clone()
        }
    }

    #[async_trait]
    impl StreamConnector for ScriptedConnector {
        async fn connect(&self, _url: &str) -> StreamResult<Box<dyn StreamConnection>> {
            self.connects.lock().push(Instant::now());
            match self.scripts.lock().pop_front() {
                Some(ConnScript::Serve {
                    frames,
                    then_pending,
                }) => Ok(Box::new(ScriptedConnection {
                    frames: frames.into(),
                    then_pending,
                })),
                Some(ConnScript::Fail) | None => {
                    Err(StreamError::ConnectFailed("scripted failure".into()))
                }
            }
        }
    }

    struct ScriptedConnection {
        frames: VecDeque<String>,
        then_pending: bool,
    }

    #[async_trait]
    impl StreamConnection for ScriptedConnection {
        async fn next_text(&mut self) -> Option<StreamResult<String>> {
            if let Some(frame) = self.frames.pop_front() {
                return Some(Ok(frame));
            }
            if self.then_pending {
                futures::future::pending::<()>().await;
            }
            None
        }

        async fn close(&mut self) {}
    }

    const BATCH: &str = r#"[
        {"s": "BTCUSDT", "c": "50000.5", "P": "2.5", "E": 1700000000000},
        {"s": "DOGEUSDT", "c": "0.1", "P": "9.9", "E": 1700000000000},
        {"s": "ETHUSDT", "c": "3000.0", "E": 1700000000000}
    ]"#;

    async fn wait_for(mut check: impl FnMut() -> bool) {
        for _ in 0..10_000 {
            if check() {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[test]
    fn test_parse_batch_maps_and_filters() {
        let ticks = parse_ticker_batch(BATCH).unwrap();

        // DOGEUSDT is unmapped, ETHUSDT lacks the change field
        assert_eq!(ticks.len(), 1);
        assert_eq!(ticks[0].asset.as_str(), "bitcoin");
        assert_eq!(ticks[0].price_usd, 50_000.5);
        assert_eq!(ticks[0].change_24h_pct, 2.5);
        assert_eq!(ticks[0].ts_ms, 1_700_000_000_000);
    }

    #[test]
    fn test_parse_non_array_frame_is_ignored() {
        let ticks = parse_ticker_batch(r#"{"type": "welcome"}"#).unwrap();
        assert!(ticks.is_empty());
    }

    #[test]
    fn test_parse_invalid_json_is_an_error() {
        assert!(parse_ticker_batch("not json").is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_backoff_until_budget_exhausted() {
        let connector = ScriptedConnector::new(vec![]);
        let manager = StreamManager::with_connector(config(), Arc::<ScriptedConnector>::clone(&connector));

        manager.start();
        wait_for(|| manager.connection_state().0 == ConnectionState::Errored).await;

        // Initial connect plus five reconnect attempts
        assert_eq!(connector.connect_count(), 6);
        assert_eq!(manager.connection_state(), (ConnectionState::Errored, 5));

        let instants = connector.connect_instants();
        let expected = [3000u64, 6000, 12_000, 24_000, 48_000];
        for (window, ms) in instants.windows(2).zip(expected) {
            let delay = window[1] - window[0];
            assert!(
                delay >= Duration::from_millis(ms) && delay < Duration::from_millis(ms + 100),
                "expected ~{ms}ms, got {delay:?}"
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_pending_reconnect() {
        let connector = ScriptedConnector::new(vec![ConnScript::Fail]);
        let manager = StreamManager::with_connector(config(), Arc::<ScriptedConnector>::clone(&connector));

        manager.start();
        wait_for(|| connector.connect_count() == 1).await;

        // First reconnect timer is pending; stop must cancel it
        manager.stop().await;
        tokio::time::advance(Duration::from_secs(60)).await;

        assert_eq!(connector.connect_count(), 1);
        assert_eq!(manager.connection_state().0, ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent() {
        let connector = ScriptedConnector::new(vec![ConnScript::Fail]);
        let manager = StreamManager::with_connector(config(), Arc::<ScriptedConnector>::clone(&connector));

        manager.start();
        wait_for(|| connector.connect_count() == 1).await;

        manager.stop().await;
        manager.stop().await;
        assert_eq!(manager.connection_state().0, ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_reach_the_callback() {
        let connector = ScriptedConnector::new(vec![ConnScript::Serve {
            frames: vec![BATCH.to_string()],
            then_pending: true,
        }]);
        let manager = StreamManager::with_connector(config(), Arc::<ScriptedConnector>::clone(&connector));

        let ticks: Arc<Mutex<Vec<StreamTick>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&ticks);
        manager.on_tick(move |tick| sink.lock().push(tick));

        manager.start();
        wait_for(|| !ticks.lock().is_empty()).await;

        assert_eq!(manager.connection_state(), (ConnectionState::Connected, 0));
        let ticks = ticks.lock();
        assert_eq!(ticks.len(), 1);
        assert_eq!(ticks[0].asset.as_str(), "bitcoin");

        manager.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_frame_does_not_kill_the_connection() {
        let connector = ScriptedConnector::new(vec![ConnScript::Serve {
            frames: vec!["garbage".to_string(), BATCH.to_string()],
            then_pending: true,
        }]);
        let manager = StreamManager::with_connector(config(), Arc::<ScriptedConnector>::clone(&connector));

        let ticks: Arc<Mutex<Vec<StreamTick>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&ticks);
        manager.on_tick(move |tick| sink.lock().push(tick));

        manager.start();
        wait_for(|| !ticks.lock().is_empty()).await;

        assert_eq!(manager.connection_state().0, ConnectionState::Connected);
        manager.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_close_triggers_reconnect() {
        let connector = ScriptedConnector::new(vec![
            ConnScript::Serve {
                frames: vec![],
                then_pending: false,
            },
            ConnScript::Serve {
                frames: vec![BATCH.to_string()],
                then_pending: true,
            },
        ]);
        let manager = StreamManager::with_connector(config(), Arc::<ScriptedConnector>::clone(&connector));

        let ticks: Arc<Mutex<Vec<StreamTick>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&ticks);
        manager.on_tick(move |tick| sink.lock().push(tick));

        manager.start();
        wait_for(|| !ticks.lock().is_empty()).await;

        // A successful reopen resets the attempt budget
        assert_eq!(manager.connection_state(), (ConnectionState::Connected, 0));
        assert_eq!(connector.connect_count(), 2);

        manager.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_reconnect_resets_attempts() {
        let connector = ScriptedConnector::new(vec![ConnScript::Fail, ConnScript::Fail]);
        let manager = StreamManager::with_connector(config(), Arc::<ScriptedConnector>::clone(&connector));

        manager.start();
        wait_for(|| connector.connect_count() == 1).await;
        wait_for(|| manager.connection_state().1 == 1).await;

        manager.force_reconnect().await;
        wait_for(|| connector.connect_count() == 2).await;

        // Second failure counts from a fresh budget
        wait_for(|| manager.connection_state().1 == 1).await;
        manager.stop().await;
    }
}
