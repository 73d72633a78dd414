//! Binance WebSocket feed. Uses the combined-stream endpoint with dynamic
//! SUBSCRIBE/UNSUBSCRIBE control frames keyed by lowercased ticker, and
//! consumes bookTicker updates for best bid/ask.

use crate::domain::errors::FeedError;
use crate::domain::market::{Feed, FeedTick};
use crate::domain::ports::PriceFeed;
use crate::infrastructure::feeds::backoff_delay;
use async_trait::async_trait;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, Notify, RwLock, broadcast, mpsc};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

#[derive(Debug, Deserialize)]
struct CombinedStreamMessage {
    stream: String,
    data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct BookTickerData {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "b")]
    bid: String,
    #[serde(rename = "a")]
    ask: String,
}

pub struct BinanceFeed {
    ws_url: String,
    subscribed: Arc<RwLock<HashSet<String>>>,
    event_tx: broadcast::Sender<FeedTick>,
    connected: Arc<AtomicBool>,
    reconnects: Arc<AtomicU64>,
    request_id: Arc<AtomicU64>,
    ws_tx: Arc<Mutex<Option<mpsc::Sender<Message>>>>,
    restart: Arc<Notify>,
    worker_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl BinanceFeed {
    pub fn new(ws_url: String) -> Self {
        let (event_tx, _) = broadcast::channel(1000);
        Self {
            ws_url,
            subscribed: Arc::new(RwLock::new(HashSet::new())),
            event_tx,
            connected: Arc::new(AtomicBool::new(false)),
            reconnects: Arc::new(AtomicU64::new(0)),
            request_id: Arc::new(AtomicU64::new(1)),
            ws_tx: Arc::new(Mutex::new(None)),
            restart: Arc::new(Notify::new()),
            worker_handle: Mutex::new(None),
        }
    }

    fn control_frame(method: &str, streams: &[String], id: u64) -> Message {
        let body = serde_json::json!({
            "method": method,
            "params": streams,
            "id": id,
        });
        Message::Text(body.to_string().into())
    }

    fn stream_names(symbols: &[String]) -> Vec<String> {
        symbols
            .iter()
            .map(|s| format!("{}@bookTicker", s.to_lowercase()))
            .collect()
    }

    async fn send_control(&self, method: &str, symbols: &[String]) {
        let streams = Self::stream_names(symbols);
        let id = self.request_id.fetch_add(1, Ordering::Relaxed);
        let guard = self.ws_tx.lock().await;
        if let Some(tx) = guard.as_ref() {
            if tx.send(Self::control_frame(method, &streams, id)).await.is_err() {
                warn!("Binance control channel closed, frame dropped");
            } else {
                debug!("Sent {} for {} stream(s) (id {})", method, streams.len(), id);
            }
        }
    }

    async fn spawn_worker(&self) {
        let mut handle_guard = self.worker_handle.lock().await;
        if handle_guard.is_some() {
            return;
        }

        let ws_url = self.ws_url.clone();
        let subscribed = self.subscribed.clone();
        let event_tx = self.event_tx.clone();
        let connected = self.connected.clone();
        let reconnects = self.reconnects.clone();
        let request_id = self.request_id.clone();
        let ws_tx_slot = self.ws_tx.clone();
        let restart = self.restart.clone();

        *handle_guard = Some(tokio::spawn(async move {
            Self::run_websocket_loop(
                ws_url, subscribed, event_tx, connected, reconnects, request_id, ws_tx_slot,
                restart,
            )
            .await;
        }));
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_websocket_loop(
        ws_url: String,
        subscribed: Arc<RwLock<HashSet<String>>>,
        event_tx: broadcast::Sender<FeedTick>,
        connected: Arc<AtomicBool>,
        reconnects: Arc<AtomicU64>,
        request_id: Arc<AtomicU64>,
        ws_tx_slot: Arc<Mutex<Option<mpsc::Sender<Message>>>>,
        restart: Arc<Notify>,
    ) {
        let mut failures: u32 = 0;

        loop {
            if !connected.load(Ordering::Relaxed) {
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }

            let symbols: Vec<String> = subscribed.read().await.iter().cloned().collect();
            if symbols.is_empty() {
                tokio::time::sleep(Duration::from_secs(5)).await;
                continue;
            }

            info!("Connecting to Binance WebSocket: {}", ws_url);
            let ws_stream = match connect_async(&ws_url).await {
                Ok((stream, _)) => stream,
                Err(e) => {
                    let delay = backoff_delay(failures);
                    failures = failures.saturating_add(1);
                    error!(
                        "Binance WebSocket connect failed: {}. Reconnecting in {}s",
                        e,
                        delay.as_secs()
                    );
                    tokio::time::sleep(delay).await;
                    reconnects.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
            };

            info!("Binance WebSocket connected");
            failures = 0;

            let (mut write, mut read) = ws_stream.split();

            // Outgoing frames (subscribes, pongs, pings) are funneled
            // through one channel so multiple writers never race the sink
            let (out_tx, mut out_rx) = mpsc::channel::<Message>(100);
            *ws_tx_slot.lock().await = Some(out_tx.clone());

            let writer = tokio::spawn(async move {
                while let Some(msg) = out_rx.recv().await {
                    if write.send(msg).await.is_err() {
                        break;
                    }
                }
            });

            let ping_tx = out_tx.clone();
            let pinger = tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(180));
                interval.tick().await; // skip the immediate first tick
                loop {
                    interval.tick().await;
                    if ping_tx.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            });

            // Subscribe the current set
            let streams = Self::stream_names(&symbols);
            let id = request_id.fetch_add(1, Ordering::Relaxed);
            if out_tx
                .send(Self::control_frame("SUBSCRIBE", &streams, id))
                .await
                .is_err()
            {
                error!("Failed to queue Binance subscribe frame");
            }

            let mut transport_error = false;

            loop {
                tokio::select! {
                    _ = restart.notified() => {
                        info!("Binance WebSocket restart requested");
                        break;
                    }
                    msg = read.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                Self::handle_message(&text, &event_tx);
                            }
                            Some(Ok(Message::Ping(payload))) => {
                                let _ = out_tx.send(Message::Pong(payload)).await;
                            }
                            Some(Ok(Message::Pong(_))) => {
                                debug!("Binance pong received");
                            }
                            Some(Ok(Message::Close(frame))) => {
                                if let Some(cf) = frame {
                                    info!(
                                        "Binance WebSocket closed by server: {} '{}'",
                                        cf.code, cf.reason
                                    );
                                } else {
                                    info!("Binance WebSocket closed by server");
                                }
                                break;
                            }
                            Some(Err(e)) => {
                                error!("Binance WebSocket read error: {}", e);
                                transport_error = true;
                                break;
                            }
                            None => {
                                warn!("Binance WebSocket stream ended");
                                transport_error = true;
                                break;
                            }
                            _ => {}
                        }
                    }
                }
            }

            *ws_tx_slot.lock().await = None;
            writer.abort();
            pinger.abort();

            if transport_error {
                let delay = backoff_delay(failures);
                failures = failures.saturating_add(1);
                tokio::time::sleep(delay).await;
            } else {
                // Graceful close or restart request; brief pause avoids a
                // reconnect stampede against the endpoint
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
            reconnects.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn handle_message(text: &str, event_tx: &broadcast::Sender<FeedTick>) {
        let value: serde_json::Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(_) => {
                warn!("Invalid JSON received from Binance");
                return;
            }
        };

        // Subscription ack: {"result": null, "id": N}
        if let Some(id) = value.get("id") {
            if value.get("result").map(|r| r.is_null()).unwrap_or(false) {
                debug!("Binance subscription confirmed: id {}", id);
            } else {
                warn!("Binance subscription response: {}", value);
            }
            return;
        }

        let Ok(combined) = serde_json::from_value::<CombinedStreamMessage>(value) else {
            return;
        };
        if !combined.stream.ends_with("@bookTicker") {
            return;
        }
        let Ok(ticker) = serde_json::from_value::<BookTickerData>(combined.data) else {
            return;
        };

        let (Ok(bid), Ok(ask)) = (
            Decimal::from_str(&ticker.bid),
            Decimal::from_str(&ticker.ask),
        ) else {
            warn!("Unparseable bookTicker prices for {}", ticker.symbol);
            return;
        };

        let _ = event_tx.send(FeedTick {
            feed_symbol: ticker.symbol,
            bid,
            ask,
            // bookTicker carries no event time
            timestamp: Utc::now(),
        });
    }
}

#[async_trait]
impl PriceFeed for BinanceFeed {
    fn name(&self) -> Feed {
        Feed::Binance
    }

    async fn connect(&self) -> Result<(), FeedError> {
        self.connected.store(true, Ordering::Relaxed);
        self.spawn_worker().await;
        info!("Binance WebSocket ready");
        Ok(())
    }

    async fn subscribe(&self, feed_symbol: &str) -> Result<(), FeedError> {
        if !self.connected.load(Ordering::Relaxed) {
            return Err(FeedError::NotConnected);
        }
        let symbol = feed_symbol.to_lowercase();
        let added = self.subscribed.write().await.insert(symbol.clone());
        if added {
            info!("Subscribed to {} on Binance", symbol);
            self.send_control("SUBSCRIBE", &[symbol]).await;
        }
        Ok(())
    }

    async fn unsubscribe(&self, feed_symbol: &str) -> Result<(), FeedError> {
        let symbol = feed_symbol.to_lowercase();
        let removed = self.subscribed.write().await.remove(&symbol);
        if removed {
            self.send_control("UNSUBSCRIBE", &[symbol]).await;
        }
        Ok(())
    }

    async fn bulk_subscribe(&self, feed_symbols: &[String]) -> Result<(), FeedError> {
        if !self.connected.load(Ordering::Relaxed) {
            return Err(FeedError::NotConnected);
        }
        let mut fresh = Vec::new();
        {
            let mut set = self.subscribed.write().await;
            for symbol in feed_symbols {
                let symbol = symbol.to_lowercase();
                if set.insert(symbol.clone()) {
                    fresh.push(symbol);
                }
            }
        }
        if !fresh.is_empty() {
            info!("Bulk subscribed {} symbols on Binance", fresh.len());
            self.send_control("SUBSCRIBE", &fresh).await;
        }
        Ok(())
    }

    async fn reconnect(&self) -> Result<(), FeedError> {
        self.connected.store(true, Ordering::Relaxed);
        self.restart.notify_one();
        self.reconnects.fetch_add(1, Ordering::Relaxed);
        info!("Binance reconnect requested");
        Ok(())
    }

    fn updates(&self) -> broadcast::Receiver<FeedTick> {
        self.event_tx.subscribe()
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    fn reconnect_count(&self) -> u64 {
        self.reconnects.load(Ordering::Relaxed)
    }
}
