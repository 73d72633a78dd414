//! OANDA v20 streaming feed. A single long-lived HTTP request carries the
//! whole instrument list; changing the subscription set requires closing
//! and reopening the stream.

use crate::domain::errors::FeedError;
use crate::domain::market::{Feed, FeedTick};
use crate::domain::ports::PriceFeed;
use crate::infrastructure::core::HttpClientFactory;
use crate::infrastructure::feeds::backoff_delay;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, Notify, RwLock, broadcast};
use tracing::{debug, error, info, warn};

#[derive(Debug, Deserialize)]
struct StreamLine {
    #[serde(rename = "type")]
    kind: String,
    instrument: Option<String>,
    bids: Option<Vec<PriceBucket>>,
    asks: Option<Vec<PriceBucket>>,
    time: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PriceBucket {
    price: Decimal,
}

pub struct OandaFeed {
    api_base_url: String,
    stream_base_url: String,
    api_key: String,
    account_id: String,
    subscribed: Arc<RwLock<HashSet<String>>>,
    event_tx: broadcast::Sender<FeedTick>,
    connected: Arc<AtomicBool>,
    reconnects: Arc<AtomicU64>,
    restart: Arc<Notify>,
    worker_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl OandaFeed {
    pub fn new(
        api_base_url: String,
        stream_base_url: String,
        api_key: String,
        account_id: String,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(1000);
        Self {
            api_base_url,
            stream_base_url,
            api_key,
            account_id,
            subscribed: Arc::new(RwLock::new(HashSet::new())),
            event_tx,
            connected: Arc::new(AtomicBool::new(false)),
            reconnects: Arc::new(AtomicU64::new(0)),
            restart: Arc::new(Notify::new()),
            worker_handle: Mutex::new(None),
        }
    }

    async fn probe(&self) -> Result<(), FeedError> {
        let url = format!(
            "{}/v3/accounts/{}/summary",
            self.api_base_url.trim_end_matches('/'),
            self.account_id
        );
        let response = HttpClientFactory::create_client()
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await
            .map_err(|e| FeedError::Transient {
                reason: format!("account probe failed: {e}"),
            })?;

        match response.status().as_u16() {
            200 => Ok(()),
            401 | 403 => Err(FeedError::NotConfigured {
                reason: "OANDA rejected credentials".to_string(),
            }),
            code => Err(FeedError::Transient {
                reason: format!("account probe returned HTTP {code}"),
            }),
        }
    }

    async fn spawn_worker(&self) {
        let mut handle_guard = self.worker_handle.lock().await;
        if handle_guard.is_some() {
            return;
        }

        let stream_url = format!(
            "{}/v3/accounts/{}/pricing/stream",
            self.stream_base_url.trim_end_matches('/'),
            self.account_id
        );
        let api_key = self.api_key.clone();
        let subscribed = self.subscribed.clone();
        let event_tx = self.event_tx.clone();
        let connected = self.connected.clone();
        let reconnects = self.reconnects.clone();
        let restart = self.restart.clone();

        *handle_guard = Some(tokio::spawn(async move {
            Self::run_stream_loop(
                stream_url, api_key, subscribed, event_tx, connected, reconnects, restart,
            )
            .await;
        }));
    }

    async fn run_stream_loop(
        stream_url: String,
        api_key: String,
        subscribed: Arc<RwLock<HashSet<String>>>,
        event_tx: broadcast::Sender<FeedTick>,
        connected: Arc<AtomicBool>,
        reconnects: Arc<AtomicU64>,
        restart: Arc<Notify>,
    ) {
        let client = HttpClientFactory::create_streaming_client();
        let mut failures: u32 = 0;

        loop {
            if !connected.load(Ordering::Relaxed) {
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }

            let instruments = {
                let set = subscribed.read().await;
                set.iter().cloned().collect::<Vec<_>>().join(",")
            };
            if instruments.is_empty() {
                tokio::time::sleep(Duration::from_secs(5)).await;
                continue;
            }

            let response = client
                .get(&stream_url)
                .header("Authorization", format!("Bearer {}", api_key))
                .header("Accept-Datetime-Format", "UNIX")
                .query(&[("instruments", instruments.as_str())])
                .send()
                .await;

            let response = match response {
                Ok(r) if r.status().is_success() => r,
                Ok(r) => {
                    let delay = backoff_delay(failures);
                    failures = failures.saturating_add(1);
                    error!(
                        "OANDA stream failed: HTTP {}, retrying in {}s",
                        r.status(),
                        delay.as_secs()
                    );
                    tokio::time::sleep(delay).await;
                    reconnects.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
                Err(e) => {
                    let delay = backoff_delay(failures);
                    failures = failures.saturating_add(1);
                    error!(
                        "OANDA stream connection error: {}, retrying in {}s",
                        e,
                        delay.as_secs()
                    );
                    tokio::time::sleep(delay).await;
                    reconnects.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
            };

            info!("OANDA pricing stream open ({})", instruments);
            failures = 0;

            let mut stream = response.bytes_stream();
            let mut buffer: Vec<u8> = Vec::new();
            let mut clean_restart = false;

            loop {
                tokio::select! {
                    _ = restart.notified() => {
                        info!("Restarting OANDA stream with updated symbol list");
                        clean_restart = true;
                        break;
                    }
                    chunk = stream.next() => {
                        match chunk {
                            Some(Ok(bytes)) => {
                                buffer.extend_from_slice(&bytes);
                                while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                                    let line: Vec<u8> = buffer.drain(..=pos).collect();
                                    if let Ok(text) = std::str::from_utf8(&line) {
                                        Self::handle_line(text.trim(), &event_tx);
                                    }
                                }
                            }
                            Some(Err(e)) => {
                                error!("OANDA stream read error: {}", e);
                                break;
                            }
                            None => {
                                warn!("OANDA stream closed by server");
                                break;
                            }
                        }
                    }
                }
            }

            if !clean_restart {
                let delay = backoff_delay(failures);
                failures = failures.saturating_add(1);
                tokio::time::sleep(delay).await;
                reconnects.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn handle_line(line: &str, event_tx: &broadcast::Sender<FeedTick>) {
        if line.is_empty() {
            return;
        }
        let parsed: StreamLine = match serde_json::from_str(line) {
            Ok(p) => p,
            Err(_) => return, // partial or non-JSON line
        };

        match parsed.kind.as_str() {
            "PRICE" => {
                let (Some(instrument), Some(bids), Some(asks)) =
                    (parsed.instrument, parsed.bids, parsed.asks)
                else {
                    return;
                };
                let (Some(bid), Some(ask)) = (bids.first(), asks.first()) else {
                    return;
                };
                let timestamp = parsed
                    .time
                    .as_deref()
                    .and_then(parse_unix_time)
                    .unwrap_or_else(Utc::now);
                let _ = event_tx.send(FeedTick {
                    feed_symbol: instrument,
                    bid: bid.price,
                    ask: ask.price,
                    timestamp,
                });
            }
            "HEARTBEAT" => {
                debug!("OANDA heartbeat received");
            }
            other => {
                debug!("Unhandled OANDA message type: {}", other);
            }
        }
    }
}

/// OANDA UNIX datetime format: seconds with fractional part, as a string.
fn parse_unix_time(raw: &str) -> Option<DateTime<Utc>> {
    let seconds: f64 = raw.parse().ok()?;
    let secs = seconds.trunc() as i64;
    let nanos = (seconds.fract() * 1e9) as u32;
    DateTime::from_timestamp(secs, nanos)
}

#[async_trait]
impl PriceFeed for OandaFeed {
    fn name(&self) -> Feed {
        Feed::Oanda
    }

    async fn connect(&self) -> Result<(), FeedError> {
        if self.api_key.is_empty() || self.account_id.is_empty() {
            return Err(FeedError::NotConfigured {
                reason: "OANDA credentials not configured".to_string(),
            });
        }
        self.probe().await?;
        self.connected.store(true, Ordering::Relaxed);
        self.spawn_worker().await;
        info!("Connected to OANDA stream");
        Ok(())
    }

    async fn subscribe(&self, feed_symbol: &str) -> Result<(), FeedError> {
        if !self.connected.load(Ordering::Relaxed) {
            return Err(FeedError::NotConnected);
        }
        let added = self.subscribed.write().await.insert(feed_symbol.to_string());
        if added {
            info!("Subscribed to {} on OANDA", feed_symbol);
            self.restart.notify_one();
        }
        Ok(())
    }

    async fn unsubscribe(&self, feed_symbol: &str) -> Result<(), FeedError> {
        let removed = self.subscribed.write().await.remove(feed_symbol);
        if removed {
            self.restart.notify_one();
        }
        Ok(())
    }

    async fn bulk_subscribe(&self, feed_symbols: &[String]) -> Result<(), FeedError> {
        if !self.connected.load(Ordering::Relaxed) {
            return Err(FeedError::NotConnected);
        }
        {
            let mut set = self.subscribed.write().await;
            for symbol in feed_symbols {
                set.insert(symbol.clone());
            }
        }
        info!("Bulk subscribed {} symbols on OANDA", feed_symbols.len());
        self.restart.notify_one();
        Ok(())
    }

    async fn reconnect(&self) -> Result<(), FeedError> {
        self.connected.store(false, Ordering::Relaxed);
        self.restart.notify_one();
        tokio::time::sleep(Duration::from_secs(2)).await;
        self.probe().await?;
        self.connected.store(true, Ordering::Relaxed);
        self.reconnects.fetch_add(1, Ordering::Relaxed);
        info!("OANDA reconnected");
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
