//! ICMarkets bridge feed. The broker terminal has no native streaming
//! endpoint, so the worker polls the bridge's tick endpoint for every
//! subscribed symbol on a tight interval and publishes only on change.

use crate::domain::errors::FeedError;
use crate::domain::market::{Feed, FeedTick};
use crate::domain::ports::PriceFeed;
use crate::infrastructure::core::HttpClientFactory;
use crate::infrastructure::feeds::backoff_delay;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest_middleware::ClientWithMiddleware;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock, broadcast};
use tracing::{debug, error, info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Deserialize)]
struct TickResponse {
    bid: Decimal,
    ask: Decimal,
    #[serde(default)]
    time: Option<i64>,
}

pub struct IcMarketsFeed {
    base_url: String,
    http: ClientWithMiddleware,
    subscribed: Arc<RwLock<HashSet<String>>>,
    event_tx: broadcast::Sender<FeedTick>,
    connected: Arc<AtomicBool>,
    reconnects: Arc<AtomicU64>,
    worker_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl IcMarketsFeed {
    pub fn new(base_url: String) -> Self {
        let (event_tx, _) = broadcast::channel(1000);
        Self {
            base_url,
            http: HttpClientFactory::create_client(),
            subscribed: Arc::new(RwLock::new(HashSet::new())),
            event_tx,
            connected: Arc::new(AtomicBool::new(false)),
            reconnects: Arc::new(AtomicU64::new(0)),
            worker_handle: Mutex::new(None),
        }
    }

    async fn probe(&self) -> Result<(), FeedError> {
        let url = format!("{}/v1/status", self.base_url.trim_end_matches('/'));
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| FeedError::Transient {
                reason: format!("status probe failed: {e}"),
            })?;

        match response.status().as_u16() {
            200 => Ok(()),
            401 | 403 => Err(FeedError::NotConfigured {
                reason: "bridge rejected credentials".to_string(),
            }),
            code => Err(FeedError::Transient {
                reason: format!("status probe returned HTTP {code}"),
            }),
        }
    }

    async fn spawn_worker(&self) {
        let mut handle_guard = self.worker_handle.lock().await;
        if let Some(handle) = handle_guard.take() {
            debug!("IcMarketsFeed: aborting previous poll worker");
            handle.abort();
        }

        let base_url = self.base_url.clone();
        let http = self.http.clone();
        let subscribed = self.subscribed.clone();
        let event_tx = self.event_tx.clone();
        let connected = self.connected.clone();
        let reconnects = self.reconnects.clone();

        *handle_guard = Some(tokio::spawn(async move {
            Self::run_poll_loop(base_url, http, subscribed, event_tx, connected, reconnects).await;
        }));
    }

    async fn run_poll_loop(
        base_url: String,
        http: ClientWithMiddleware,
        subscribed: Arc<RwLock<HashSet<String>>>,
        event_tx: broadcast::Sender<FeedTick>,
        connected: Arc<AtomicBool>,
        reconnects: Arc<AtomicU64>,
    ) {
        let mut last_prices: HashMap<String, (Decimal, Decimal)> = HashMap::new();
        let mut failures: u32 = 0;

        loop {
            if !connected.load(Ordering::Relaxed) {
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }

            let symbols: Vec<String> = subscribed.read().await.iter().cloned().collect();
            if symbols.is_empty() {
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }

            let mut poll_failed = false;
            for symbol in &symbols {
                match Self::fetch_tick(&base_url, &http, symbol).await {
                    Ok(tick) => {
                        let changed = last_prices
                            .get(symbol)
                            .map(|(bid, ask)| *bid != tick.bid || *ask != tick.ask)
                            .unwrap_or(true);
                        if changed {
                            last_prices.insert(symbol.clone(), (tick.bid, tick.ask));
                            let timestamp = tick
                                .time
                                .and_then(|t| DateTime::from_timestamp(t, 0))
                                .unwrap_or_else(Utc::now);
                            let _ = event_tx.send(FeedTick {
                                feed_symbol: symbol.clone(),
                                bid: tick.bid,
                                ask: tick.ask,
                                timestamp,
                            });
                        }
                    }
                    Err(e) => {
                        debug!("ICMarkets tick fetch failed for {}: {}", symbol, e);
                        poll_failed = true;
                    }
                }
            }

            if poll_failed {
                let delay = backoff_delay(failures);
                failures = failures.saturating_add(1);
                error!(
                    "ICMarkets poll errors, backing off {}s (failure #{})",
                    delay.as_secs(),
                    failures
                );
                tokio::time::sleep(delay).await;
                reconnects.fetch_add(1, Ordering::Relaxed);
            } else {
                failures = 0;
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        }
    }

    async fn fetch_tick(
        base_url: &str,
        http: &ClientWithMiddleware,
        symbol: &str,
    ) -> Result<TickResponse, FeedError> {
        let url = format!(
            "{}/v1/symbols/{}/tick",
            base_url.trim_end_matches('/'),
            symbol
        );
        let response = http.get(&url).send().await.map_err(|e| FeedError::Transient {
            reason: e.to_string(),
        })?;

        if !response.status().is_success() {
            return Err(FeedError::Transient {
                reason: format!("HTTP {}", response.status()),
            });
        }

        response
            .json::<TickResponse>()
            .await
            .map_err(|e| FeedError::Transient {
                reason: format!("bad tick payload: {e}"),
            })
    }

    /// Checks the symbol exists on the bridge before tracking it.
    async fn validate_symbol(&self, symbol: &str) -> Result<(), FeedError> {
        let url = format!(
            "{}/v1/symbols/{}",
            self.base_url.trim_end_matches('/'),
            symbol
        );
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| FeedError::Transient {
                reason: e.to_string(),
            })?;

        if response.status().as_u16() == 404 {
            return Err(FeedError::UnknownSymbol {
                symbol: symbol.to_string(),
            });
        }
        if !response.status().is_success() {
            return Err(FeedError::Transient {
                reason: format!("symbol lookup returned HTTP {}", response.status()),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl PriceFeed for IcMarketsFeed {
    fn name(&self) -> Feed {
        Feed::IcMarkets
    }

    async fn connect(&self) -> Result<(), FeedError> {
        self.probe().await?;
        self.connected.store(true, Ordering::Relaxed);
        self.spawn_worker().await;
        info!("Connected to ICMarkets bridge at {}", self.base_url);
        Ok(())
    }

    async fn subscribe(&self, feed_symbol: &str) -> Result<(), FeedError> {
        if !self.connected.load(Ordering::Relaxed) {
            return Err(FeedError::NotConnected);
        }
        self.validate_symbol(feed_symbol).await?;
        self.subscribed.write().await.insert(feed_symbol.to_string());
        info!("Subscribed to {} on ICMarkets", feed_symbol);
        Ok(())
    }

    async fn unsubscribe(&self, feed_symbol: &str) -> Result<(), FeedError> {
        self.subscribed.write().await.remove(feed_symbol);
        Ok(())
    }

    async fn bulk_subscribe(&self, feed_symbols: &[String]) -> Result<(), FeedError> {
        for symbol in feed_symbols {
            if let Err(e) = self.subscribe(symbol).await {
                error!("Failed to subscribe to {}: {}", symbol, e);
            }
        }
        Ok(())
    }

    async fn reconnect(&self) -> Result<(), FeedError> {
        self.connected.store(false, Ordering::Relaxed);
        tokio::time::sleep(Duration::from_secs(2)).await;
        match self.probe().await {
            Ok(()) => {
                self.connected.store(true, Ordering::Relaxed);
                self.reconnects.fetch_add(1, Ordering::Relaxed);
                info!("ICMarkets reconnected");
                Ok(())
            }
            Err(e) => {
                warn!("ICMarkets reconnect failed: {}", e);
                Err(e)
            }
        }
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
