//! Aggregates the feed clients into one canonical price bus. Owns the
//! symbol-to-feed routing table, the last-price cache and the subscriber
//! list; every raw feed tick is translated, spread-stamped and fanned out
//! sequentially so per-symbol ordering survives end to end.

use crate::application::stream::health::FeedHealthMonitor;
use crate::domain::errors::{FeedError, MapError};
use crate::domain::market::{Feed, FeedTick, Quote};
use crate::domain::ports::{AlertSink, PriceFeed, QuoteSubscriber};
use crate::infrastructure::observability::Metrics;
use crate::infrastructure::symbols::SymbolMapper;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock, broadcast};
use tracing::{debug, error, info, warn};

const FIRST_PRICE_WAIT: Duration = Duration::from_secs(2);
const FIRST_PRICE_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct StreamStats {
    pub subscribed_symbols: usize,
    pub connected_feeds: usize,
    pub total_feeds: usize,
    pub reconnects: HashMap<Feed, u64>,
}

pub struct StreamManager {
    mapper: Arc<SymbolMapper>,
    feeds: HashMap<Feed, Arc<dyn PriceFeed>>,
    feed_status: RwLock<HashMap<Feed, bool>>,
    subscribed: RwLock<HashSet<String>>,
    symbol_to_feed: RwLock<HashMap<String, Feed>>,
    latest: RwLock<HashMap<String, Quote>>,
    subscribers: RwLock<Vec<Arc<dyn QuoteSubscriber>>>,
    health: std::sync::RwLock<Option<Arc<FeedHealthMonitor>>>,
    metrics: Metrics,
    ingest_handles: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl StreamManager {
    pub fn new(mapper: Arc<SymbolMapper>, feeds: Vec<Arc<dyn PriceFeed>>, metrics: Metrics) -> Self {
        let feeds: HashMap<Feed, Arc<dyn PriceFeed>> =
            feeds.into_iter().map(|f| (f.name(), f)).collect();
        info!("PriceStreamManager initialized with {} feeds", feeds.len());
        Self {
            mapper,
            feeds,
            feed_status: RwLock::new(HashMap::new()),
            subscribed: RwLock::new(HashSet::new()),
            symbol_to_feed: RwLock::new(HashMap::new()),
            latest: RwLock::new(HashMap::new()),
            subscribers: RwLock::new(Vec::new()),
            health: std::sync::RwLock::new(None),
            metrics,
            ingest_handles: Mutex::new(Vec::new()),
        }
    }

    /// Connects every feed and spawns one ingest worker per connected
    /// feed. A feed that rejects its credentials is marked not configured
    /// and reported once; it is never retried.
    pub async fn initialize(self: &Arc<Self>, sink: &Arc<dyn AlertSink>) {
        info!("Initializing streaming feeds...");

        for (kind, client) in &self.feeds {
            match client.connect().await {
                Ok(()) => {
                    self.feed_status.write().await.insert(*kind, true);
                    let manager = Arc::clone(self);
                    let rx = client.updates();
                    let feed = *kind;
                    let handle = tokio::spawn(async move {
                        Self::run_ingest(manager, feed, rx).await;
                    });
                    self.ingest_handles.lock().await.push(handle);
                    info!("{} stream initialized", kind);
                }
                Err(FeedError::NotConfigured { reason }) => {
                    warn!("{} feed not configured: {}", kind, reason);
                    self.feed_status.write().await.insert(*kind, false);
                    let message = format!("{} feed is not configured: {}", kind, reason);
                    if let Err(e) = sink.admin_notification(&message).await {
                        error!("Failed to send admin notification: {}", e);
                    }
                }
                Err(e) => {
                    error!("Failed to initialize {} stream: {}", kind, e);
                    self.feed_status.write().await.insert(*kind, false);
                }
            }
        }

        let connected = self
            .feed_status
            .read()
            .await
            .values()
            .filter(|up| **up)
            .count();
        info!(
            "Stream initialization complete: {}/{} feeds connected",
            connected,
            self.feeds.len()
        );
    }

    async fn run_ingest(manager: Arc<StreamManager>, feed: Feed, mut rx: broadcast::Receiver<FeedTick>) {
        loop {
            match rx.recv().await {
                Ok(tick) => manager.process_tick(feed, tick).await,
                Err(broadcast::error::RecvError::Lagged(dropped)) => {
                    warn!("{} ingest lagged, dropped {} ticks", feed, dropped);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    warn!("{} tick channel closed, ingest worker exiting", feed);
                    break;
                }
            }
        }
    }

    async fn process_tick(&self, feed: Feed, tick: FeedTick) {
        let Some(symbol) = self.mapper.from_feed(&tick.feed_symbol, feed) else {
            debug!("Unmappable {} symbol: {}", feed, tick.feed_symbol);
            return;
        };

        // The routing table is the source of truth; a tick for a symbol
        // owned by another feed is dropped without comment
        {
            let routing = self.symbol_to_feed.read().await;
            match routing.get(&symbol) {
                Some(owner) if *owner == feed => {}
                _ => return,
            }
        }

        let quote = Quote::new(symbol, tick.bid, tick.ask, tick.timestamp, feed);

        if let Some(health) = self.health.read().expect("health slot poisoned").as_ref() {
            health.update_last_seen(&quote.symbol, feed);
        }

        self.latest
            .write()
            .await
            .insert(quote.symbol.clone(), quote.clone());

        self.metrics
            .price_updates_total
            .with_label_values(&[feed.as_str()])
            .inc();

        // Sequential fan-out preserves per-symbol ordering as observed here
        let subscribers = self.subscribers.read().await.clone();
        for subscriber in &subscribers {
            subscriber.on_quote(&quote).await;
        }
    }

    /// Subscribes an internal symbol, routing it to its best feed. The
    /// subscription is recorded even when the feed is currently down so it
    /// re-applies on reconnect.
    pub async fn subscribe(&self, symbol: &str) -> Result<(), MapError> {
        let symbol = symbol.to_uppercase();
        if self.subscribed.read().await.contains(&symbol) {
            debug!("Already subscribed to {}", symbol);
            return Ok(());
        }

        let feed = self.mapper.best_feed(&symbol)?;
        let Some(feed_symbol) = self.mapper.to_feed(&symbol, feed) else {
            return Err(MapError::Unmapped { symbol });
        };

        self.subscribed.write().await.insert(symbol.clone());
        self.symbol_to_feed.write().await.insert(symbol.clone(), feed);
        self.metrics
            .subscribed_symbols
            .set(self.subscribed.read().await.len() as f64);

        let connected = *self.feed_status.read().await.get(&feed).unwrap_or(&false);
        if !connected {
            warn!(
                "Feed {} not available for {}; subscription recorded for reconnect",
                feed, symbol
            );
            return Ok(());
        }

        if let Some(client) = self.feeds.get(&feed) {
            match client.subscribe(&feed_symbol).await {
                Ok(()) => info!("Subscribed to {} via {} (as {})", symbol, feed, feed_symbol),
                Err(e) => error!("Failed to subscribe to {}: {}", symbol, e),
            }
        }
        Ok(())
    }

    pub async fn bulk_subscribe(&self, symbols: &[String]) {
        info!("Bulk subscribing to {} symbols", symbols.len());

        let mut per_feed: HashMap<Feed, Vec<String>> = HashMap::new();
        for symbol in symbols {
            let symbol = symbol.to_uppercase();
            if self.subscribed.read().await.contains(&symbol) {
                continue;
            }
            let feed = match self.mapper.best_feed(&symbol) {
                Ok(feed) => feed,
                Err(e) => {
                    error!("Cannot subscribe {}: {}", symbol, e);
                    continue;
                }
            };
            let Some(feed_symbol) = self.mapper.to_feed(&symbol, feed) else {
                error!("Cannot map {} to {}", symbol, feed);
                continue;
            };

            self.subscribed.write().await.insert(symbol.clone());
            self.symbol_to_feed.write().await.insert(symbol, feed);
            per_feed.entry(feed).or_default().push(feed_symbol);
        }

        self.metrics
            .subscribed_symbols
            .set(self.subscribed.read().await.len() as f64);

        for (feed, feed_symbols) in per_feed {
            let connected = *self.feed_status.read().await.get(&feed).unwrap_or(&false);
            if !connected {
                warn!(
                    "Feed {} down; {} subscriptions recorded for reconnect",
                    feed,
                    feed_symbols.len()
                );
                continue;
            }
            if let Some(client) = self.feeds.get(&feed) {
                match client.bulk_subscribe(&feed_symbols).await {
                    Ok(()) => info!("Bulk subscribed {} symbols to {}", feed_symbols.len(), feed),
                    Err(e) => error!("Failed to bulk subscribe to {}: {}", feed, e),
                }
            }
        }
    }

    pub async fn unsubscribe(&self, symbol: &str) {
        let symbol = symbol.to_uppercase();
        if !self.subscribed.read().await.contains(&symbol) {
            return;
        }

        let feed = self.symbol_to_feed.read().await.get(&symbol).copied();
        if let Some(feed) = feed
            && let Some(client) = self.feeds.get(&feed)
            && let Some(feed_symbol) = self.mapper.to_feed(&symbol, feed)
        {
            if let Err(e) = client.unsubscribe(&feed_symbol).await {
                error!("Failed to unsubscribe from {}: {}", symbol, e);
            } else {
                info!("Unsubscribed from {}", symbol);
            }
        }

        self.subscribed.write().await.remove(&symbol);
        self.symbol_to_feed.write().await.remove(&symbol);
        self.latest.write().await.remove(&symbol);
        self.metrics
            .subscribed_symbols
            .set(self.subscribed.read().await.len() as f64);
    }

    /// Non-blocking cache read, except that a freshly subscribed symbol is
    /// given up to two seconds for its first tick to land.
    pub async fn latest_price(&self, symbol: &str) -> Option<Quote> {
        let symbol = symbol.to_uppercase();
        if let Some(quote) = self.latest.read().await.get(&symbol) {
            return Some(quote.clone());
        }

        if !self.subscribed.read().await.contains(&symbol) {
            debug!("Symbol {} not subscribed", symbol);
            return None;
        }

        let deadline = FIRST_PRICE_WAIT.as_millis() / FIRST_PRICE_POLL.as_millis();
        for _ in 0..deadline {
            tokio::time::sleep(FIRST_PRICE_POLL).await;
            if let Some(quote) = self.latest.read().await.get(&symbol) {
                return Some(quote.clone());
            }
        }

        warn!("Subscribed to {} but no price after 2 seconds", symbol);
        None
    }

    pub async fn add_subscriber(&self, subscriber: Arc<dyn QuoteSubscriber>) {
        self.subscribers.write().await.push(subscriber);
        info!("Added stream subscriber");
    }

    pub fn set_health_monitor(&self, health: Arc<FeedHealthMonitor>) {
        *self.health.write().expect("health slot poisoned") = Some(health);
        info!("Health monitor connected to stream manager");
    }

    /// Reconnects one feed and re-applies every subscription routed to it.
    pub async fn reconnect_feed(&self, feed: Feed) -> bool {
        let Some(client) = self.feeds.get(&feed) else {
            return false;
        };

        info!("Reconnecting {}...", feed);
        self.metrics
            .feed_reconnects_total
            .with_label_values(&[feed.as_str()])
            .inc();

        match client.reconnect().await {
            Ok(()) => {
                self.feed_status.write().await.insert(feed, true);

                let feed_symbols: Vec<String> = {
                    let routing = self.symbol_to_feed.read().await;
                    routing
                        .iter()
                        .filter(|(_, owner)| **owner == feed)
                        .filter_map(|(symbol, _)| self.mapper.to_feed(symbol, feed))
                        .collect()
                };
                if !feed_symbols.is_empty()
                    && let Err(e) = client.bulk_subscribe(&feed_symbols).await
                {
                    error!("Failed to re-apply subscriptions on {}: {}", feed, e);
                }
                info!("{} reconnected", feed);
                true
            }
            Err(e) => {
                error!("Failed to reconnect {}: {}", feed, e);
                self.feed_status.write().await.insert(feed, false);
                false
            }
        }
    }

    pub async fn reconnect_all(&self) -> HashMap<Feed, bool> {
        info!("Reconnecting all streaming feeds...");
        let mut results = HashMap::new();
        for feed in self.feeds.keys().copied().collect::<Vec<_>>() {
            let ok = self.reconnect_feed(feed).await;
            results.insert(feed, ok);
        }
        let connected = results.values().filter(|ok| **ok).count();
        info!(
            "Reconnection complete: {}/{} feeds connected",
            connected,
            results.len()
        );
        results
    }

    pub async fn subscribed_symbols(&self) -> HashSet<String> {
        self.subscribed.read().await.clone()
    }

    pub async fn stats(&self) -> StreamStats {
        let status = self.feed_status.read().await;
        StreamStats {
            subscribed_symbols: self.subscribed.read().await.len(),
            connected_feeds: status.values().filter(|up| **up).count(),
            total_feeds: self.feeds.len(),
            reconnects: self
                .feeds
                .iter()
                .map(|(kind, client)| (*kind, client.reconnect_count()))
                .collect(),
        }
    }

    pub async fn shutdown(&self) {
        info!("Shutting down streaming feeds...");
        for handle in self.ingest_handles.lock().await.drain(..) {
            handle.abort();
        }
        self.subscribed.write().await.clear();
        self.symbol_to_feed.write().await.clear();
    }
}
