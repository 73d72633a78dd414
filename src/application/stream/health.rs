//! Feed liveness monitor. Tracks last-seen timestamps per feed-symbol,
//! classifies each feed healthy / degraded / down against the market-hours
//! calendar, drives bounded reconnects and notifies the admin with a
//! cooldown so a flapping feed cannot spam.

use crate::application::stream::manager::StreamManager;
use crate::domain::market::{AssetClass, Feed};
use crate::domain::ports::{AlertSink, Clock};
use crate::infrastructure::symbols::asset_class;
use chrono::{DateTime, Datelike, Duration as ChronoDuration, NaiveDate, NaiveTime, Utc, Weekday};
use chrono_tz::America::New_York;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedStatus {
    Healthy,
    Degraded,
    Down,
    Idle,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketWindow {
    pub open_time: String,
    pub close_time: String,
}

impl Default for MarketWindow {
    fn default() -> Self {
        Self {
            open_time: "09:30".to_string(),
            close_time: "17:00".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketHoursConfig {
    pub crypto_always_open: bool,
    pub stocks: MarketWindow,
    pub forex: MarketWindow,
}

impl Default for MarketHoursConfig {
    fn default() -> Self {
        Self {
            crypto_always_open: true,
            stocks: MarketWindow::default(),
            forex: MarketWindow {
                open_time: "18:00".to_string(),
                close_time: "17:00".to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub check_interval_seconds: u64,
    pub stale_threshold_seconds: i64,
    pub max_reconnect_attempts: u32,
    pub reconnect_delay_seconds: u64,
    pub alert_cooldown_minutes: i64,
    pub startup_grace_period_seconds: i64,
    pub market_hours: MarketHoursConfig,
    pub us_market_holidays: Vec<NaiveDate>,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            check_interval_seconds: 60,
            stale_threshold_seconds: 300,
            max_reconnect_attempts: 3,
            reconnect_delay_seconds: 10,
            alert_cooldown_minutes: 15,
            startup_grace_period_seconds: 120,
            market_hours: MarketHoursConfig::default(),
            us_market_holidays: Vec::new(),
        }
    }
}

impl HealthConfig {
    pub fn load(path: impl AsRef<Path>) -> Self {
        match std::fs::read_to_string(path.as_ref()) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(config) => config,
                Err(e) => {
                    error!("Invalid health config: {}, using defaults", e);
                    Self::default()
                }
            },
            Err(_) => {
                debug!(
                    "Health config not found at {}, using defaults",
                    path.as_ref().display()
                );
                Self::default()
            }
        }
    }

    fn parse_time(raw: &str, fallback: NaiveTime) -> NaiveTime {
        NaiveTime::parse_from_str(raw, "%H:%M").unwrap_or(fallback)
    }

    /// Whether the market for the asset class should currently be serving
    /// ticks. The daily spread hour counts as open for liveness purposes.
    pub fn is_market_open(&self, class: AssetClass, now: DateTime<Utc>) -> bool {
        let ny = now.with_timezone(&New_York);
        let time = ny.time();

        match class {
            AssetClass::Crypto => self.market_hours.crypto_always_open,
            AssetClass::Stocks => {
                if matches!(ny.weekday(), Weekday::Sat | Weekday::Sun) {
                    return false;
                }
                if self.us_market_holidays.contains(&ny.date_naive()) {
                    return false;
                }
                let open = Self::parse_time(
                    &self.market_hours.stocks.open_time,
                    NaiveTime::from_hms_opt(9, 30, 0).unwrap_or_default(),
                );
                let close = Self::parse_time(
                    &self.market_hours.stocks.close_time,
                    NaiveTime::from_hms_opt(17, 0, 0).unwrap_or_default(),
                );
                open <= time && time < close
            }
            // Forex, metals and indices share the Sun 18:00 -> Fri 17:00
            // New York session
            _ => {
                let open = Self::parse_time(
                    &self.market_hours.forex.open_time,
                    NaiveTime::from_hms_opt(18, 0, 0).unwrap_or_default(),
                );
                let close = Self::parse_time(
                    &self.market_hours.forex.close_time,
                    NaiveTime::from_hms_opt(17, 0, 0).unwrap_or_default(),
                );
                match ny.weekday() {
                    Weekday::Sat => false,
                    Weekday::Sun => time >= open,
                    Weekday::Fri => time < close,
                    _ => true,
                }
            }
        }
    }
}

struct FeedState {
    status: FeedStatus,
    reconnect_attempts: u32,
    last_alert: Option<DateTime<Utc>>,
}

impl Default for FeedState {
    fn default() -> Self {
        Self {
            status: FeedStatus::Idle,
            reconnect_attempts: 0,
            last_alert: None,
        }
    }
}

pub struct FeedHealthMonitor {
    stream: Arc<StreamManager>,
    sink: Arc<dyn AlertSink>,
    clock: Arc<dyn Clock>,
    config: HealthConfig,
    started_at: DateTime<Utc>,
    last_seen: Mutex<HashMap<Feed, HashMap<String, DateTime<Utc>>>>,
    states: Mutex<HashMap<Feed, FeedState>>,
}

impl FeedHealthMonitor {
    pub fn new(
        stream: Arc<StreamManager>,
        sink: Arc<dyn AlertSink>,
        clock: Arc<dyn Clock>,
        config: HealthConfig,
    ) -> Self {
        let started_at = clock.now_utc();
        info!("FeedHealthMonitor initialized");
        Self {
            stream,
            sink,
            clock,
            config,
            started_at,
            last_seen: Mutex::new(HashMap::new()),
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Called by the stream manager on every canonical update.
    pub fn update_last_seen(&self, symbol: &str, feed: Feed) {
        self.last_seen
            .lock()
            .expect("last_seen lock poisoned")
            .entry(feed)
            .or_default()
            .insert(symbol.to_string(), self.clock.now_utc());
    }

    pub fn feed_status(&self, feed: Feed) -> FeedStatus {
        self.states
            .lock()
            .expect("health states lock poisoned")
            .get(&feed)
            .map(|s| s.status)
            .unwrap_or(FeedStatus::Idle)
    }

    pub fn spawn_worker(
        self: &Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        let monitor = Arc::clone(self);
        let check_interval = Duration::from_secs(monitor.config.check_interval_seconds);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(check_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            interval.tick().await;
            info!("Feed health monitoring started");
            loop {
                tokio::select! {
                    _ = interval.tick() => monitor.check_feed_health().await,
                    _ = shutdown.changed() => {
                        debug!("Feed health monitor stopping");
                        break;
                    }
                }
            }
        })
    }

    pub async fn check_feed_health(&self) {
        let now = self.clock.now_utc();

        // A cold cache right after startup would read as universally stale
        if now - self.started_at
            < ChronoDuration::seconds(self.config.startup_grace_period_seconds)
        {
            debug!("Within startup grace period, skipping health checks");
            return;
        }

        for feed in Feed::ALL {
            self.check_feed(feed, now).await;
        }
    }

    async fn check_feed(&self, feed: Feed, now: DateTime<Utc>) {
        let seen: Vec<(String, DateTime<Utc>)> = {
            let last_seen = self.last_seen.lock().expect("last_seen lock poisoned");
            match last_seen.get(&feed) {
                Some(map) => map.iter().map(|(s, t)| (s.clone(), *t)).collect(),
                None => Vec::new(),
            }
        };

        if seen.is_empty() {
            self.set_status(feed, FeedStatus::Idle);
            return;
        }

        let stale_threshold = ChronoDuration::seconds(self.config.stale_threshold_seconds);
        let stale: Vec<String> = seen
            .iter()
            .filter(|(symbol, last_update)| {
                now - *last_update > stale_threshold
                    && self.config.is_market_open(asset_class(symbol), now)
            })
            .map(|(symbol, _)| symbol.clone())
            .collect();

        if stale.is_empty() {
            let recovered = {
                let states = self.states.lock().expect("health states lock poisoned");
                matches!(
                    states.get(&feed).map(|s| s.status),
                    Some(FeedStatus::Degraded) | Some(FeedStatus::Down)
                )
            };
            if recovered {
                self.handle_recovery(feed).await;
            }
            let mut states = self.states.lock().expect("health states lock poisoned");
            let state = states.entry(feed).or_default();
            state.status = FeedStatus::Healthy;
            state.reconnect_attempts = 0;
            return;
        }

        if stale.len() * 2 < seen.len() {
            // Under half stale: degraded, observe but do not act
            let was_degraded = self.feed_status(feed) == FeedStatus::Degraded;
            self.set_status(feed, FeedStatus::Degraded);
            if !was_degraded {
                warn!(
                    "{} feed degraded: {}/{} symbols stale",
                    feed,
                    stale.len(),
                    seen.len()
                );
            }
            return;
        }

        self.set_status(feed, FeedStatus::Down);
        self.handle_failure(feed, &stale, seen.len()).await;
    }

    fn set_status(&self, feed: Feed, status: FeedStatus) {
        let mut states = self.states.lock().expect("health states lock poisoned");
        states.entry(feed).or_default().status = status;
    }

    async fn handle_failure(&self, feed: Feed, stale: &[String], total: usize) {
        error!(
            "{} feed failure detected: {}/{} symbols stale",
            feed,
            stale.len(),
            total
        );

        let (attempts, in_cooldown) = {
            let states = self.states.lock().expect("health states lock poisoned");
            let state = states.get(&feed);
            let attempts = state.map(|s| s.reconnect_attempts).unwrap_or(0);
            let in_cooldown = state
                .and_then(|s| s.last_alert)
                .map(|at| {
                    self.clock.now_utc() - at
                        < ChronoDuration::minutes(self.config.alert_cooldown_minutes)
                })
                .unwrap_or(false);
            (attempts, in_cooldown)
        };

        if in_cooldown {
            debug!("Alert cooldown active for {}, skipping", feed);
            return;
        }

        if attempts < self.config.max_reconnect_attempts {
            {
                let mut states = self.states.lock().expect("health states lock poisoned");
                states.entry(feed).or_default().reconnect_attempts += 1;
            }
            info!(
                "Attempting reconnection for {} (attempt {})",
                feed,
                attempts + 1
            );
            tokio::time::sleep(Duration::from_secs(self.config.reconnect_delay_seconds)).await;
            if self.stream.reconnect_feed(feed).await {
                info!("{} reconnection successful", feed);
                return;
            }
            warn!("{} reconnection failed", feed);
        } else {
            error!("{} max reconnection attempts reached", feed);
        }

        let preview: Vec<&str> = stale.iter().take(10).map(String::as_str).collect();
        let message = format!(
            "{} feed down: {}/{} symbols stale ({}{}). Reconnect attempts: {}/{}",
            feed,
            stale.len(),
            total,
            preview.join(", "),
            if stale.len() > 10 { ", ..." } else { "" },
            attempts.min(self.config.max_reconnect_attempts),
            self.config.max_reconnect_attempts
        );
        match self.sink.admin_notification(&message).await {
            Ok(()) => {
                let mut states = self.states.lock().expect("health states lock poisoned");
                states.entry(feed).or_default().last_alert = Some(self.clock.now_utc());
                info!("Sent failure alert to admin for {}", feed);
            }
            Err(e) => error!("Failed to send admin alert: {}", e),
        }
    }

    async fn handle_recovery(&self, feed: Feed) {
        info!("{} feed recovered", feed);
        {
            let mut states = self.states.lock().expect("health states lock poisoned");
            let state = states.entry(feed).or_default();
            state.last_alert = None;
            state.reconnect_attempts = 0;
        }
        let message = format!("{} feed recovered; all symbols receiving updates normally", feed);
        if let Err(e) = self.sink.admin_notification(&message).await {
            error!("Failed to send recovery alert: {}", e);
        }
    }
}
