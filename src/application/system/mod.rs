use anyhow::Result;
use std::sync::Arc;
use tracing::info;

pub mod shutdown_service;

use crate::application::control::ControlPlane;
use crate::application::stream::health::{FeedHealthMonitor, HealthConfig};
use crate::application::stream::manager::StreamManager;
use crate::application::system::shutdown_service::ShutdownService;
use crate::application::tracking::auto_tp::AutoTpMonitor;
use crate::application::tracking::lifecycle::ExpiryService;
use crate::application::tracking::tracker::SignalTracker;
use crate::config::Config;
use crate::domain::ports::{
    AlertSink, Clock, PriceFeed, QuoteSubscriber, SignalStore, SystemClock,
};
use crate::infrastructure::alerts::WebhookAlertSink;
use crate::infrastructure::config::{AlertDistanceConfig, SettingsStore, TpConfig};
use crate::infrastructure::feeds::{BinanceFeed, IcMarketsFeed, OandaFeed};
use crate::infrastructure::news::NewsManager;
use crate::infrastructure::observability::Metrics;
use crate::infrastructure::persistence::{Database, SqliteSignalStore};
use crate::infrastructure::symbols::SymbolMapper;

pub struct SystemHandle {
    pub control: Arc<ControlPlane>,
    pub shutdown: Arc<ShutdownService>,
    pub metrics: Metrics,
}

pub struct Application {
    pub config: Config,
    metrics: Metrics,
    sink: Arc<dyn AlertSink>,
    news: Arc<NewsManager>,
    stream: Arc<StreamManager>,
    tracker: Arc<SignalTracker>,
    health: Arc<FeedHealthMonitor>,
    expiry: Arc<ExpiryService>,
    shutdown: Arc<ShutdownService>,
    control: Arc<ControlPlane>,
}

impl Application {
    pub async fn build(config: Config) -> Result<Self> {
        info!("Building limitwatch application...");

        let metrics = Metrics::new()?;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let database = Database::new(&config.database_url).await?;
        let store: Arc<dyn SignalStore> =
            Arc::new(SqliteSignalStore::new(database.pool.clone()));

        let mapper = Arc::new(SymbolMapper::load(
            config.config_dir.join("symbol_mappings.json"),
        ));
        let settings = Arc::new(SettingsStore::load(config.config_dir.join("settings.json")));
        let alert_distances = Arc::new(AlertDistanceConfig::load(
            config.config_dir.join("alert_distances.json"),
        ));
        let tp = Arc::new(TpConfig::load(
            config.config_dir.join("tp_configuration.json"),
        ));
        let health_config = HealthConfig::load(config.config_dir.join("health_config.json"));
        let news = Arc::new(NewsManager::load(
            config.config_dir.join("news_events.json"),
            clock.clone(),
        ));

        let sink: Arc<dyn AlertSink> =
            Arc::new(WebhookAlertSink::new(config.alert_webhook_url.clone()));

        let feeds: Vec<Arc<dyn PriceFeed>> = vec![
            Arc::new(IcMarketsFeed::new(config.icmarkets_base_url.clone())),
            Arc::new(OandaFeed::new(
                config.oanda_api_base_url.clone(),
                config.oanda_stream_base_url.clone(),
                config.oanda_api_key.clone(),
                config.oanda_account_id.clone(),
            )),
            Arc::new(BinanceFeed::new(config.binance_ws_url.clone())),
        ];

        let stream = Arc::new(StreamManager::new(mapper.clone(), feeds, metrics.clone()));

        let auto_tp = Arc::new(AutoTpMonitor::new(tp.clone(), store.clone(), sink.clone()));

        let tracker = Arc::new(SignalTracker::new(
            store.clone(),
            sink.clone(),
            stream.clone(),
            news.clone(),
            alert_distances.clone(),
            settings.clone(),
            auto_tp,
            clock.clone(),
            metrics.clone(),
        ));

        let health = Arc::new(FeedHealthMonitor::new(
            stream.clone(),
            sink.clone(),
            clock.clone(),
            health_config,
        ));
        stream.set_health_monitor(health.clone());

        let expiry = Arc::new(ExpiryService::new(
            store.clone(),
            tracker.clone(),
            clock.clone(),
        ));

        let shutdown = Arc::new(ShutdownService::new(stream.clone()));

        let control = Arc::new(ControlPlane::new(
            store.clone(),
            tracker.clone(),
            stream.clone(),
            news.clone(),
            alert_distances.clone(),
            tp.clone(),
            settings.clone(),
            mapper.clone(),
            clock.clone(),
            shutdown.clone(),
        ));

        Ok(Self {
            config,
            metrics,
            sink,
            news,
            stream,
            tracker,
            health,
            expiry,
            shutdown,
            control,
        })
    }

    /// Connects the feeds, loads the working set and spawns every periodic
    /// worker. Returns the handle the run loop uses to dispatch commands
    /// and shut down.
    pub async fn start(&self) -> Result<SystemHandle> {
        self.stream.initialize(&self.sink).await;

        let subscriber: Arc<dyn QuoteSubscriber> = self.tracker.clone();
        self.stream.add_subscriber(subscriber).await;

        self.tracker.refresh_signals().await;

        self.shutdown
            .register(self.tracker.spawn_refresh_worker(self.shutdown.subscribe()))
            .await;
        self.shutdown
            .register(self.health.spawn_worker(self.shutdown.subscribe()))
            .await;
        self.shutdown
            .register(self.expiry.spawn_worker(self.shutdown.subscribe()))
            .await;
        self.shutdown
            .register(self.news.spawn_worker(self.sink.clone()))
            .await;

        info!("Signal tracking engine running");

        Ok(SystemHandle {
            control: self.control.clone(),
            shutdown: self.shutdown.clone(),
            metrics: self.metrics.clone(),
        })
    }
}
