//! Operator command dispatch. The chat front-end parses text into
//! `Command` values; this layer checks the caller's privileges, routes the
//! intent to the owning component, and answers with a human-readable
//! outcome.

use crate::application::stream::manager::StreamManager;
use crate::application::system::shutdown_service::ShutdownService;
use crate::application::tracking::tracker::SignalTracker;
use crate::domain::errors::StoreError;
use crate::domain::expiry::calculate_expiry;
use crate::domain::market::{AssetClass, Feed};
use crate::domain::ports::{Clock, SignalStore};
use crate::domain::signal::{ChangeType, ExpiryType, NewSignal, SignalStatus};
use crate::infrastructure::config::alert_distances::DistanceType;
use crate::infrastructure::config::tp::TpUnit;
use crate::infrastructure::config::{AlertDistanceConfig, SettingsStore, TpConfig};
use crate::infrastructure::news::NewsManager;
use crate::infrastructure::symbols::SymbolMapper;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct CallerIdentity {
    pub name: String,
    pub is_admin: bool,
}

#[derive(Debug, Clone)]
pub enum ConfigTarget {
    Symbol(String),
    Default(AssetClass),
}

#[derive(Debug, Clone, Copy)]
pub enum SpreadBufferAction {
    On,
    Off,
    Status,
}

#[derive(Debug, Clone)]
pub enum Command {
    AddSignal {
        signal: NewSignal,
    },
    DeleteSignal {
        signal_id: i64,
    },
    Info {
        signal_id: i64,
    },
    SetStatus {
        signal_id: i64,
        status: SignalStatus,
    },
    SetExpiry {
        signal_id: i64,
        expiry_type: ExpiryType,
        custom_time: Option<DateTime<Utc>>,
    },
    Cancel {
        signal_id: i64,
    },
    ClearAll,
    SpreadBuffer {
        action: SpreadBufferAction,
    },
    SetAlertDistance {
        target: ConfigTarget,
        value: Decimal,
        distance_type: DistanceType,
    },
    RemoveAlertDistance {
        symbol: String,
    },
    ShowAlertDistances {
        symbol: Option<String>,
    },
    SetTp {
        target: ConfigTarget,
        value: Decimal,
        unit: TpUnit,
        scalp: bool,
    },
    RemoveTp {
        symbol: String,
        scalp: bool,
    },
    ScheduleNews {
        category: String,
        news_time: DateTime<Utc>,
        window_minutes: i64,
    },
    RemoveNews {
        event_id: Option<i64>,
    },
    ListNews,
    ReconnectFeed {
        feed: Option<Feed>,
    },
    ReloadConfigs,
    Shutdown,
}

impl Command {
    /// Commands only an admin caller may issue. Checked before dispatch.
    fn requires_admin(&self) -> bool {
        matches!(
            self,
            Command::ClearAll | Command::Shutdown | Command::ReconnectFeed { .. }
        )
    }
}

#[derive(Debug, Clone)]
pub struct CommandOutcome {
    pub ok: bool,
    pub message: String,
}

impl CommandOutcome {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: message.into(),
        }
    }

    fn fail(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
        }
    }
}

pub struct ControlPlane {
    store: Arc<dyn SignalStore>,
    tracker: Arc<SignalTracker>,
    stream: Arc<StreamManager>,
    news: Arc<NewsManager>,
    alert_distances: Arc<AlertDistanceConfig>,
    tp: Arc<TpConfig>,
    settings: Arc<SettingsStore>,
    mapper: Arc<SymbolMapper>,
    clock: Arc<dyn Clock>,
    shutdown: Arc<ShutdownService>,
}

impl ControlPlane {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn SignalStore>,
        tracker: Arc<SignalTracker>,
        stream: Arc<StreamManager>,
        news: Arc<NewsManager>,
        alert_distances: Arc<AlertDistanceConfig>,
        tp: Arc<TpConfig>,
        settings: Arc<SettingsStore>,
        mapper: Arc<SymbolMapper>,
        clock: Arc<dyn Clock>,
        shutdown: Arc<ShutdownService>,
    ) -> Self {
        Self {
            store,
            tracker,
            stream,
            news,
            alert_distances,
            tp,
            settings,
            mapper,
            clock,
            shutdown,
        }
    }

    pub async fn dispatch(&self, caller: &CallerIdentity, command: Command) -> CommandOutcome {
        if command.requires_admin() && !caller.is_admin {
            warn!("{} attempted admin command without privileges", caller.name);
            return CommandOutcome::fail("This command requires admin privileges");
        }

        match command {
            Command::AddSignal { signal } => self.add_signal(caller, signal).await,
            Command::DeleteSignal { signal_id } => self.delete_signal(signal_id).await,
            Command::Info { signal_id } => self.info(signal_id).await,
            Command::SetStatus { signal_id, status } => {
                self.set_status(caller, signal_id, status).await
            }
            Command::SetExpiry {
                signal_id,
                expiry_type,
                custom_time,
            } => self.set_expiry(signal_id, expiry_type, custom_time).await,
            Command::Cancel { signal_id } => {
                self.set_status(caller, signal_id, SignalStatus::Cancelled).await
            }
            Command::ClearAll => self.clear_all(caller).await,
            Command::SpreadBuffer { action } => self.spread_buffer(action),
            Command::SetAlertDistance {
                target,
                value,
                distance_type,
            } => self.set_alert_distance(caller, target, value, distance_type),
            Command::RemoveAlertDistance { symbol } => self.remove_alert_distance(&symbol),
            Command::ShowAlertDistances { symbol } => self.show_alert_distances(symbol.as_deref()),
            Command::SetTp {
                target,
                value,
                unit,
                scalp,
            } => self.set_tp(caller, target, value, unit, scalp),
            Command::RemoveTp { symbol, scalp } => self.remove_tp(&symbol, scalp),
            Command::ScheduleNews {
                category,
                news_time,
                window_minutes,
            } => self.schedule_news(caller, &category, news_time, window_minutes),
            Command::RemoveNews { event_id } => self.remove_news(event_id),
            Command::ListNews => self.list_news(),
            Command::ReconnectFeed { feed } => self.reconnect_feed(feed).await,
            Command::ReloadConfigs => self.reload_configs(),
            Command::Shutdown => {
                info!("Shutdown requested by {}", caller.name);
                self.shutdown.signal();
                CommandOutcome::ok("Shutting down")
            }
        }
    }

    async fn add_signal(&self, caller: &CallerIdentity, mut signal: NewSignal) -> CommandOutcome {
        if let Err(e) = self.mapper.validate(&signal.instrument) {
            return CommandOutcome::fail(format!("Rejected: {e}"));
        }
        if signal.limit_prices.is_empty() {
            return CommandOutcome::fail("A signal needs at least one limit");
        }

        if signal.expiry_type != ExpiryType::Custom {
            signal.expiry_time = calculate_expiry(signal.expiry_type, self.clock.now_utc());
        }

        match self.store.insert_signal(&signal).await {
            Ok(signal_id) => {
                info!("{} added signal {}", caller.name, signal_id);
                self.tracker.refresh_signals().await;
                CommandOutcome::ok(format!(
                    "Signal #{} created: {} {} with {} limit(s)",
                    signal_id,
                    signal.instrument.to_uppercase(),
                    signal.direction,
                    signal.limit_prices.len()
                ))
            }
            Err(StoreError::DuplicateMessage { message_id }) => {
                CommandOutcome::fail(format!("A signal for message {message_id} already exists"))
            }
            Err(e) => CommandOutcome::fail(format!("Failed to create signal: {e}")),
        }
    }

    async fn delete_signal(&self, signal_id: i64) -> CommandOutcome {
        self.tracker.remove_from_tracking(signal_id).await;
        match self.store.delete_signal(signal_id).await {
            Ok(true) => CommandOutcome::ok(format!("Signal #{signal_id} deleted")),
            Ok(false) => CommandOutcome::fail(format!("Signal #{signal_id} not found")),
            Err(e) => CommandOutcome::fail(format!("Failed to delete signal: {e}")),
        }
    }

    async fn info(&self, signal_id: i64) -> CommandOutcome {
        match self.store.get_signal(signal_id).await {
            Ok(Some(view)) => {
                let signal = &view.signal;
                let pending: Vec<String> = view
                    .pending_limits
                    .iter()
                    .map(|l| format!("#{} @ {}", l.sequence_number, l.price_level))
                    .collect();
                CommandOutcome::ok(format!(
                    "Signal #{}: {} {} | status {} | SL {} | {}/{} limits hit | pending: [{}] | expiry {}",
                    signal.id,
                    signal.instrument,
                    signal.direction,
                    signal.status,
                    signal.stop_loss,
                    signal.limits_hit,
                    signal.total_limits,
                    pending.join(", "),
                    signal
                        .expiry_time
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_else(|| "none".to_string()),
                ))
            }
            Ok(None) => CommandOutcome::fail(format!("Signal #{signal_id} not found")),
            Err(e) => CommandOutcome::fail(format!("Failed to load signal: {e}")),
        }
    }

    async fn set_status(
        &self,
        caller: &CallerIdentity,
        signal_id: i64,
        status: SignalStatus,
    ) -> CommandOutcome {
        let reason = format!("Set by {}", caller.name);
        match self
            .store
            .transition_status(signal_id, status, ChangeType::Manual, &reason)
            .await
        {
            Ok(true) => {
                self.tracker.refresh_signals().await;
                CommandOutcome::ok(format!("Signal #{signal_id} set to {status}"))
            }
            Ok(false) => CommandOutcome::ok(format!("Signal #{signal_id} already {status}")),
            Err(e) => CommandOutcome::fail(format!("Failed to set status: {e}")),
        }
    }

    async fn set_expiry(
        &self,
        signal_id: i64,
        expiry_type: ExpiryType,
        custom_time: Option<DateTime<Utc>>,
    ) -> CommandOutcome {
        let expiry_time = match expiry_type {
            ExpiryType::Custom => {
                let Some(time) = custom_time else {
                    return CommandOutcome::fail("Custom expiry requires a timestamp");
                };
                Some(time)
            }
            other => calculate_expiry(other, self.clock.now_utc()),
        };

        match self.store.set_expiry(signal_id, expiry_type, expiry_time).await {
            Ok(true) => CommandOutcome::ok(format!(
                "Signal #{} expiry set to {}",
                signal_id,
                expiry_type.as_str()
            )),
            Ok(false) => {
                CommandOutcome::fail(format!("Signal #{signal_id} is closed; expiry unchanged"))
            }
            Err(e) => CommandOutcome::fail(format!("Failed to set expiry: {e}")),
        }
    }

    async fn clear_all(&self, caller: &CallerIdentity) -> CommandOutcome {
        let reason = format!("Clear-all by {}", caller.name);
        match self.store.cancel_all_open(&reason).await {
            Ok(cancelled) => {
                self.tracker.refresh_signals().await;
                CommandOutcome::ok(format!("Cancelled {} open signal(s)", cancelled.len()))
            }
            Err(e) => CommandOutcome::fail(format!("Clear-all failed: {e}")),
        }
    }

    fn spread_buffer(&self, action: SpreadBufferAction) -> CommandOutcome {
        match action {
            SpreadBufferAction::Status => {
                let enabled = self.settings.spread_buffer_enabled();
                CommandOutcome::ok(format!(
                    "Spread buffer is {}",
                    if enabled { "ON" } else { "OFF" }
                ))
            }
            SpreadBufferAction::On => match self.settings.set_spread_buffer(true) {
                Ok(()) => CommandOutcome::ok("Spread buffer enabled"),
                Err(e) => CommandOutcome::fail(format!("Failed to enable spread buffer: {e}")),
            },
            SpreadBufferAction::Off => match self.settings.set_spread_buffer(false) {
                Ok(()) => CommandOutcome::ok("Spread buffer disabled"),
                Err(e) => CommandOutcome::fail(format!("Failed to disable spread buffer: {e}")),
            },
        }
    }

    fn set_alert_distance(
        &self,
        caller: &CallerIdentity,
        target: ConfigTarget,
        value: Decimal,
        distance_type: DistanceType,
    ) -> CommandOutcome {
        let result = match &target {
            ConfigTarget::Symbol(symbol) => {
                self.alert_distances
                    .set_override(symbol, value, distance_type, &caller.name)
            }
            ConfigTarget::Default(class) => {
                self.alert_distances.set_default(*class, value, distance_type)
            }
        };
        match result {
            Ok(()) => CommandOutcome::ok(format!("Alert distance set to {value} {distance_type}")),
            Err(e) => CommandOutcome::fail(format!("Failed to set alert distance: {e}")),
        }
    }

    fn remove_alert_distance(&self, symbol: &str) -> CommandOutcome {
        match self.alert_distances.remove_override(symbol) {
            Ok(true) => CommandOutcome::ok(format!(
                "Removed alert distance override for {}",
                symbol.to_uppercase()
            )),
            Ok(false) => CommandOutcome::fail(format!(
                "No alert distance override for {}",
                symbol.to_uppercase()
            )),
            Err(e) => CommandOutcome::fail(format!("Failed to remove override: {e}")),
        }
    }

    fn show_alert_distances(&self, symbol: Option<&str>) -> CommandOutcome {
        match symbol {
            Some(symbol) => {
                // Display the resolved distance at a nominal price of zero;
                // percentage entries show their raw configured value
                let snapshot = self.alert_distances.snapshot();
                let upper = symbol.to_uppercase();
                let entry = snapshot.overrides.get(&upper);
                match entry {
                    Some(entry) => CommandOutcome::ok(format!(
                        "{}: {} {} (override set by {})",
                        upper,
                        entry.value,
                        entry.distance_type,
                        entry.set_by.as_deref().unwrap_or("unknown")
                    )),
                    None => CommandOutcome::ok(format!("{upper}: using asset-class default")),
                }
            }
            None => {
                let snapshot = self.alert_distances.snapshot();
                let mut lines: Vec<String> = snapshot
                    .defaults
                    .iter()
                    .map(|(class, entry)| {
                        format!("{}: {} {}", class, entry.value, entry.distance_type)
                    })
                    .collect();
                lines.sort();
                if !snapshot.overrides.is_empty() {
                    lines.push(format!("{} override(s) set", snapshot.overrides.len()));
                }
                CommandOutcome::ok(lines.join(" | "))
            }
        }
    }

    fn set_tp(
        &self,
        caller: &CallerIdentity,
        target: ConfigTarget,
        value: Decimal,
        unit: TpUnit,
        scalp: bool,
    ) -> CommandOutcome {
        let result = match &target {
            ConfigTarget::Symbol(symbol) => {
                self.tp.set_override(symbol, value, unit, &caller.name, scalp)
            }
            ConfigTarget::Default(class) => self.tp.set_default(*class, value, unit, scalp),
        };
        match result {
            Ok(()) => CommandOutcome::ok(format!(
                "{}TP threshold set to {} {}",
                if scalp { "Scalp " } else { "" },
                value,
                unit
            )),
            Err(e) => CommandOutcome::fail(format!("Failed to set TP: {e}")),
        }
    }

    fn remove_tp(&self, symbol: &str, scalp: bool) -> CommandOutcome {
        match self.tp.remove_override(symbol, scalp) {
            Ok(true) => CommandOutcome::ok(format!(
                "Removed {}TP override for {}",
                if scalp { "scalp " } else { "" },
                symbol.to_uppercase()
            )),
            Ok(false) => {
                CommandOutcome::fail(format!("No TP override for {}", symbol.to_uppercase()))
            }
            Err(e) => CommandOutcome::fail(format!("Failed to remove TP override: {e}")),
        }
    }

    fn schedule_news(
        &self,
        caller: &CallerIdentity,
        category: &str,
        news_time: DateTime<Utc>,
        window_minutes: i64,
    ) -> CommandOutcome {
        if window_minutes <= 0 {
            return CommandOutcome::fail("News window must be positive");
        }
        let event = self.news.add(category, news_time, window_minutes, &caller.name);
        CommandOutcome::ok(format!("Scheduled {event}"))
    }

    fn remove_news(&self, event_id: Option<i64>) -> CommandOutcome {
        match event_id {
            Some(id) => {
                if self.news.remove(id) {
                    CommandOutcome::ok(format!("Removed news event #{id}"))
                } else {
                    CommandOutcome::fail(format!("News event #{id} not found"))
                }
            }
            None => {
                let events = self.news.all();
                let count = events.len();
                for event in events {
                    self.news.remove(event.event_id);
                }
                CommandOutcome::ok(format!("Removed {count} news event(s)"))
            }
        }
    }

    fn list_news(&self) -> CommandOutcome {
        let events = self.news.all();
        if events.is_empty() {
            return CommandOutcome::ok("No scheduled news events");
        }
        let lines: Vec<String> = events.iter().map(|e| e.to_string()).collect();
        CommandOutcome::ok(lines.join(" | "))
    }

    async fn reconnect_feed(&self, feed: Option<Feed>) -> CommandOutcome {
        match feed {
            Some(feed) => {
                if self.stream.reconnect_feed(feed).await {
                    CommandOutcome::ok(format!("{feed} reconnected"))
                } else {
                    CommandOutcome::fail(format!("{feed} reconnect failed"))
                }
            }
            None => {
                let results = self.stream.reconnect_all().await;
                let up = results.values().filter(|ok| **ok).count();
                CommandOutcome::ok(format!("Reconnected {}/{} feeds", up, results.len()))
            }
        }
    }

    fn reload_configs(&self) -> CommandOutcome {
        self.alert_distances.reload();
        self.tp.reload();
        self.mapper.reload();
        self.settings.invalidate();
        info!("Configuration files reloaded");
        CommandOutcome::ok("Configuration reloaded")
    }
}
