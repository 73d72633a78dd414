//! Event-driven signal tracker. Subscribes to the stream bus and drives
//! every signal referencing the ticked instrument through approach / hit /
//! stop-loss evaluation, coordinating news blackouts, the spread-hour
//! guard, persistence, alerts and the auto-TP cache.
//!
//! Locking rule: the working-set lock is never held across a store or sink
//! call. Views are cloned out under the read lock, side effects run
//! lock-free, and in-memory flags are flipped only after the store
//! confirms, so a failed write leaves the tick retryable.

use crate::application::stream::manager::StreamManager;
use crate::application::tracking::auto_tp::AutoTpMonitor;
use crate::application::tracking::checks;
use crate::domain::alerts::{
    ApproachAlert, LimitHitAlert, NewsCancelAlert, SignalSnapshot, SpreadHourCancelAlert,
    StopLossAlert,
};
use crate::domain::calendar::in_spread_hour;
use crate::domain::market::{AssetClass, Quote};
use crate::domain::ports::{AlertSink, Clock, QuoteSubscriber, SignalStore};
use crate::domain::signal::{
    ChangeType, Limit, LimitStatus, Signal, SignalStatus, SignalView,
};
use crate::infrastructure::config::{AlertDistanceConfig, SettingsStore};
use crate::infrastructure::news::NewsManager;
use crate::infrastructure::observability::Metrics;
use crate::infrastructure::symbols::asset_class;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, watch};
use tracing::{debug, error, info};

const STORE_DEADLINE: Duration = Duration::from_secs(5);
const REFRESH_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Default)]
struct TrackerState {
    active: HashMap<i64, SignalView>,
    by_symbol: HashMap<String, Vec<i64>>,
}

enum HitResult {
    /// The signal left the working set (news / spread-hour cancellation)
    SignalClosed,
    /// The hit was persisted and alerted
    Recorded,
    /// Store failure or veto write failure; flags untouched so the next
    /// tick retries
    Dropped,
}

pub struct SignalTracker {
    store: Arc<dyn SignalStore>,
    sink: Arc<dyn AlertSink>,
    stream: Arc<StreamManager>,
    news: Arc<NewsManager>,
    alert_distances: Arc<AlertDistanceConfig>,
    settings: Arc<SettingsStore>,
    auto_tp: Arc<AutoTpMonitor>,
    clock: Arc<dyn Clock>,
    metrics: Metrics,
    state: RwLock<TrackerState>,
}

impl SignalTracker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn SignalStore>,
        sink: Arc<dyn AlertSink>,
        stream: Arc<StreamManager>,
        news: Arc<NewsManager>,
        alert_distances: Arc<AlertDistanceConfig>,
        settings: Arc<SettingsStore>,
        auto_tp: Arc<AutoTpMonitor>,
        clock: Arc<dyn Clock>,
        metrics: Metrics,
    ) -> Self {
        Self {
            store,
            sink,
            stream,
            news,
            alert_distances,
            settings,
            auto_tp,
            clock,
            metrics,
            state: RwLock::new(TrackerState::default()),
        }
    }

    /// Reloads the trackable set from the store, diffs the needed symbols
    /// against the stream subscriptions, and replaces the in-memory views
    /// wholesale so operator-side flag and count mutations are picked up.
    pub async fn refresh_signals(&self) {
        let views = match self.store.get_active_for_tracking().await {
            Ok(views) => views,
            Err(e) => {
                error!("Error loading signals for tracking: {}", e);
                return;
            }
        };

        let new_symbols: HashSet<String> =
            views.iter().map(|v| v.signal.instrument.clone()).collect();
        let old_symbols: HashSet<String> = {
            let state = self.state.read().await;
            state.by_symbol.keys().cloned().collect()
        };

        for symbol in old_symbols.difference(&new_symbols) {
            self.stream.unsubscribe(symbol).await;
        }
        let to_add: Vec<String> = new_symbols.difference(&old_symbols).cloned().collect();
        if !to_add.is_empty() {
            self.stream.bulk_subscribe(&to_add).await;
        }

        let mut active = HashMap::with_capacity(views.len());
        let mut by_symbol: HashMap<String, Vec<i64>> = HashMap::new();
        for view in views {
            by_symbol
                .entry(view.signal.instrument.clone())
                .or_default()
                .push(view.signal.id);
            active.insert(view.signal.id, view);
        }

        let signal_count = active.len();
        let symbol_count = by_symbol.len();
        {
            let mut state = self.state.write().await;
            state.active = active;
            state.by_symbol = by_symbol;
        }

        self.metrics.active_signals.set(signal_count as f64);
        if !to_add.is_empty() || !old_symbols.is_subset(&new_symbols) {
            info!(
                "Signal refresh: {} signals across {} symbols",
                signal_count, symbol_count
            );
        }
    }

    /// Periodic refresh worker (30s), also the mechanism that arms newly
    /// added signals between refreshes triggered by commands.
    pub fn spawn_refresh_worker(
        self: &Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        let tracker = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(REFRESH_INTERVAL);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => tracker.refresh_signals().await,
                    _ = shutdown.changed() => {
                        debug!("Signal refresh worker stopping");
                        break;
                    }
                }
            }
        })
    }

    pub async fn active_count(&self) -> usize {
        self.state.read().await.active.len()
    }

    /// Drops a signal from the working set; unsubscribes its symbol when
    /// no other signal needs it.
    pub async fn remove_from_tracking(&self, signal_id: i64) {
        let symbol_to_unsubscribe = {
            let mut state = self.state.write().await;
            let Some(view) = state.active.remove(&signal_id) else {
                return;
            };
            let symbol = view.signal.instrument;
            let mut drop_symbol = false;
            if let Some(ids) = state.by_symbol.get_mut(&symbol) {
                ids.retain(|id| *id != signal_id);
                drop_symbol = ids.is_empty();
            }
            if drop_symbol {
                state.by_symbol.remove(&symbol);
                Some(symbol)
            } else {
                None
            }
        };

        if let Some(symbol) = symbol_to_unsubscribe {
            self.stream.unsubscribe(&symbol).await;
            info!("Unsubscribed from {} (no active signals)", symbol);
        }
        self.auto_tp.evict(signal_id);
    }

    async fn check_signal(&self, view: SignalView, quote: &Quote) {
        let signal = &view.signal;
        let entry_price = quote.entry_price(signal.direction);
        let settings = self.settings.current();
        let buffer_enabled = settings.spread_buffer_enabled;

        for limit in &view.pending_limits {
            if limit.hit_alert_sent {
                continue;
            }

            let check = checks::check_limit_hit(
                signal.direction,
                entry_price,
                limit.price_level,
                quote.spread,
                buffer_enabled,
            );

            if check.is_hit {
                if check.buffer_allowed {
                    if settings.spread_buffer_config.log_buffer_usage {
                        info!(
                            "Spread buffer allowed hit for {}: price={} limit={} spread={}",
                            signal.instrument, entry_price, limit.price_level, quote.spread
                        );
                    } else {
                        debug!(
                            "Spread buffer allowed hit for {}: price={} limit={} spread={}",
                            signal.instrument, entry_price, limit.price_level, quote.spread
                        );
                    }
                    self.metrics
                        .buffer_allowed_total
                        .with_label_values(&[signal.instrument.as_str()])
                        .inc();
                }
                match self
                    .process_hit(signal, limit, entry_price, quote, buffer_enabled, &view)
                    .await
                {
                    HitResult::SignalClosed => return,
                    HitResult::Recorded | HitResult::Dropped => {}
                }
            } else if limit.sequence_number == 1 && !limit.approaching_alert_sent {
                self.check_approach(signal, limit, entry_price, quote, buffer_enabled)
                    .await;
            }
        }

        // Re-read the signal: a first-limit fill above may have armed the
        // stop loss on this very tick, and a veto may have removed it.
        let current = {
            let state = self.state.read().await;
            state.active.get(&signal.id).map(|v| v.signal.clone())
        };
        let Some(signal_now) = current else {
            return;
        };

        if self.evaluate_stop_loss(&signal_now, quote).await {
            return;
        }

        if self.auto_tp.check_signal(&signal_now, quote).await {
            self.remove_from_tracking(signal_now.id).await;
        }
    }

    /// The hit pipeline of a touched limit: news blackout, then the
    /// spread-hour guard, then the persisted hit. First veto wins.
    async fn process_hit(
        &self,
        signal: &Signal,
        limit: &Limit,
        current_price: Decimal,
        quote: &Quote,
        buffer_enabled: bool,
        view: &SignalView,
    ) -> HitResult {
        // (a) news blackout
        if let Some(event) = self.news.active_for(&signal.instrument) {
            let reason = format!(
                "news: {} @ {}",
                event.category.to_uppercase(),
                event.news_time.format("%H:%M UTC")
            );
            match self.transition(signal.id, SignalStatus::Cancelled, &reason).await {
                Some(true) => {
                    self.metrics
                        .policy_vetoes_total
                        .with_label_values(&["news"])
                        .inc();
                    let alert = NewsCancelAlert {
                        signal: SignalSnapshot::from(signal),
                        trigger_price: current_price,
                        category: event.category.clone(),
                        news_time: event.news_time,
                    };
                    if let Err(e) = self.sink.news_cancel(&alert).await {
                        error!("Failed to send news cancel alert: {}", e);
                    }
                    self.remove_from_tracking(signal.id).await;
                    return HitResult::SignalClosed;
                }
                _ => return HitResult::Dropped,
            }
        }

        // (b) spread-hour cancellation (crypto trades through it)
        if in_spread_hour(self.clock.now_utc())
            && asset_class(&signal.instrument) != AssetClass::Crypto
        {
            match self
                .transition(signal.id, SignalStatus::Cancelled, "spread hour")
                .await
            {
                Some(true) => {
                    self.metrics
                        .policy_vetoes_total
                        .with_label_values(&["spread_hour"])
                        .inc();
                    let alert = SpreadHourCancelAlert {
                        signal: SignalSnapshot::from(signal),
                        trigger_price: current_price,
                        pending_limits: view
                            .pending_limits
                            .iter()
                            .filter(|l| l.status == LimitStatus::Pending)
                            .map(|l| l.price_level)
                            .collect(),
                    };
                    if let Err(e) = self.sink.spread_hour_cancel(&alert).await {
                        error!("Failed to send spread hour cancel alert: {}", e);
                    }
                    self.remove_from_tracking(signal.id).await;
                    return HitResult::SignalClosed;
                }
                _ => return HitResult::Dropped,
            }
        }

        // (c) normal hit: store first, then flags, then the alert
        let outcome = match tokio::time::timeout(
            STORE_DEADLINE,
            self.store.mark_limit_hit(limit.id, current_price),
        )
        .await
        {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                error!("Failed to persist limit hit for {}: {}", limit.id, e);
                self.metrics
                    .store_failures_total
                    .with_label_values(&["mark_limit_hit"])
                    .inc();
                return HitResult::Dropped;
            }
            Err(_) => {
                error!("Store deadline exceeded persisting limit hit {}", limit.id);
                self.metrics
                    .store_failures_total
                    .with_label_values(&["mark_limit_hit"])
                    .inc();
                return HitResult::Dropped;
            }
        };

        // A lost response from an earlier committed write surfaces here as
        // a store-side replay: the fill already counted, so touching the
        // counters or alerting again would double it. The next refresh
        // reconciles the in-memory view with the store.
        if outcome.already_applied {
            debug!(
                "Limit {} was already hit in the store; dropping replayed fill",
                limit.id
            );
            return HitResult::Dropped;
        }

        {
            let mut state = self.state.write().await;
            if let Some(tracked) = state.active.get_mut(&signal.id) {
                tracked.signal.limits_hit += 1;
                if outcome.status_changed {
                    tracked.signal.status = SignalStatus::Hit;
                    tracked.signal.first_limit_hit_time = Some(self.clock.now_utc());
                }
                tracked.pending_limits.retain(|l| l.id != limit.id);
            }
        }

        self.metrics
            .limits_hit_total
            .with_label_values(&[signal.instrument.as_str()])
            .inc();

        let mut snapshot = SignalSnapshot::from(signal);
        snapshot.limits_hit += 1;
        let alert = LimitHitAlert {
            signal: snapshot,
            limit_sequence: limit.sequence_number,
            limit_price: limit.price_level,
            hit_price: current_price,
            spread: quote.spread,
            spread_buffer_enabled: buffer_enabled,
        };
        match self.sink.limit_hit(&alert).await {
            Ok(()) => {
                self.metrics
                    .alerts_total
                    .with_label_values(&["limit_hit", "sent"])
                    .inc();
            }
            Err(e) => {
                error!("Failed to send limit hit alert: {}", e);
                self.metrics
                    .alerts_total
                    .with_label_values(&["limit_hit", "failed"])
                    .inc();
            }
        }

        // (d) keep the TP evaluator's view of the fills current
        self.auto_tp.refresh(signal.id).await;

        if outcome.all_limits_hit {
            info!("All limits hit for signal {}", signal.id);
        }

        HitResult::Recorded
    }

    /// Approach detection: first limit only, while its flag is unsent.
    async fn check_approach(
        &self,
        signal: &Signal,
        limit: &Limit,
        current_price: Decimal,
        quote: &Quote,
        buffer_enabled: bool,
    ) {
        let distance =
            checks::signed_distance(signal.direction, current_price, limit.price_level);
        let approach_distance = self
            .alert_distances
            .approach_distance(&signal.instrument, current_price);

        if distance.abs() > approach_distance {
            return;
        }

        // Persist the flag before the alert so a replay cannot duplicate it
        match tokio::time::timeout(
            STORE_DEADLINE,
            self.store.mark_approaching_sent(limit.id),
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!("Failed to mark approaching sent for {}: {}", limit.id, e);
                self.metrics
                    .store_failures_total
                    .with_label_values(&["mark_approaching_sent"])
                    .inc();
                return;
            }
            Err(_) => {
                error!("Store deadline exceeded marking approach for {}", limit.id);
                self.metrics
                    .store_failures_total
                    .with_label_values(&["mark_approaching_sent"])
                    .inc();
                return;
            }
        }

        {
            let mut state = self.state.write().await;
            if let Some(tracked) = state.active.get_mut(&signal.id)
                && let Some(tracked_limit) =
                    tracked.pending_limits.iter_mut().find(|l| l.id == limit.id)
            {
                tracked_limit.approaching_alert_sent = true;
            }
        }

        let alert = ApproachAlert {
            signal: SignalSnapshot::from(signal),
            limit_sequence: limit.sequence_number,
            limit_price: limit.price_level,
            current_price,
            distance_display: self.alert_distances.format_distance(
                &signal.instrument,
                distance.abs(),
                current_price,
            ),
            spread: quote.spread,
            spread_buffer_enabled: buffer_enabled,
        };
        match self.sink.approach(&alert).await {
            Ok(()) => {
                self.metrics
                    .alerts_total
                    .with_label_values(&["approach", "sent"])
                    .inc();
                info!(
                    "Approach alert sent for signal {} first limit",
                    signal.id
                );
            }
            Err(e) => {
                error!("Failed to send approach alert: {}", e);
                self.metrics
                    .alerts_total
                    .with_label_values(&["approach", "failed"])
                    .inc();
            }
        }
    }

    /// Stop-loss evaluation. Never buffered, and armed only once the
    /// signal has at least one fill.
    async fn evaluate_stop_loss(&self, signal: &Signal, quote: &Quote) -> bool {
        if signal.status != SignalStatus::Hit {
            return false;
        }

        let close_price = quote.close_price(signal.direction);
        if !checks::check_stop_loss(signal.direction, close_price, signal.stop_loss) {
            return false;
        }

        let reason = format!("Stop loss hit at {}", close_price);
        match self
            .transition(signal.id, SignalStatus::StopLoss, &reason)
            .await
        {
            Some(true) => {
                self.metrics
                    .stop_losses_total
                    .with_label_values(&[signal.instrument.as_str()])
                    .inc();
                let alert = StopLossAlert {
                    signal: SignalSnapshot::from(signal),
                    stop_loss: signal.stop_loss,
                    hit_price: close_price,
                };
                if let Err(e) = self.sink.stop_loss(&alert).await {
                    error!("Failed to send stop loss alert: {}", e);
                }
                self.remove_from_tracking(signal.id).await;
                true
            }
            _ => false,
        }
    }

    /// Store transition with the tick deadline. `None` means the write
    /// failed or timed out; the caller drops the tick.
    async fn transition(
        &self,
        signal_id: i64,
        new_status: SignalStatus,
        reason: &str,
    ) -> Option<bool> {
        match tokio::time::timeout(
            STORE_DEADLINE,
            self.store
                .transition_status(signal_id, new_status, ChangeType::Automatic, reason),
        )
        .await
        {
            Ok(Ok(changed)) => Some(changed),
            Ok(Err(e)) => {
                error!("Transition of signal {} failed: {}", signal_id, e);
                self.metrics
                    .store_failures_total
                    .with_label_values(&["transition_status"])
                    .inc();
                None
            }
            Err(_) => {
                error!("Store deadline exceeded transitioning signal {}", signal_id);
                self.metrics
                    .store_failures_total
                    .with_label_values(&["transition_status"])
                    .inc();
                None
            }
        }
    }
}

#[async_trait]
impl QuoteSubscriber for SignalTracker {
    async fn on_quote(&self, quote: &Quote) {
        let views: Vec<SignalView> = {
            let state = self.state.read().await;
            let Some(ids) = state.by_symbol.get(&quote.symbol) else {
                return;
            };
            ids.iter()
                .filter_map(|id| state.active.get(id).cloned())
                .collect()
        };

        for view in views {
            self.metrics
                .signals_checked_total
                .with_label_values(&[view.signal.instrument.as_str()])
                .inc();
            // Each signal is evaluated independently; a failure in one
            // must not starve the others on the same tick
            self.check_signal(view, quote).await;
        }
    }
}
