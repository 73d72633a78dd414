//! Shared fakes for integration tests: an in-memory signal store, a
//! recording alert sink, and a settable clock.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use limitwatch::application::stream::manager::StreamManager;
use limitwatch::application::tracking::auto_tp::AutoTpMonitor;
use limitwatch::application::tracking::tracker::SignalTracker;
use limitwatch::domain::alerts::{
    ApproachAlert, AutoTpAlert, LimitHitAlert, NewsActivatedAlert, NewsCancelAlert,
    SpreadHourCancelAlert, StopLossAlert,
};
use limitwatch::domain::errors::StoreError;
use limitwatch::domain::ports::{AlertSink, Clock, SignalStore};
use limitwatch::domain::signal::{
    ChangeType, Direction, ExpiryType, HitLimit, Limit, LimitHitOutcome, LimitStatus, NewSignal,
    Signal, SignalStatus, SignalView, can_transition,
};
use limitwatch::infrastructure::config::alert_distances::AlertDistancesFile;
use limitwatch::infrastructure::config::tp::TpFile;
use limitwatch::infrastructure::config::{AlertDistanceConfig, SettingsStore, TpConfig};
use limitwatch::infrastructure::news::NewsManager;
use limitwatch::infrastructure::observability::Metrics;
use limitwatch::infrastructure::symbols::SymbolMapper;
use limitwatch::infrastructure::symbols::mapper::MappingsConfig;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap() = now;
    }
}

impl Clock for FixedClock {
    fn now_utc(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

#[derive(Debug, Clone)]
pub enum Recorded {
    Approach(ApproachAlert),
    LimitHit(LimitHitAlert),
    StopLoss(StopLossAlert),
    SpreadHourCancel(SpreadHourCancelAlert),
    NewsCancel(NewsCancelAlert),
    NewsActivated(NewsActivatedAlert),
    AutoTp(AutoTpAlert),
    Admin(String),
}

#[derive(Default)]
pub struct RecordingSink {
    pub alerts: Mutex<Vec<Recorded>>,
}

impl RecordingSink {
    pub fn recorded(&self) -> Vec<Recorded> {
        self.alerts.lock().unwrap().clone()
    }

    pub fn count_limit_hits(&self) -> usize {
        self.recorded()
            .iter()
            .filter(|a| matches!(a, Recorded::LimitHit(_)))
            .count()
    }

    pub fn count_approaches(&self) -> usize {
        self.recorded()
            .iter()
            .filter(|a| matches!(a, Recorded::Approach(_)))
            .count()
    }
}

#[async_trait]
impl AlertSink for RecordingSink {
    async fn approach(&self, alert: &ApproachAlert) -> anyhow::Result<()> {
        self.alerts
            .lock()
            .unwrap()
            .push(Recorded::Approach(alert.clone()));
        Ok(())
    }

    async fn limit_hit(&self, alert: &LimitHitAlert) -> anyhow::Result<()> {
        self.alerts
            .lock()
            .unwrap()
            .push(Recorded::LimitHit(alert.clone()));
        Ok(())
    }

    async fn stop_loss(&self, alert: &StopLossAlert) -> anyhow::Result<()> {
        self.alerts
            .lock()
            .unwrap()
            .push(Recorded::StopLoss(alert.clone()));
        Ok(())
    }

    async fn spread_hour_cancel(&self, alert: &SpreadHourCancelAlert) -> anyhow::Result<()> {
        self.alerts
            .lock()
            .unwrap()
            .push(Recorded::SpreadHourCancel(alert.clone()));
        Ok(())
    }

    async fn news_cancel(&self, alert: &NewsCancelAlert) -> anyhow::Result<()> {
        self.alerts
            .lock()
            .unwrap()
            .push(Recorded::NewsCancel(alert.clone()));
        Ok(())
    }

    async fn news_activated(&self, alert: &NewsActivatedAlert) -> anyhow::Result<()> {
        self.alerts
            .lock()
            .unwrap()
            .push(Recorded::NewsActivated(alert.clone()));
        Ok(())
    }

    async fn auto_tp(&self, alert: &AutoTpAlert) -> anyhow::Result<()> {
        self.alerts
            .lock()
            .unwrap()
            .push(Recorded::AutoTp(alert.clone()));
        Ok(())
    }

    async fn admin_notification(&self, message: &str) -> anyhow::Result<()> {
        self.alerts
            .lock()
            .unwrap()
            .push(Recorded::Admin(message.to_string()));
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct AuditRow {
    pub signal_id: i64,
    pub old_status: SignalStatus,
    pub new_status: SignalStatus,
    pub change_type: ChangeType,
    pub reason: String,
}

/// In-memory store honoring the same contract as the SQLite store.
pub struct FakeStore {
    pub signals: Mutex<HashMap<i64, Signal>>,
    pub limits: Mutex<HashMap<i64, Limit>>,
    pub audit: Mutex<Vec<AuditRow>>,
    pub fail_writes: AtomicBool,
    /// Commit the write, then report failure: models a store call whose
    /// response is lost to the tick deadline after the data landed.
    pub fail_after_commit: AtomicBool,
    pub mark_limit_hit_calls: AtomicUsize,
    next_signal_id: AtomicI64,
    next_limit_id: AtomicI64,
    clock: Arc<FixedClock>,
}

impl FakeStore {
    pub fn new(clock: Arc<FixedClock>) -> Self {
        Self {
            signals: Mutex::new(HashMap::new()),
            limits: Mutex::new(HashMap::new()),
            audit: Mutex::new(Vec::new()),
            fail_writes: AtomicBool::new(false),
            fail_after_commit: AtomicBool::new(false),
            mark_limit_hit_calls: AtomicUsize::new(0),
            next_signal_id: AtomicI64::new(1),
            next_limit_id: AtomicI64::new(1),
            clock,
        }
    }

    pub fn seed_signal(
        &self,
        instrument: &str,
        direction: Direction,
        stop_loss: Decimal,
        limit_prices: &[Decimal],
        status: SignalStatus,
        scalp: bool,
    ) -> i64 {
        let signal_id = self.next_signal_id.fetch_add(1, Ordering::SeqCst);
        let signal = Signal {
            id: signal_id,
            message_id: format!("{}000{}", signal_id, signal_id),
            channel_id: "1000".to_string(),
            instrument: instrument.to_string(),
            direction,
            stop_loss,
            status,
            expiry_type: ExpiryType::NoExpiry,
            expiry_time: None,
            total_limits: limit_prices.len() as i64,
            limits_hit: 0,
            first_limit_hit_time: None,
            closed_at: None,
            closed_reason: None,
            scalp,
        };
        self.signals.lock().unwrap().insert(signal_id, signal);

        for (i, price) in limit_prices.iter().enumerate() {
            let limit_id = self.next_limit_id.fetch_add(1, Ordering::SeqCst);
            let limit = Limit {
                id: limit_id,
                signal_id,
                sequence_number: (i + 1) as i64,
                price_level: *price,
                status: LimitStatus::Pending,
                hit_time: None,
                hit_price: None,
                approaching_alert_sent: false,
                hit_alert_sent: false,
            };
            self.limits.lock().unwrap().insert(limit_id, limit);
        }
        signal_id
    }

    /// Marks a seeded limit as already hit, adjusting the signal counters
    /// the way the real store would have.
    pub fn force_hit(&self, signal_id: i64, sequence_number: i64, hit_price: Decimal) {
        let now = self.clock.now_utc();
        let mut limits = self.limits.lock().unwrap();
        let limit = limits
            .values_mut()
            .find(|l| l.signal_id == signal_id && l.sequence_number == sequence_number)
            .expect("limit not seeded");
        limit.status = LimitStatus::Hit;
        limit.hit_price = Some(hit_price);
        limit.hit_time = Some(now);
        limit.hit_alert_sent = true;

        let mut signals = self.signals.lock().unwrap();
        let signal = signals.get_mut(&signal_id).expect("signal not seeded");
        signal.limits_hit += 1;
        signal.status = SignalStatus::Hit;
        signal.first_limit_hit_time.get_or_insert(now);
    }

    pub fn force_expiry(&self, signal_id: i64, expiry_time: DateTime<Utc>) {
        let mut signals = self.signals.lock().unwrap();
        let signal = signals.get_mut(&signal_id).unwrap();
        signal.expiry_type = ExpiryType::DayEnd;
        signal.expiry_time = Some(expiry_time);
    }

    pub fn signal(&self, signal_id: i64) -> Signal {
        self.signals.lock().unwrap().get(&signal_id).unwrap().clone()
    }

    pub fn limits_of(&self, signal_id: i64) -> Vec<Limit> {
        let mut limits: Vec<Limit> = self
            .limits
            .lock()
            .unwrap()
            .values()
            .filter(|l| l.signal_id == signal_id)
            .cloned()
            .collect();
        limits.sort_by_key(|l| l.sequence_number);
        limits
    }

    pub fn audit_rows(&self, signal_id: i64) -> Vec<AuditRow> {
        self.audit
            .lock()
            .unwrap()
            .iter()
            .filter(|row| row.signal_id == signal_id)
            .cloned()
            .collect()
    }

    /// Count invariant: limits_hit must equal the number of hit limits.
    pub fn assert_hit_count_invariant(&self, signal_id: i64) {
        let signal = self.signal(signal_id);
        let hit = self
            .limits_of(signal_id)
            .iter()
            .filter(|l| l.status == LimitStatus::Hit)
            .count() as i64;
        assert_eq!(signal.limits_hit, hit, "limits_hit out of sync");
        assert!(signal.limits_hit <= signal.total_limits);
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable {
                reason: "injected failure".to_string(),
            })
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl SignalStore for FakeStore {
    async fn insert_signal(&self, new: &NewSignal) -> Result<i64, StoreError> {
        self.check_writable()?;
        let id = self.seed_signal(
            &new.instrument.to_uppercase(),
            new.direction,
            new.stop_loss,
            &new.limit_prices,
            SignalStatus::Active,
            new.scalp,
        );
        let mut signals = self.signals.lock().unwrap();
        let signal = signals.get_mut(&id).unwrap();
        signal.message_id = new.message_id.clone();
        signal.channel_id = new.channel_id.clone();
        signal.expiry_type = new.expiry_type;
        signal.expiry_time = new.expiry_time;
        Ok(id)
    }

    async fn insert_limits(&self, signal_id: i64, prices: &[Decimal]) -> Result<(), StoreError> {
        self.check_writable()?;
        let max_seq = self
            .limits_of(signal_id)
            .last()
            .map(|l| l.sequence_number)
            .unwrap_or(0);
        for (i, price) in prices.iter().enumerate() {
            let limit_id = self.next_limit_id.fetch_add(1, Ordering::SeqCst);
            self.limits.lock().unwrap().insert(
                limit_id,
                Limit {
                    id: limit_id,
                    signal_id,
                    sequence_number: max_seq + i as i64 + 1,
                    price_level: *price,
                    status: LimitStatus::Pending,
                    hit_time: None,
                    hit_price: None,
                    approaching_alert_sent: false,
                    hit_alert_sent: false,
                },
            );
        }
        let mut signals = self.signals.lock().unwrap();
        if let Some(signal) = signals.get_mut(&signal_id) {
            signal.total_limits += prices.len() as i64;
        }
        Ok(())
    }

    async fn get_active_for_tracking(&self) -> Result<Vec<SignalView>, StoreError> {
        let signals = self.signals.lock().unwrap();
        let mut views = Vec::new();
        for signal in signals.values() {
            if !signal.status.is_trackable() {
                continue;
            }
            let pending: Vec<Limit> = self
                .limits
                .lock()
                .unwrap()
                .values()
                .filter(|l| l.signal_id == signal.id && l.status == LimitStatus::Pending)
                .cloned()
                .collect();
            let mut pending = pending;
            pending.sort_by_key(|l| l.sequence_number);
            views.push(SignalView {
                signal: signal.clone(),
                pending_limits: pending,
            });
        }
        views.sort_by_key(|v| v.signal.id);
        Ok(views)
    }

    async fn mark_limit_hit(
        &self,
        limit_id: i64,
        actual_price: Decimal,
    ) -> Result<LimitHitOutcome, StoreError> {
        self.mark_limit_hit_calls.fetch_add(1, Ordering::SeqCst);
        self.check_writable()?;
        let now = self.clock.now_utc();

        let signal_id = {
            let mut limits = self.limits.lock().unwrap();
            let limit = limits
                .get_mut(&limit_id)
                .ok_or(StoreError::LimitNotFound { limit_id })?;
            if limit.status == LimitStatus::Hit {
                let signals = self.signals.lock().unwrap();
                let signal = &signals[&limit.signal_id];
                return Ok(LimitHitOutcome {
                    signal_id: limit.signal_id,
                    status_changed: false,
                    new_status: signal.status,
                    all_limits_hit: signal.limits_hit >= signal.total_limits,
                    already_applied: true,
                });
            }
            limit.status = LimitStatus::Hit;
            limit.hit_time = Some(now);
            limit.hit_price = Some(actual_price);
            limit.hit_alert_sent = true;
            limit.signal_id
        };

        let mut signals = self.signals.lock().unwrap();
        let signal = signals
            .get_mut(&signal_id)
            .ok_or(StoreError::SignalNotFound { signal_id })?;
        signal.limits_hit += 1;

        let mut status_changed = false;
        if signal.status == SignalStatus::Active {
            signal.status = SignalStatus::Hit;
            signal.first_limit_hit_time = Some(now);
            status_changed = true;
            self.audit.lock().unwrap().push(AuditRow {
                signal_id,
                old_status: SignalStatus::Active,
                new_status: SignalStatus::Hit,
                change_type: ChangeType::Automatic,
                reason: format!("Limit {} hit", limit_id),
            });
        }

        if self.fail_after_commit.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable {
                reason: "response lost after commit".to_string(),
            });
        }

        Ok(LimitHitOutcome {
            signal_id,
            status_changed,
            new_status: signal.status,
            all_limits_hit: signal.limits_hit >= signal.total_limits,
            already_applied: false,
        })
    }

    async fn transition_status(
        &self,
        signal_id: i64,
        new_status: SignalStatus,
        change_type: ChangeType,
        reason: &str,
    ) -> Result<bool, StoreError> {
        self.check_writable()?;
        let now = self.clock.now_utc();

        let mut signals = self.signals.lock().unwrap();
        let signal = signals
            .get_mut(&signal_id)
            .ok_or(StoreError::SignalNotFound { signal_id })?;
        let old_status = signal.status;

        if old_status == new_status {
            return Ok(false);
        }
        if change_type == ChangeType::Automatic && !can_transition(old_status, new_status) {
            return Err(StoreError::Conflict {
                signal_id,
                from: old_status,
                to: new_status,
            });
        }

        signal.status = new_status;
        if new_status.is_terminal() {
            signal.closed_at = Some(now);
            signal.closed_reason = Some(reason.to_string());
            for limit in self.limits.lock().unwrap().values_mut() {
                if limit.signal_id == signal_id && limit.status == LimitStatus::Pending {
                    limit.status = LimitStatus::Cancelled;
                }
            }
        } else {
            signal.closed_at = None;
            signal.closed_reason = None;
            if old_status.is_terminal() {
                for limit in self.limits.lock().unwrap().values_mut() {
                    if limit.signal_id == signal_id && limit.status == LimitStatus::Cancelled {
                        limit.status = LimitStatus::Pending;
                    }
                }
            }
        }

        self.audit.lock().unwrap().push(AuditRow {
            signal_id,
            old_status,
            new_status,
            change_type,
            reason: reason.to_string(),
        });
        Ok(true)
    }

    async fn mark_approaching_sent(&self, limit_id: i64) -> Result<(), StoreError> {
        self.check_writable()?;
        let mut limits = self.limits.lock().unwrap();
        let limit = limits
            .get_mut(&limit_id)
            .ok_or(StoreError::LimitNotFound { limit_id })?;
        limit.approaching_alert_sent = true;
        Ok(())
    }

    async fn hit_limits_for(&self, signal_id: i64) -> Result<Vec<HitLimit>, StoreError> {
        let mut hits: Vec<HitLimit> = self
            .limits
            .lock()
            .unwrap()
            .values()
            .filter(|l| l.signal_id == signal_id && l.status == LimitStatus::Hit)
            .map(|l| HitLimit {
                limit_id: l.id,
                sequence_number: l.sequence_number,
                price_level: l.price_level,
                hit_price: l.hit_price.unwrap_or(l.price_level),
                hit_time: l.hit_time.unwrap_or_else(|| self.clock.now_utc()),
            })
            .collect();
        hits.sort_by_key(|h| h.sequence_number);
        Ok(hits)
    }

    async fn expire_old(&self, now: DateTime<Utc>) -> Result<Vec<i64>, StoreError> {
        self.check_writable()?;
        let expired: Vec<i64> = {
            let signals = self.signals.lock().unwrap();
            signals
                .values()
                .filter(|s| {
                    s.status.is_trackable()
                        && s.expiry_time.map(|t| t < now).unwrap_or(false)
                })
                .map(|s| s.id)
                .collect()
        };
        for signal_id in &expired {
            self.transition_status(*signal_id, SignalStatus::Cancelled, ChangeType::Automatic, "expired")
                .await?;
        }
        Ok(expired)
    }

    async fn get_signal(&self, signal_id: i64) -> Result<Option<SignalView>, StoreError> {
        let signals = self.signals.lock().unwrap();
        let Some(signal) = signals.get(&signal_id) else {
            return Ok(None);
        };
        let mut pending: Vec<Limit> = self
            .limits
            .lock()
            .unwrap()
            .values()
            .filter(|l| l.signal_id == signal_id && l.status == LimitStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|l| l.sequence_number);
        Ok(Some(SignalView {
            signal: signal.clone(),
            pending_limits: pending,
        }))
    }

    async fn get_by_message(&self, message_id: &str) -> Result<Option<Signal>, StoreError> {
        Ok(self
            .signals
            .lock()
            .unwrap()
            .values()
            .find(|s| s.message_id == message_id)
            .cloned())
    }

    async fn update_from_edit(
        &self,
        message_id: &str,
        new_signal: &NewSignal,
    ) -> Result<bool, StoreError> {
        self.check_writable()?;
        let Some(existing) = self.get_by_message(message_id).await? else {
            return Ok(false);
        };
        if existing.limits_hit > 0 || existing.status.is_terminal() {
            return Ok(false);
        }
        {
            let mut signals = self.signals.lock().unwrap();
            let signal = signals.get_mut(&existing.id).unwrap();
            signal.instrument = new_signal.instrument.to_uppercase();
            signal.direction = new_signal.direction;
            signal.stop_loss = new_signal.stop_loss;
            signal.total_limits = new_signal.limit_prices.len() as i64;
        }
        self.limits
            .lock()
            .unwrap()
            .retain(|_, l| l.signal_id != existing.id);
        self.insert_limits(existing.id, &new_signal.limit_prices)
            .await?;
        let mut signals = self.signals.lock().unwrap();
        signals.get_mut(&existing.id).unwrap().total_limits =
            new_signal.limit_prices.len() as i64;
        Ok(true)
    }

    async fn set_expiry(
        &self,
        signal_id: i64,
        expiry_type: ExpiryType,
        expiry_time: Option<DateTime<Utc>>,
    ) -> Result<bool, StoreError> {
        self.check_writable()?;
        let mut signals = self.signals.lock().unwrap();
        let signal = signals
            .get_mut(&signal_id)
            .ok_or(StoreError::SignalNotFound { signal_id })?;
        if signal.status.is_terminal() {
            return Ok(false);
        }
        signal.expiry_type = expiry_type;
        signal.expiry_time = expiry_time;
        Ok(true)
    }

    async fn delete_signal(&self, signal_id: i64) -> Result<bool, StoreError> {
        self.check_writable()?;
        let removed = self.signals.lock().unwrap().remove(&signal_id).is_some();
        self.limits
            .lock()
            .unwrap()
            .retain(|_, l| l.signal_id != signal_id);
        Ok(removed)
    }

    async fn cancel_all_open(&self, reason: &str) -> Result<Vec<i64>, StoreError> {
        self.check_writable()?;
        let open: Vec<i64> = {
            let signals = self.signals.lock().unwrap();
            signals
                .values()
                .filter(|s| s.status.is_trackable())
                .map(|s| s.id)
                .collect()
        };
        for signal_id in &open {
            self.transition_status(*signal_id, SignalStatus::Cancelled, ChangeType::Manual, reason)
                .await?;
        }
        Ok(open)
    }
}

pub struct Harness {
    pub store: Arc<FakeStore>,
    pub sink: Arc<RecordingSink>,
    pub clock: Arc<FixedClock>,
    pub tracker: Arc<SignalTracker>,
    pub auto_tp: Arc<AutoTpMonitor>,
    pub news: Arc<NewsManager>,
    pub stream: Arc<StreamManager>,
    pub settings: Arc<SettingsStore>,
    _tmp: tempfile::TempDir,
}

pub fn build_harness(now: DateTime<Utc>, buffer_enabled: bool) -> Harness {
    let tmp = tempfile::tempdir().unwrap();
    let clock = Arc::new(FixedClock::new(now));
    let store = Arc::new(FakeStore::new(clock.clone()));
    let sink = Arc::new(RecordingSink::default());

    let settings = Arc::new(SettingsStore::load(tmp.path().join("settings.json")));
    settings.set_spread_buffer(buffer_enabled).unwrap();

    let alert_distances = Arc::new(AlertDistanceConfig::with_config(AlertDistancesFile::default()));
    let tp = Arc::new(TpConfig::with_config(TpFile::default()));
    let news = Arc::new(NewsManager::load(
        tmp.path().join("news_events.json"),
        clock.clone(),
    ));

    let mapper = Arc::new(SymbolMapper::with_config(MappingsConfig::default()));
    let metrics = Metrics::new().unwrap();
    let stream = Arc::new(StreamManager::new(mapper, Vec::new(), metrics.clone()));

    let auto_tp = Arc::new(AutoTpMonitor::new(
        tp.clone(),
        store.clone(),
        sink.clone(),
    ));

    let tracker = Arc::new(SignalTracker::new(
        store.clone(),
        sink.clone(),
        stream.clone(),
        news.clone(),
        alert_distances,
        settings.clone(),
        auto_tp.clone(),
        clock.clone(),
        metrics,
    ));

    Harness {
        store,
        sink,
        clock,
        tracker,
        auto_tp,
        news,
        stream,
        settings,
        _tmp: tmp,
    }
}
