use crate::domain::alerts::{
    ApproachAlert, AutoTpAlert, LimitHitAlert, NewsActivatedAlert, NewsCancelAlert,
    SpreadHourCancelAlert, StopLossAlert,
};
use crate::domain::errors::{FeedError, StoreError};
use crate::domain::market::{Feed, FeedTick, Quote};
use crate::domain::signal::{
    ChangeType, ExpiryType, HitLimit, LimitHitOutcome, NewSignal, Signal, SignalStatus, SignalView,
};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::broadcast;

// Need async_trait for async functions in traits
#[async_trait]
pub trait SignalStore: Send + Sync {
    async fn insert_signal(&self, new: &NewSignal) -> Result<i64, StoreError>;

    /// Appends further pending limits to a signal, continuing its sequence
    /// numbering and bumping total_limits.
    async fn insert_limits(&self, signal_id: i64, prices: &[Decimal]) -> Result<(), StoreError>;

    /// All signals in a trackable status, with their pending limits and
    /// alert flags.
    async fn get_active_for_tracking(&self) -> Result<Vec<SignalView>, StoreError>;

    /// Atomically marks the limit hit, stamps hit_time/hit_price, flips
    /// hit_alert_sent, increments limits_hit and, if the signal was still
    /// active, transitions it to hit with an audit row.
    async fn mark_limit_hit(
        &self,
        limit_id: i64,
        actual_price: Decimal,
    ) -> Result<LimitHitOutcome, StoreError>;

    /// Validated (or manually forced) status transition. Terminal statuses
    /// stamp closed_at and cancel pending limits; revival clears closed_at
    /// and restores cancelled limits to pending. Returns false if the
    /// signal already had the requested status.
    async fn transition_status(
        &self,
        signal_id: i64,
        new_status: SignalStatus,
        change_type: ChangeType,
        reason: &str,
    ) -> Result<bool, StoreError>;

    async fn mark_approaching_sent(&self, limit_id: i64) -> Result<(), StoreError>;

    /// Hit limits for a signal, ordered by sequence number.
    async fn hit_limits_for(&self, signal_id: i64) -> Result<Vec<HitLimit>, StoreError>;

    /// Cancels every non-terminal signal whose expiry_time has passed,
    /// atomically per signal, returning the transitioned ids.
    async fn expire_old(&self, now: DateTime<Utc>) -> Result<Vec<i64>, StoreError>;

    async fn get_signal(&self, signal_id: i64) -> Result<Option<SignalView>, StoreError>;

    async fn get_by_message(&self, message_id: &str) -> Result<Option<Signal>, StoreError>;

    /// Replaces a signal's parsed content when its source message is
    /// edited. Idempotent per message id.
    async fn update_from_edit(
        &self,
        message_id: &str,
        new_signal: &NewSignal,
    ) -> Result<bool, StoreError>;

    async fn set_expiry(
        &self,
        signal_id: i64,
        expiry_type: ExpiryType,
        expiry_time: Option<DateTime<Utc>>,
    ) -> Result<bool, StoreError>;

    async fn delete_signal(&self, signal_id: i64) -> Result<bool, StoreError>;

    /// Cancels every trackable signal. Admin clear-all.
    async fn cancel_all_open(&self, reason: &str) -> Result<Vec<i64>, StoreError>;
}

/// One method per alert kind. Implementations return synchronously; the
/// core treats failures as non-fatal but logs them.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn approach(&self, alert: &ApproachAlert) -> Result<()>;
    async fn limit_hit(&self, alert: &LimitHitAlert) -> Result<()>;
    async fn stop_loss(&self, alert: &StopLossAlert) -> Result<()>;
    async fn spread_hour_cancel(&self, alert: &SpreadHourCancelAlert) -> Result<()>;
    async fn news_cancel(&self, alert: &NewsCancelAlert) -> Result<()>;
    async fn news_activated(&self, alert: &NewsActivatedAlert) -> Result<()>;
    async fn auto_tp(&self, alert: &AutoTpAlert) -> Result<()>;
    async fn admin_notification(&self, message: &str) -> Result<()>;
}

/// Streaming feed connector. Each implementation owns a worker task that
/// drives the transport and publishes raw ticks on a broadcast channel;
/// the stream manager consumes and canonicalizes them.
#[async_trait]
pub trait PriceFeed: Send + Sync {
    fn name(&self) -> Feed;

    async fn connect(&self) -> Result<(), FeedError>;

    async fn subscribe(&self, feed_symbol: &str) -> Result<(), FeedError>;

    async fn unsubscribe(&self, feed_symbol: &str) -> Result<(), FeedError>;

    async fn bulk_subscribe(&self, feed_symbols: &[String]) -> Result<(), FeedError>;

    /// Drops and re-establishes the transport, then re-subscribes the
    /// tracked set. Idempotent.
    async fn reconnect(&self) -> Result<(), FeedError>;

    fn updates(&self) -> broadcast::Receiver<FeedTick>;

    fn is_connected(&self) -> bool;

    fn reconnect_count(&self) -> u64;
}

/// Receives every canonical quote, sequentially per update.
#[async_trait]
pub trait QuoteSubscriber: Send + Sync {
    async fn on_quote(&self, quote: &Quote);
}

/// Injectable time source so spread-hour, news and expiry logic is
/// deterministic under test.
pub trait Clock: Send + Sync {
    fn now_utc(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
