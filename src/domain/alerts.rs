//! Structured alert payloads handed to the `AlertSink`. Transport-level
//! formatting (embeds, pings, channel routing) is the sink's concern.

use crate::domain::signal::{Direction, HitLimit, Signal};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Compact view of a signal carried on every alert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalSnapshot {
    pub signal_id: i64,
    pub message_id: String,
    pub channel_id: String,
    pub instrument: String,
    pub direction: Direction,
    pub stop_loss: Decimal,
    pub limits_hit: i64,
    pub total_limits: i64,
}

impl From<&Signal> for SignalSnapshot {
    fn from(signal: &Signal) -> Self {
        Self {
            signal_id: signal.id,
            message_id: signal.message_id.clone(),
            channel_id: signal.channel_id.clone(),
            instrument: signal.instrument.clone(),
            direction: signal.direction,
            stop_loss: signal.stop_loss,
            limits_hit: signal.limits_hit,
            total_limits: signal.total_limits,
        }
    }
}

/// Price is within the configured approach distance of the first limit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApproachAlert {
    pub signal: SignalSnapshot,
    pub limit_sequence: i64,
    pub limit_price: Decimal,
    pub current_price: Decimal,
    pub distance_display: String,
    pub spread: Decimal,
    pub spread_buffer_enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitHitAlert {
    pub signal: SignalSnapshot,
    pub limit_sequence: i64,
    pub limit_price: Decimal,
    pub hit_price: Decimal,
    pub spread: Decimal,
    pub spread_buffer_enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopLossAlert {
    pub signal: SignalSnapshot,
    pub stop_loss: Decimal,
    pub hit_price: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpreadHourCancelAlert {
    pub signal: SignalSnapshot,
    pub trigger_price: Decimal,
    pub pending_limits: Vec<Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsCancelAlert {
    pub signal: SignalSnapshot,
    pub trigger_price: Decimal,
    pub category: String,
    pub news_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsActivatedAlert {
    pub event_id: i64,
    pub category: String,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoTpAlert {
    pub signal: SignalSnapshot,
    pub hit_limits: Vec<HitLimit>,
    pub last_pnl: Decimal,
    pub pnl_display: String,
}
