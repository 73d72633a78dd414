use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Prefix used for signals entered by hand rather than ingested from a
/// monitored channel. Such signals have no source message to link back to.
pub const MANUAL_MESSAGE_PREFIX: &str = "manual_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Long => "long",
            Direction::Short => "short",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Direction {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "long" => Ok(Direction::Long),
            "short" => Ok(Direction::Short),
            _ => anyhow::bail!("Invalid direction: {}. Must be 'long' or 'short'", s),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalStatus {
    Active,
    Hit,
    Profit,
    Breakeven,
    StopLoss,
    Cancelled,
}

impl SignalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalStatus::Active => "active",
            SignalStatus::Hit => "hit",
            SignalStatus::Profit => "profit",
            SignalStatus::Breakeven => "breakeven",
            SignalStatus::StopLoss => "stop_loss",
            SignalStatus::Cancelled => "cancelled",
        }
    }

    /// Terminal statuses carry a `closed_at` timestamp and stop tracking.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SignalStatus::Profit
                | SignalStatus::Breakeven
                | SignalStatus::StopLoss
                | SignalStatus::Cancelled
        )
    }

    /// Trackable statuses require a live price subscription.
    pub fn is_trackable(&self) -> bool {
        matches!(self, SignalStatus::Active | SignalStatus::Hit)
    }
}

impl fmt::Display for SignalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SignalStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(SignalStatus::Active),
            "hit" => Ok(SignalStatus::Hit),
            "profit" => Ok(SignalStatus::Profit),
            "breakeven" => Ok(SignalStatus::Breakeven),
            "stop_loss" => Ok(SignalStatus::StopLoss),
            "cancelled" => Ok(SignalStatus::Cancelled),
            _ => anyhow::bail!("Invalid signal status: {}", s),
        }
    }
}

/// Automatic-path transition table. Manual operator overrides bypass this
/// but still produce an audit row with `ChangeType::Manual`.
pub fn can_transition(from: SignalStatus, to: SignalStatus) -> bool {
    use SignalStatus::*;
    match from {
        Active => matches!(to, Hit | StopLoss | Cancelled),
        Hit => matches!(to, Profit | Breakeven | StopLoss | Cancelled),
        Profit | Breakeven | StopLoss => matches!(to, Cancelled),
        Cancelled => matches!(to, Active | Hit),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitStatus {
    Pending,
    Hit,
    Cancelled,
}

impl LimitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LimitStatus::Pending => "pending",
            LimitStatus::Hit => "hit",
            LimitStatus::Cancelled => "cancelled",
        }
    }
}

impl std::str::FromStr for LimitStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(LimitStatus::Pending),
            "hit" => Ok(LimitStatus::Hit),
            "cancelled" => Ok(LimitStatus::Cancelled),
            _ => anyhow::bail!("Invalid limit status: {}", s),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Automatic,
    Manual,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Automatic => "automatic",
            ChangeType::Manual => "manual",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpiryType {
    DayEnd,
    WeekEnd,
    MonthEnd,
    NoExpiry,
    Custom,
}

impl ExpiryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExpiryType::DayEnd => "day_end",
            ExpiryType::WeekEnd => "week_end",
            ExpiryType::MonthEnd => "month_end",
            ExpiryType::NoExpiry => "no_expiry",
            ExpiryType::Custom => "custom",
        }
    }
}

impl std::str::FromStr for ExpiryType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "day_end" => Ok(ExpiryType::DayEnd),
            "week_end" => Ok(ExpiryType::WeekEnd),
            "month_end" => Ok(ExpiryType::MonthEnd),
            "no_expiry" => Ok(ExpiryType::NoExpiry),
            "custom" => Ok(ExpiryType::Custom),
            _ => anyhow::bail!("Invalid expiry type: {}", s),
        }
    }
}

/// Durable signal record as stored in the `signals` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub id: i64,
    pub message_id: String,
    pub channel_id: String,
    pub instrument: String,
    pub direction: Direction,
    pub stop_loss: Decimal,
    pub status: SignalStatus,
    pub expiry_type: ExpiryType,
    pub expiry_time: Option<DateTime<Utc>>,
    pub total_limits: i64,
    pub limits_hit: i64,
    pub first_limit_hit_time: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub closed_reason: Option<String>,
    pub scalp: bool,
}

impl Signal {
    pub fn is_manual(&self) -> bool {
        self.message_id.starts_with(MANUAL_MESSAGE_PREFIX)
    }
}

/// One entry level belonging to a signal. Sequence 1 is the "first" limit
/// and the only one eligible for an approaching alert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Limit {
    pub id: i64,
    pub signal_id: i64,
    pub sequence_number: i64,
    pub price_level: Decimal,
    pub status: LimitStatus,
    pub hit_time: Option<DateTime<Utc>>,
    pub hit_price: Option<Decimal>,
    pub approaching_alert_sent: bool,
    pub hit_alert_sent: bool,
}

/// Insert payload for a freshly parsed signal.
#[derive(Debug, Clone)]
pub struct NewSignal {
    pub message_id: String,
    pub channel_id: String,
    pub instrument: String,
    pub direction: Direction,
    pub stop_loss: Decimal,
    pub expiry_type: ExpiryType,
    pub expiry_time: Option<DateTime<Utc>>,
    pub limit_prices: Vec<Decimal>,
    pub scalp: bool,
}

/// Tracker working-set projection: the signal plus its still-pending limits.
/// Views are replaced wholesale on each refresh so operator-side mutations
/// to alert flags and hit counts are picked up.
#[derive(Debug, Clone)]
pub struct SignalView {
    pub signal: Signal,
    pub pending_limits: Vec<Limit>,
}

/// Immutable audit row written for every status transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusChange {
    pub id: i64,
    pub signal_id: i64,
    pub old_status: Option<SignalStatus>,
    pub new_status: SignalStatus,
    pub change_type: ChangeType,
    pub reason: Option<String>,
    pub changed_at: DateTime<Utc>,
}

/// Result of `SignalStore::mark_limit_hit`.
#[derive(Debug, Clone)]
pub struct LimitHitOutcome {
    pub signal_id: i64,
    pub status_changed: bool,
    pub new_status: SignalStatus,
    pub all_limits_hit: bool,
    /// True when the limit was already hit in the store and this call
    /// changed nothing. Happens when an earlier write committed but its
    /// response was lost to the tick deadline; the caller must not count
    /// or alert the fill a second time.
    pub already_applied: bool,
}

/// Snapshot of a hit limit, cached by the auto-TP monitor. `hit_price` is
/// the ground-truth entry basis for PnL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HitLimit {
    pub limit_id: i64,
    pub sequence_number: i64,
    pub price_level: Decimal,
    pub hit_price: Decimal,
    pub hit_time: DateTime<Utc>,
}
