//! SQLite-backed `SignalStore`. All writes are transactional at the grain
//! of a single signal; timestamps are stored as RFC3339 UTC text and
//! prices as decimal text.

use crate::domain::errors::StoreError;
use crate::domain::ports::SignalStore;
use crate::domain::signal::{
    ChangeType, Direction, ExpiryType, HitLimit, Limit, LimitHitOutcome, LimitStatus, NewSignal,
    Signal, SignalStatus, SignalView, can_transition,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{info, warn};

pub struct SqliteSignalStore {
    pool: SqlitePool,
}

impl SqliteSignalStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn map_signal(row: &SqliteRow) -> Result<Signal, StoreError> {
        let direction: String = row.try_get("direction")?;
        let status: String = row.try_get("status")?;
        let expiry_type: Option<String> = row.try_get("expiry_type")?;
        let stop_loss: String = row.try_get("stop_loss")?;

        Ok(Signal {
            id: row.try_get("id")?,
            message_id: row.try_get("message_id")?,
            channel_id: row.try_get("channel_id")?,
            instrument: row.try_get("instrument")?,
            direction: Direction::from_str(&direction).map_err(StoreError::unavailable)?,
            stop_loss: Decimal::from_str(&stop_loss).unwrap_or_default(),
            status: SignalStatus::from_str(&status).map_err(StoreError::unavailable)?,
            expiry_type: expiry_type
                .as_deref()
                .map(ExpiryType::from_str)
                .transpose()
                .map_err(StoreError::unavailable)?
                .unwrap_or(ExpiryType::NoExpiry),
            expiry_time: parse_dt(row.try_get("expiry_time")?),
            total_limits: row.try_get("total_limits")?,
            limits_hit: row.try_get("limits_hit")?,
            first_limit_hit_time: parse_dt(row.try_get("first_limit_hit_time")?),
            closed_at: parse_dt(row.try_get("closed_at")?),
            closed_reason: row.try_get("closed_reason")?,
            scalp: row.try_get::<i64, _>("scalp")? != 0,
        })
    }

    fn map_limit(row: &SqliteRow) -> Result<Limit, StoreError> {
        let status: String = row.try_get("status")?;
        let price_level: String = row.try_get("price_level")?;
        let hit_price: Option<String> = row.try_get("hit_price")?;

        Ok(Limit {
            id: row.try_get("id")?,
            signal_id: row.try_get("signal_id")?,
            sequence_number: row.try_get("sequence_number")?,
            price_level: Decimal::from_str(&price_level).unwrap_or_default(),
            status: LimitStatus::from_str(&status).map_err(StoreError::unavailable)?,
            hit_time: parse_dt(row.try_get("hit_time")?),
            hit_price: hit_price.and_then(|p| Decimal::from_str(&p).ok()),
            approaching_alert_sent: row.try_get::<i64, _>("approaching_alert_sent")? != 0,
            hit_alert_sent: row.try_get::<i64, _>("hit_alert_sent")? != 0,
        })
    }

    async fn pending_limits(&self, signal_id: i64) -> Result<Vec<Limit>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM limits WHERE signal_id = ? AND status = 'pending' ORDER BY sequence_number ASC",
        )
        .bind(signal_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::map_limit).collect()
    }

    /// Applies a status transition inside a fresh transaction. Shared by
    /// `transition_status`, `expire_old` and `cancel_all_open`.
    async fn apply_transition(
        &self,
        signal_id: i64,
        new_status: SignalStatus,
        change_type: ChangeType,
        reason: &str,
    ) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT status, limits_hit FROM signals WHERE id = ?")
            .bind(signal_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(StoreError::SignalNotFound { signal_id })?;

        let old_raw: String = row.try_get("status")?;
        let old_status = SignalStatus::from_str(&old_raw).map_err(StoreError::unavailable)?;

        if old_status == new_status {
            info!("Signal {} already has status {}", signal_id, new_status);
            return Ok(false);
        }

        if change_type == ChangeType::Automatic && !can_transition(old_status, new_status) {
            return Err(StoreError::Conflict {
                signal_id,
                from: old_status,
                to: new_status,
            });
        }

        let now = Utc::now().to_rfc3339();

        if new_status.is_terminal() {
            sqlx::query(
                r#"
                UPDATE signals
                SET status = ?, updated_at = ?, closed_at = ?, closed_reason = ?
                WHERE id = ?
                "#,
            )
            .bind(new_status.as_str())
            .bind(&now)
            .bind(&now)
            .bind(reason)
            .bind(signal_id)
            .execute(&mut *tx)
            .await?;

            // Any still-pending limits die with the signal
            sqlx::query(
                "UPDATE limits SET status = 'cancelled' WHERE signal_id = ? AND status = 'pending'",
            )
            .bind(signal_id)
            .execute(&mut *tx)
            .await?;
        } else {
            sqlx::query(
                r#"
                UPDATE signals
                SET status = ?, updated_at = ?, closed_at = NULL, closed_reason = NULL
                WHERE id = ?
                "#,
            )
            .bind(new_status.as_str())
            .bind(&now)
            .bind(signal_id)
            .execute(&mut *tx)
            .await?;

            // Revival: cancelled limits come back as pending
            if old_status.is_terminal() {
                sqlx::query(
                    "UPDATE limits SET status = 'pending' WHERE signal_id = ? AND status = 'cancelled'",
                )
                .bind(signal_id)
                .execute(&mut *tx)
                .await?;
            }
        }

        sqlx::query(
            r#"
            INSERT INTO status_changes (signal_id, old_status, new_status, change_type, reason, changed_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(signal_id)
        .bind(old_status.as_str())
        .bind(new_status.as_str())
        .bind(change_type.as_str())
        .bind(reason)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        info!(
            "Signal {} status: {} -> {} ({})",
            signal_id, old_status, new_status, reason
        );
        Ok(true)
    }
}

#[async_trait]
impl SignalStore for SqliteSignalStore {
    async fn insert_signal(&self, new: &NewSignal) -> Result<i64, StoreError> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now().to_rfc3339();

        let result = sqlx::query(
            r#"
            INSERT INTO signals
                (message_id, channel_id, instrument, direction, stop_loss,
                 expiry_type, expiry_time, status, total_limits, limits_hit,
                 scalp, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, 'active', ?, 0, ?, ?, ?)
            "#,
        )
        .bind(&new.message_id)
        .bind(&new.channel_id)
        .bind(new.instrument.to_uppercase())
        .bind(new.direction.as_str())
        .bind(new.stop_loss.to_string())
        .bind(new.expiry_type.as_str())
        .bind(new.expiry_time.map(|t| t.to_rfc3339()))
        .bind(new.limit_prices.len() as i64)
        .bind(new.scalp as i64)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(db) = &e
                && db.is_unique_violation()
            {
                StoreError::DuplicateMessage {
                    message_id: new.message_id.clone(),
                }
            } else {
                StoreError::from(e)
            }
        })?;

        let signal_id = result.last_insert_rowid();

        for (i, price) in new.limit_prices.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO limits (signal_id, price_level, sequence_number, status, created_at)
                VALUES (?, ?, ?, 'pending', ?)
                "#,
            )
            .bind(signal_id)
            .bind(price.to_string())
            .bind((i + 1) as i64)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        info!(
            "Inserted signal {} ({} {} with {} limits)",
            signal_id,
            new.instrument,
            new.direction,
            new.limit_prices.len()
        );
        Ok(signal_id)
    }

    async fn insert_limits(&self, signal_id: i64, prices: &[Decimal]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now().to_rfc3339();

        let row = sqlx::query(
            "SELECT COALESCE(MAX(sequence_number), 0) AS max_seq FROM limits WHERE signal_id = ?",
        )
        .bind(signal_id)
        .fetch_one(&mut *tx)
        .await?;
        let max_seq: i64 = row.try_get("max_seq")?;

        for (i, price) in prices.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO limits (signal_id, price_level, sequence_number, status, created_at)
                VALUES (?, ?, ?, 'pending', ?)
                "#,
            )
            .bind(signal_id)
            .bind(price.to_string())
            .bind(max_seq + i as i64 + 1)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("UPDATE signals SET total_limits = total_limits + ?, updated_at = ? WHERE id = ?")
            .bind(prices.len() as i64)
            .bind(&now)
            .bind(signal_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn get_active_for_tracking(&self) -> Result<Vec<SignalView>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM signals WHERE status IN ('active', 'hit') ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut views = Vec::with_capacity(rows.len());
        for row in &rows {
            let signal = Self::map_signal(row)?;
            let pending_limits = self.pending_limits(signal.id).await?;
            views.push(SignalView {
                signal,
                pending_limits,
            });
        }
        Ok(views)
    }

    async fn mark_limit_hit(
        &self,
        limit_id: i64,
        actual_price: Decimal,
    ) -> Result<LimitHitOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            SELECT l.signal_id, l.status AS limit_status,
                   s.status AS signal_status, s.total_limits, s.limits_hit
            FROM limits l
            JOIN signals s ON l.signal_id = s.id
            WHERE l.id = ?
            "#,
        )
        .bind(limit_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::LimitNotFound { limit_id })?;

        let signal_id: i64 = row.try_get("signal_id")?;
        let signal_status_raw: String = row.try_get("signal_status")?;
        let signal_status =
            SignalStatus::from_str(&signal_status_raw).map_err(StoreError::unavailable)?;
        let total_limits: i64 = row.try_get("total_limits")?;
        let limits_hit: i64 = row.try_get("limits_hit")?;
        let limit_status: String = row.try_get("limit_status")?;

        if limit_status == "hit" {
            // Replayed tick; nothing to do
            warn!("Limit {} already marked hit, skipping", limit_id);
            return Ok(LimitHitOutcome {
                signal_id,
                status_changed: false,
                new_status: signal_status,
                all_limits_hit: limits_hit >= total_limits,
                already_applied: true,
            });
        }

        let now = Utc::now().to_rfc3339();

        sqlx::query(
            r#"
            UPDATE limits
            SET status = 'hit', hit_time = ?, hit_price = ?, hit_alert_sent = 1
            WHERE id = ?
            "#,
        )
        .bind(&now)
        .bind(actual_price.to_string())
        .bind(limit_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE signals SET limits_hit = limits_hit + 1, updated_at = ? WHERE id = ?")
            .bind(&now)
            .bind(signal_id)
            .execute(&mut *tx)
            .await?;

        let mut status_changed = false;
        if signal_status == SignalStatus::Active {
            sqlx::query(
                r#"
                UPDATE signals
                SET status = 'hit', first_limit_hit_time = ?, updated_at = ?
                WHERE id = ?
                "#,
            )
            .bind(&now)
            .bind(&now)
            .bind(signal_id)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                r#"
                INSERT INTO status_changes (signal_id, old_status, new_status, change_type, reason, changed_at)
                VALUES (?, 'active', 'hit', 'automatic', ?, ?)
                "#,
            )
            .bind(signal_id)
            .bind(format!("Limit {} hit", limit_id))
            .bind(&now)
            .execute(&mut *tx)
            .await?;

            status_changed = true;
        }

        tx.commit().await?;

        if status_changed {
            info!("Signal {} status changed to hit (first limit hit)", signal_id);
        }

        Ok(LimitHitOutcome {
            signal_id,
            status_changed,
            new_status: if status_changed {
                SignalStatus::Hit
            } else {
                signal_status
            },
            all_limits_hit: limits_hit + 1 >= total_limits,
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
        self.apply_transition(signal_id, new_status, change_type, reason)
            .await
    }

    async fn mark_approaching_sent(&self, limit_id: i64) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE limits SET approaching_alert_sent = 1 WHERE id = ?")
            .bind(limit_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::LimitNotFound { limit_id });
        }
        Ok(())
    }

    async fn hit_limits_for(&self, signal_id: i64) -> Result<Vec<HitLimit>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM limits WHERE signal_id = ? AND status = 'hit' ORDER BY sequence_number ASC",
        )
        .bind(signal_id)
        .fetch_all(&self.pool)
        .await?;

        let mut hits = Vec::with_capacity(rows.len());
        for row in &rows {
            let limit = Self::map_limit(row)?;
            let Some(hit_price) = limit.hit_price else {
                warn!("Hit limit {} has no hit_price, using level", limit.id);
                hits.push(HitLimit {
                    limit_id: limit.id,
                    sequence_number: limit.sequence_number,
                    price_level: limit.price_level,
                    hit_price: limit.price_level,
                    hit_time: limit.hit_time.unwrap_or_else(Utc::now),
                });
                continue;
            };
            hits.push(HitLimit {
                limit_id: limit.id,
                sequence_number: limit.sequence_number,
                price_level: limit.price_level,
                hit_price,
                hit_time: limit.hit_time.unwrap_or_else(Utc::now),
            });
        }
        Ok(hits)
    }

    async fn expire_old(&self, now: DateTime<Utc>) -> Result<Vec<i64>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, expiry_time FROM signals WHERE status IN ('active', 'hit') AND expiry_time IS NOT NULL",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut expired = Vec::new();
        for row in &rows {
            let signal_id: i64 = row.try_get("id")?;
            let Some(expiry_time) = parse_dt(row.try_get("expiry_time")?) else {
                continue;
            };
            if expiry_time >= now {
                continue;
            }
            match self
                .apply_transition(signal_id, SignalStatus::Cancelled, ChangeType::Automatic, "expired")
                .await
            {
                Ok(true) => expired.push(signal_id),
                Ok(false) => {}
                Err(e) => warn!("Failed to expire signal {}: {}", signal_id, e),
            }
        }

        if !expired.is_empty() {
            info!("Expired {} signals", expired.len());
        }
        Ok(expired)
    }

    async fn get_signal(&self, signal_id: i64) -> Result<Option<SignalView>, StoreError> {
        let Some(row) = sqlx::query("SELECT * FROM signals WHERE id = ?")
            .bind(signal_id)
            .fetch_optional(&self.pool)
            .await?
        else {
            return Ok(None);
        };
        let signal = Self::map_signal(&row)?;
        let pending_limits = self.pending_limits(signal_id).await?;
        Ok(Some(SignalView {
            signal,
            pending_limits,
        }))
    }

    async fn get_by_message(&self, message_id: &str) -> Result<Option<Signal>, StoreError> {
        let row = sqlx::query("SELECT * FROM signals WHERE message_id = ?")
            .bind(message_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::map_signal).transpose()
    }

    async fn update_from_edit(
        &self,
        message_id: &str,
        new_signal: &NewSignal,
    ) -> Result<bool, StoreError> {
        let Some(existing) = self.get_by_message(message_id).await? else {
            return Ok(false);
        };

        // Once fills exist the edit can no longer be applied cleanly
        if existing.limits_hit > 0 || existing.status.is_terminal() {
            warn!(
                "Ignoring edit for signal {}: status {} with {} fills",
                existing.id, existing.status, existing.limits_hit
            );
            return Ok(false);
        }

        let mut tx = self.pool.begin().await?;
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            r#"
            UPDATE signals
            SET instrument = ?, direction = ?, stop_loss = ?,
                expiry_type = ?, expiry_time = ?, total_limits = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(new_signal.instrument.to_uppercase())
        .bind(new_signal.direction.as_str())
        .bind(new_signal.stop_loss.to_string())
        .bind(new_signal.expiry_type.as_str())
        .bind(new_signal.expiry_time.map(|t| t.to_rfc3339()))
        .bind(new_signal.limit_prices.len() as i64)
        .bind(&now)
        .bind(existing.id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM limits WHERE signal_id = ?")
            .bind(existing.id)
            .execute(&mut *tx)
            .await?;

        for (i, price) in new_signal.limit_prices.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO limits (signal_id, price_level, sequence_number, status, created_at)
                VALUES (?, ?, ?, 'pending', ?)
                "#,
            )
            .bind(existing.id)
            .bind(price.to_string())
            .bind((i + 1) as i64)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        info!("Signal {} updated from message edit", existing.id);
        Ok(true)
    }

    async fn set_expiry(
        &self,
        signal_id: i64,
        expiry_type: ExpiryType,
        expiry_time: Option<DateTime<Utc>>,
    ) -> Result<bool, StoreError> {
        let Some(view) = self.get_signal(signal_id).await? else {
            return Err(StoreError::SignalNotFound { signal_id });
        };
        if view.signal.status.is_terminal() {
            return Ok(false);
        }

        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE signals SET expiry_type = ?, expiry_time = ?, updated_at = ? WHERE id = ?")
            .bind(expiry_type.as_str())
            .bind(expiry_time.map(|t| t.to_rfc3339()))
            .bind(&now)
            .bind(signal_id)
            .execute(&mut *tx)
            .await?;

        // Audited even though the status itself is unchanged
        sqlx::query(
            r#"
            INSERT INTO status_changes (signal_id, old_status, new_status, change_type, reason, changed_at)
            VALUES (?, ?, ?, 'manual', ?, ?)
            "#,
        )
        .bind(signal_id)
        .bind(view.signal.status.as_str())
        .bind(view.signal.status.as_str())
        .bind(format!(
            "Expiry changed from {} to {}",
            view.signal.expiry_type.as_str(),
            expiry_type.as_str()
        ))
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn delete_signal(&self, signal_id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM signals WHERE id = ?")
            .bind(signal_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn cancel_all_open(&self, reason: &str) -> Result<Vec<i64>, StoreError> {
        let rows = sqlx::query("SELECT id FROM signals WHERE status IN ('active', 'hit')")
            .fetch_all(&self.pool)
            .await?;

        let mut cancelled = Vec::new();
        for row in &rows {
            let signal_id: i64 = row.try_get("id")?;
            match self
                .apply_transition(signal_id, SignalStatus::Cancelled, ChangeType::Manual, reason)
                .await
            {
                Ok(true) => cancelled.push(signal_id),
                Ok(false) => {}
                Err(e) => warn!("Failed to cancel signal {}: {}", signal_id, e),
            }
        }
        Ok(cancelled)
    }
}

fn parse_dt(raw: Option<String>) -> Option<DateTime<Utc>> {
    raw.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    })
}
