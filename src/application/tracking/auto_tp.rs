//! Auto take-profit evaluation over the cached hit-limit history.
//!
//! On every tick for a signal with fills, the last hit limit's PnL must
//! clear the configured threshold while the earlier hit limits are
//! combined non-negative. The profit transition is persisted before the
//! alert goes out; a failed transition emits nothing.

use crate::domain::alerts::{AutoTpAlert, SignalSnapshot};
use crate::domain::market::Quote;
use crate::domain::ports::{AlertSink, SignalStore};
use crate::domain::signal::{ChangeType, HitLimit, Signal, SignalStatus};
use crate::infrastructure::config::TpConfig;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, info, warn};

const STORE_DEADLINE: Duration = Duration::from_secs(5);

pub struct AutoTpMonitor {
    tp_config: Arc<TpConfig>,
    store: Arc<dyn SignalStore>,
    sink: Arc<dyn AlertSink>,
    // signal_id -> hit limits ordered by sequence, entry basis = hit_price
    cache: Mutex<HashMap<i64, Vec<HitLimit>>>,
}

impl AutoTpMonitor {
    pub fn new(
        tp_config: Arc<TpConfig>,
        store: Arc<dyn SignalStore>,
        sink: Arc<dyn AlertSink>,
    ) -> Self {
        Self {
            tp_config,
            store,
            sink,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// (Re)loads the hit limits for a signal. Called by the tracker right
    /// after a limit hit is persisted.
    pub async fn refresh(&self, signal_id: i64) {
        let fetch = tokio::time::timeout(STORE_DEADLINE, self.store.hit_limits_for(signal_id)).await;
        match fetch {
            Ok(Ok(limits)) => {
                self.cache
                    .lock()
                    .expect("tp cache lock poisoned")
                    .insert(signal_id, limits);
            }
            Ok(Err(e)) => error!("Failed to refresh hit limits for {}: {}", signal_id, e),
            Err(_) => error!("Timed out refreshing hit limits for {}", signal_id),
        }
    }

    /// Drops a signal from the cache. Called when the signal terminates.
    pub fn evict(&self, signal_id: i64) {
        self.cache
            .lock()
            .expect("tp cache lock poisoned")
            .remove(&signal_id);
    }

    fn cached(&self, signal_id: i64) -> Option<Vec<HitLimit>> {
        self.cache
            .lock()
            .expect("tp cache lock poisoned")
            .get(&signal_id)
            .cloned()
    }

    /// Evaluates the TP condition for one signal on one tick. Returns true
    /// if the signal was transitioned to profit.
    pub async fn check_signal(&self, signal: &Signal, quote: &Quote) -> bool {
        if signal.status != SignalStatus::Hit {
            return false;
        }
        let Some(hit_limits) = self.cached(signal.id) else {
            return false;
        };
        let Some(last) = hit_limits.last() else {
            return false;
        };

        let close_price = quote.close_price(signal.direction);

        let last_pnl = self.tp_config.pnl(
            &signal.instrument,
            signal.direction,
            last.hit_price,
            close_price,
            signal.scalp,
        );
        let threshold = self.tp_config.threshold(&signal.instrument, signal.scalp);

        if last_pnl < threshold {
            return false;
        }

        let earlier = &hit_limits[..hit_limits.len() - 1];
        if !earlier.is_empty() {
            let combined: Decimal = earlier
                .iter()
                .map(|limit| {
                    self.tp_config.pnl(
                        &signal.instrument,
                        signal.direction,
                        limit.hit_price,
                        close_price,
                        signal.scalp,
                    )
                })
                .sum();
            if combined < Decimal::ZERO {
                return false;
            }
        }

        self.trigger(signal, hit_limits, last_pnl).await
    }

    async fn trigger(&self, signal: &Signal, hit_limits: Vec<HitLimit>, last_pnl: Decimal) -> bool {
        let pnl_display = self.tp_config.format_value(&signal.instrument, last_pnl);
        let reason = format!(
            "auto-TP: {} limits hit, last +{}",
            hit_limits.len(),
            pnl_display
        );
        info!("Signal {} ({}): {}", signal.id, signal.instrument, reason);

        let transition = tokio::time::timeout(
            STORE_DEADLINE,
            self.store.transition_status(
                signal.id,
                SignalStatus::Profit,
                ChangeType::Automatic,
                &reason,
            ),
        )
        .await;

        match transition {
            Ok(Ok(true)) => {}
            Ok(Ok(false)) => {
                warn!("Signal {}: auto-TP transition was a no-op", signal.id);
                return false;
            }
            Ok(Err(e)) => {
                error!("Signal {}: auto-TP transition failed: {}", signal.id, e);
                return false;
            }
            Err(_) => {
                error!("Signal {}: store timeout while marking auto-TP profit", signal.id);
                return false;
            }
        }

        self.evict(signal.id);

        let alert = AutoTpAlert {
            signal: SignalSnapshot::from(signal),
            hit_limits,
            last_pnl,
            pnl_display,
        };
        if let Err(e) = self.sink.auto_tp(&alert).await {
            error!("Signal {}: failed to send auto-TP alert: {}", signal.id, e);
        }

        true
    }
}
