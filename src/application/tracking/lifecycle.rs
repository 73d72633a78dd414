//! Periodic expiry sweep: signals past their expiry instant are cancelled
//! in the store and silently dropped from tracking (expiry is not an
//! alert-worthy event).

use crate::application::tracking::tracker::SignalTracker;
use crate::domain::ports::{Clock, SignalStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info};

const SWEEP_INTERVAL: Duration = Duration::from_secs(300);

pub struct ExpiryService {
    store: Arc<dyn SignalStore>,
    tracker: Arc<SignalTracker>,
    clock: Arc<dyn Clock>,
}

impl ExpiryService {
    pub fn new(
        store: Arc<dyn SignalStore>,
        tracker: Arc<SignalTracker>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            tracker,
            clock,
        }
    }

    pub async fn sweep(&self) {
        let now = self.clock.now_utc();
        match self.store.expire_old(now).await {
            Ok(expired) => {
                if expired.is_empty() {
                    return;
                }
                info!("Expiry sweep cancelled {} signal(s)", expired.len());
                for signal_id in expired {
                    self.tracker.remove_from_tracking(signal_id).await;
                }
            }
            Err(e) => error!("Expiry sweep failed: {}", e),
        }
    }

    pub fn spawn_worker(
        self: &Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => service.sweep().await,
                    _ = shutdown.changed() => {
                        debug!("Expiry sweep worker stopping");
                        break;
                    }
                }
            }
        })
    }
}
