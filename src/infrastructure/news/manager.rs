//! Holds the live set of news windows and answers the per-hit question
//! "is there an active event covering this instrument right now?".
//!
//! Events survive restarts via `config/news_events.json`, written on every
//! mutation (events are infrequent, so synchronous writes are fine).

use crate::domain::alerts::NewsActivatedAlert;
use crate::domain::news::NewsEvent;
use crate::domain::ports::{AlertSink, Clock};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, error, info, warn};

const ACTIVATION_SCAN_INTERVAL: Duration = Duration::from_secs(30);
// Purge runs every 10th activation scan, roughly every 5 minutes
const PURGE_EVERY_N_SCANS: u32 = 10;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct NewsFile {
    next_id: i64,
    events: Vec<NewsEvent>,
}

struct NewsState {
    events: Vec<NewsEvent>,
    next_id: i64,
}

pub struct NewsManager {
    config_path: PathBuf,
    clock: Arc<dyn Clock>,
    state: RwLock<NewsState>,
}

impl NewsManager {
    /// Loads persisted events, discarding any that already expired.
    pub fn load(config_path: impl AsRef<Path>, clock: Arc<dyn Clock>) -> Self {
        let config_path = config_path.as_ref().to_path_buf();
        let now = clock.now_utc();

        let mut state = NewsState {
            events: Vec::new(),
            next_id: 1,
        };

        match std::fs::read_to_string(&config_path) {
            Ok(raw) => match serde_json::from_str::<NewsFile>(&raw) {
                Ok(file) => {
                    state.next_id = file.next_id.max(1);
                    for event in file.events {
                        if event.is_expired(now) {
                            debug!("Skipping expired event on load: {}", event);
                        } else {
                            state.events.push(event);
                        }
                    }
                    info!(
                        "Loaded {} news event(s) from {}",
                        state.events.len(),
                        config_path.display()
                    );
                }
                Err(e) => error!("Failed to parse news events file: {}", e),
            },
            Err(_) => debug!("No news events file found, starting fresh"),
        }

        Self {
            config_path,
            clock,
            state: RwLock::new(state),
        }
    }

    fn save(&self, state: &NewsState) {
        let now = self.clock.now_utc();
        let file = NewsFile {
            next_id: state.next_id,
            events: state
                .events
                .iter()
                .filter(|e| !e.is_expired(now))
                .cloned()
                .collect(),
        };
        if self.config_path.as_os_str().is_empty() {
            return;
        }
        if let Err(e) = crate::infrastructure::config::write_json_atomic(&self.config_path, &file) {
            error!("Failed to save news events to disk: {}", e);
        }
    }

    /// Registers a new event, persists, and returns it.
    pub fn add(
        &self,
        category: &str,
        news_time: DateTime<Utc>,
        window_minutes: i64,
        created_by: &str,
    ) -> NewsEvent {
        let mut state = self.state.write().expect("news lock poisoned");
        let event = NewsEvent {
            event_id: state.next_id,
            category: category.to_string(),
            news_time,
            window_minutes,
            created_by: created_by.to_string(),
            created_at: self.clock.now_utc(),
        };
        state.next_id += 1;
        state.events.push(event.clone());
        self.save(&state);
        info!("News event added: {}", event);
        event
    }

    pub fn remove(&self, event_id: i64) -> bool {
        let mut state = self.state.write().expect("news lock poisoned");
        let before = state.events.len();
        state.events.retain(|e| e.event_id != event_id);
        let found = state.events.len() < before;
        if found {
            self.save(&state);
        }
        found
    }

    /// All non-expired events, for display.
    pub fn all(&self) -> Vec<NewsEvent> {
        let now = self.clock.now_utc();
        let state = self.state.read().expect("news lock poisoned");
        state
            .events
            .iter()
            .filter(|e| !e.is_expired(now))
            .cloned()
            .collect()
    }

    /// First active event covering the instrument, if any. Called on every
    /// would-be limit hit, so it stays allocation-free on the miss path.
    pub fn active_for(&self, instrument: &str) -> Option<NewsEvent> {
        let now = self.clock.now_utc();
        let state = self.state.read().expect("news lock poisoned");
        state
            .events
            .iter()
            .find(|e| e.is_active(now) && e.affects(instrument))
            .cloned()
    }

    /// Drops fully passed events from memory and disk.
    pub fn purge_expired(&self) {
        let now = self.clock.now_utc();
        let mut state = self.state.write().expect("news lock poisoned");
        let before = state.events.len();
        state.events.retain(|e| !e.is_expired(now));
        let removed = before - state.events.len();
        if removed > 0 {
            debug!("Purged {} expired news event(s)", removed);
            self.save(&state);
        }
    }

    /// Background worker: fires a one-time news-activated notification when
    /// a window opens, and periodically purges expired events.
    pub fn spawn_worker(
        self: &Arc<Self>,
        sink: Arc<dyn AlertSink>,
    ) -> tokio::task::JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut alerted: HashSet<i64> = HashSet::new();
            let mut scans: u32 = 0;
            let mut interval = tokio::time::interval(ACTIVATION_SCAN_INTERVAL);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                interval.tick().await;
                let now = manager.clock.now_utc();

                let newly_active: Vec<NewsEvent> = {
                    let state = manager.state.read().expect("news lock poisoned");
                    state
                        .events
                        .iter()
                        .filter(|e| e.is_active(now) && !alerted.contains(&e.event_id))
                        .cloned()
                        .collect()
                };

                for event in newly_active {
                    alerted.insert(event.event_id);
                    let alert = NewsActivatedAlert {
                        event_id: event.event_id,
                        category: event.category.clone(),
                        window_start: event.start_time(),
                        window_end: event.end_time(),
                    };
                    if let Err(e) = sink.news_activated(&alert).await {
                        warn!("Failed to send news activated alert: {}", e);
                    }
                }

                scans += 1;
                if scans >= PURGE_EVERY_N_SCANS {
                    scans = 0;
                    manager.purge_expired();
                    let live: HashSet<i64> = {
                        let state = manager.state.read().expect("news lock poisoned");
                        state.events.iter().map(|e| e.event_id).collect()
                    };
                    alerted.retain(|id| live.contains(id));
                }
            }
        })
    }
}
