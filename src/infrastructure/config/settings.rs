//! Global settings snapshot (`config/settings.json`), cached so the
//! tracker can consult the spread-buffer toggle on every tick without
//! touching disk more than once per 30 seconds.

use anyhow::Result;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

const CACHE_DURATION: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpreadBufferConfig {
    pub apply_to_approaching: bool,
    pub apply_to_hit: bool,
    pub apply_to_stop_loss: bool,
    pub fallback_spread: Decimal,
    pub log_buffer_usage: bool,
}

impl Default for SpreadBufferConfig {
    fn default() -> Self {
        Self {
            apply_to_approaching: true,
            apply_to_hit: true,
            // Stop losses are always checked at exact prices
            apply_to_stop_loss: false,
            fallback_spread: Decimal::ZERO,
            log_buffer_usage: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_true")]
    pub spread_buffer_enabled: bool,
    #[serde(default)]
    pub spread_buffer_config: SpreadBufferConfig,
    #[serde(default = "default_prefix")]
    pub bot_prefix: String,
}

fn default_true() -> bool {
    true
}

fn default_prefix() -> String {
    "!".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            spread_buffer_enabled: true,
            spread_buffer_config: SpreadBufferConfig::default(),
            bot_prefix: default_prefix(),
        }
    }
}

/// Settings file access with a 30-second read cache. Writes refresh the
/// cache immediately.
pub struct SettingsStore {
    path: PathBuf,
    cached: Mutex<CachedSettings>,
}

struct CachedSettings {
    settings: Settings,
    loaded_at: Option<Instant>,
}

impl SettingsStore {
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let settings = Self::read_file(&path);
        Self {
            path,
            cached: Mutex::new(CachedSettings {
                settings,
                loaded_at: Some(Instant::now()),
            }),
        }
    }

    fn read_file(path: &Path) -> Settings {
        match std::fs::read_to_string(path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(settings) => settings,
                Err(e) => {
                    error!(
                        "Invalid JSON in {}: {}, using default settings",
                        path.display(),
                        e
                    );
                    Settings::default()
                }
            },
            Err(_) => {
                debug!("No settings file at {}, using defaults", path.display());
                Settings::default()
            }
        }
    }

    /// Current settings, re-read from disk at most every 30 seconds.
    pub fn current(&self) -> Settings {
        let mut cached = self.cached.lock().expect("settings lock poisoned");
        let stale = match cached.loaded_at {
            Some(at) => at.elapsed() > CACHE_DURATION,
            None => true,
        };
        if stale {
            cached.settings = Self::read_file(&self.path);
            cached.loaded_at = Some(Instant::now());
            debug!(
                "Settings reloaded: spread_buffer_enabled={}",
                cached.settings.spread_buffer_enabled
            );
        }
        cached.settings.clone()
    }

    pub fn spread_buffer_enabled(&self) -> bool {
        self.current().spread_buffer_enabled
    }

    /// Flips the spread-buffer toggle and persists it.
    pub fn set_spread_buffer(&self, enabled: bool) -> Result<()> {
        let mut cached = self.cached.lock().expect("settings lock poisoned");
        cached.settings.spread_buffer_enabled = enabled;
        cached.loaded_at = Some(Instant::now());
        super::write_json_atomic(&self.path, &cached.settings)?;
        info!("Spread buffer {}", if enabled { "enabled" } else { "disabled" });
        Ok(())
    }

    /// Drops the cache so the next read hits the disk.
    pub fn invalidate(&self) {
        let mut cached = self.cached.lock().expect("settings lock poisoned");
        cached.loaded_at = None;
    }
}
