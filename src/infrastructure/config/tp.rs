//! Auto take-profit thresholds (`config/tp_configuration.json`): the same
//! defaults/overrides shape as alert distances, duplicated for scalp
//! signals which use a tighter table. PnL is always computed in the same
//! native unit as the threshold (pips for forex, dollars for the rest).

use crate::domain::market::AssetClass;
use crate::domain::signal::Direction;
use crate::infrastructure::symbols::{asset_class, pip_size};
use anyhow::Result;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TpUnit {
    Pips,
    Dollars,
}

impl fmt::Display for TpUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TpUnit::Pips => write!(f, "pips"),
            TpUnit::Dollars => write!(f, "dollars"),
        }
    }
}

impl std::str::FromStr for TpUnit {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pips" => Ok(TpUnit::Pips),
            "dollars" => Ok(TpUnit::Dollars),
            _ => anyhow::bail!("Invalid TP type: {}. Must be 'pips' or 'dollars'", s),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TpEntry {
    #[serde(rename = "type")]
    pub unit: TpUnit,
    pub value: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub set_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub set_at: Option<DateTime<Utc>>,
}

impl TpEntry {
    fn entry(unit: TpUnit, value: Decimal, description: &str) -> Self {
        Self {
            unit,
            value,
            description: Some(description.to_string()),
            set_by: None,
            set_at: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TpFile {
    pub defaults: HashMap<String, TpEntry>,
    #[serde(default)]
    pub scalp_defaults: HashMap<String, TpEntry>,
    #[serde(default)]
    pub overrides: HashMap<String, TpEntry>,
    #[serde(default)]
    pub scalp_overrides: HashMap<String, TpEntry>,
}

impl Default for TpFile {
    fn default() -> Self {
        let mut defaults = HashMap::new();
        defaults.insert(
            "forex".to_string(),
            TpEntry::entry(TpUnit::Pips, dec!(10.0), "Standard forex pairs"),
        );
        defaults.insert(
            "forex_jpy".to_string(),
            TpEntry::entry(TpUnit::Pips, dec!(10.0), "JPY pairs (auto-detected)"),
        );
        defaults.insert(
            "metals".to_string(),
            TpEntry::entry(TpUnit::Dollars, dec!(5.0), "Gold, Silver, etc."),
        );
        defaults.insert(
            "indices".to_string(),
            TpEntry::entry(TpUnit::Dollars, dec!(20.0), "Stock indices"),
        );
        defaults.insert(
            "stocks".to_string(),
            TpEntry::entry(TpUnit::Dollars, dec!(1.0), "Individual stocks"),
        );
        defaults.insert(
            "crypto".to_string(),
            TpEntry::entry(TpUnit::Dollars, dec!(50.0), "Cryptocurrencies"),
        );
        defaults.insert(
            "oil".to_string(),
            TpEntry::entry(TpUnit::Dollars, dec!(0.5), "Oil commodities"),
        );

        let mut scalp_defaults = HashMap::new();
        scalp_defaults.insert(
            "forex".to_string(),
            TpEntry::entry(TpUnit::Pips, dec!(3.0), "Scalp - Standard forex pairs"),
        );
        scalp_defaults.insert(
            "forex_jpy".to_string(),
            TpEntry::entry(TpUnit::Pips, dec!(5.0), "Scalp - JPY pairs (auto-detected)"),
        );
        scalp_defaults.insert(
            "metals".to_string(),
            TpEntry::entry(TpUnit::Dollars, dec!(2.0), "Scalp - Gold, Silver, etc."),
        );
        scalp_defaults.insert(
            "indices".to_string(),
            TpEntry::entry(TpUnit::Dollars, dec!(10.0), "Scalp - Stock indices"),
        );
        scalp_defaults.insert(
            "stocks".to_string(),
            TpEntry::entry(TpUnit::Dollars, dec!(0.5), "Scalp - Individual stocks"),
        );
        scalp_defaults.insert(
            "crypto".to_string(),
            TpEntry::entry(TpUnit::Dollars, dec!(20.0), "Scalp - Cryptocurrencies"),
        );
        scalp_defaults.insert(
            "oil".to_string(),
            TpEntry::entry(TpUnit::Dollars, dec!(0.2), "Scalp - Oil commodities"),
        );

        Self {
            defaults,
            scalp_defaults,
            overrides: HashMap::new(),
            scalp_overrides: HashMap::new(),
        }
    }
}

pub struct TpConfig {
    config_path: PathBuf,
    config: RwLock<TpFile>,
}

impl TpConfig {
    pub fn load(config_path: impl AsRef<Path>) -> Self {
        let config_path = config_path.as_ref().to_path_buf();
        let config = match std::fs::read_to_string(&config_path) {
            Ok(raw) => match serde_json::from_str::<TpFile>(&raw) {
                Ok(mut config) => {
                    // Migration for older files without scalp sections
                    if config.scalp_defaults.is_empty() {
                        config.scalp_defaults = TpFile::default().scalp_defaults;
                    }
                    config
                }
                Err(e) => {
                    error!("Invalid JSON in TP config: {}. Using defaults.", e);
                    TpFile::default()
                }
            },
            Err(_) => {
                warn!("TP config not found, creating default: {}", config_path.display());
                let config = TpFile::default();
                if let Err(e) = super::write_json_atomic(&config_path, &config) {
                    error!("Failed to save default TP config: {}", e);
                }
                config
            }
        };
        info!("TPConfig initialized");
        Self {
            config_path,
            config: RwLock::new(config),
        }
    }

    pub fn with_config(config: TpFile) -> Self {
        Self {
            config_path: PathBuf::new(),
            config: RwLock::new(config),
        }
    }

    fn resolve(&self, symbol: &str, scalp: bool) -> (TpUnit, Decimal) {
        let upper = symbol.to_uppercase();
        let config = self.config.read().expect("tp lock poisoned");
        let class = asset_class(&upper);

        if scalp {
            if let Some(entry) = config.scalp_overrides.get(&upper) {
                return (entry.unit, entry.value);
            }
            if let Some(entry) = config.scalp_defaults.get(class.as_str()) {
                return (entry.unit, entry.value);
            }
            // No scalp config: fall through to the regular table
        }

        if let Some(entry) = config.overrides.get(&upper) {
            return (entry.unit, entry.value);
        }
        if let Some(entry) = config.defaults.get(class.as_str()) {
            return (entry.unit, entry.value);
        }

        warn!("No TP config for {}, using fallback $5", upper);
        (TpUnit::Dollars, dec!(5.0))
    }

    /// Threshold in its native unit; compare against `pnl`.
    pub fn threshold(&self, symbol: &str, scalp: bool) -> Decimal {
        self.resolve(symbol, scalp).1
    }

    pub fn unit(&self, symbol: &str, scalp: bool) -> TpUnit {
        self.resolve(symbol, scalp).0
    }

    /// PnL of a single filled limit in native units: pips for forex
    /// instruments, raw price difference for everything else.
    pub fn pnl(
        &self,
        symbol: &str,
        direction: Direction,
        entry_price: Decimal,
        current_price: Decimal,
        scalp: bool,
    ) -> Decimal {
        let raw = match direction {
            Direction::Long => current_price - entry_price,
            Direction::Short => entry_price - current_price,
        };
        match self.unit(symbol, scalp) {
            TpUnit::Pips => raw / pip_size(symbol),
            TpUnit::Dollars => raw,
        }
    }

    /// Formats a PnL/threshold value with its unit label.
    pub fn format_value(&self, symbol: &str, value: Decimal) -> String {
        match self.unit(symbol, false) {
            TpUnit::Pips => format!("{:.1} pips", value),
            TpUnit::Dollars => format!("${:.2}", value),
        }
    }

    pub fn set_override(
        &self,
        symbol: &str,
        value: Decimal,
        unit: TpUnit,
        set_by: &str,
        scalp: bool,
    ) -> Result<()> {
        anyhow::ensure!(value > Decimal::ZERO, "TP value must be positive");
        let upper = symbol.to_uppercase();
        {
            let mut config = self.config.write().expect("tp lock poisoned");
            let section = if scalp {
                &mut config.scalp_overrides
            } else {
                &mut config.overrides
            };
            section.insert(
                upper.clone(),
                TpEntry {
                    unit,
                    value,
                    description: None,
                    set_by: Some(set_by.to_string()),
                    set_at: Some(Utc::now()),
                },
            );
        }
        self.save()?;
        info!(
            "Set {}TP override: {} = {} {}",
            if scalp { "scalp " } else { "" },
            upper,
            value,
            unit
        );
        Ok(())
    }

    pub fn set_default(
        &self,
        class: AssetClass,
        value: Decimal,
        unit: TpUnit,
        scalp: bool,
    ) -> Result<()> {
        anyhow::ensure!(value > Decimal::ZERO, "TP value must be positive");
        {
            let mut config = self.config.write().expect("tp lock poisoned");
            let section = if scalp {
                &mut config.scalp_defaults
            } else {
                &mut config.defaults
            };
            let Some(entry) = section.get_mut(class.as_str()) else {
                anyhow::bail!("Unknown asset class: {}", class);
            };
            entry.value = value;
            entry.unit = unit;
        }
        self.save()?;
        info!(
            "Set {}TP default: {} = {} {}",
            if scalp { "scalp " } else { "" },
            class,
            value,
            unit
        );
        Ok(())
    }

    pub fn remove_override(&self, symbol: &str, scalp: bool) -> Result<bool> {
        let upper = symbol.to_uppercase();
        let removed = {
            let mut config = self.config.write().expect("tp lock poisoned");
            let section = if scalp {
                &mut config.scalp_overrides
            } else {
                &mut config.overrides
            };
            section.remove(&upper).is_some()
        };
        if removed {
            self.save()?;
            info!("Removed {}TP override: {}", if scalp { "scalp " } else { "" }, upper);
        }
        Ok(removed)
    }

    pub fn snapshot(&self) -> TpFile {
        self.config.read().expect("tp lock poisoned").clone()
    }

    pub fn reload(&self) {
        if self.config_path.as_os_str().is_empty() {
            return;
        }
        if let Ok(raw) = std::fs::read_to_string(&self.config_path)
            && let Ok(config) = serde_json::from_str(&raw)
        {
            *self.config.write().expect("tp lock poisoned") = config;
            debug!("TP configuration reloaded");
        }
    }

    fn save(&self) -> Result<()> {
        if self.config_path.as_os_str().is_empty() {
            return Ok(());
        }
        let config = self.config.read().expect("tp lock poisoned");
        super::write_json_atomic(&self.config_path, &*config)
    }
}
