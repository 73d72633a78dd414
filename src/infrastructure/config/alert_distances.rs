//! Approach-alert distance configuration (`config/alert_distances.json`):
//! per-asset-class defaults plus per-symbol overrides, each expressed in
//! pips, dollars, or a percentage of the current price. Older file schemas
//! are migrated in place on first load.

use crate::domain::market::AssetClass;
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
pub enum DistanceType {
    Pips,
    Dollars,
    Percentage,
}

impl fmt::Display for DistanceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DistanceType::Pips => write!(f, "pips"),
            DistanceType::Dollars => write!(f, "dollars"),
            DistanceType::Percentage => write!(f, "percentage"),
        }
    }
}

impl std::str::FromStr for DistanceType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pips" => Ok(DistanceType::Pips),
            "dollars" => Ok(DistanceType::Dollars),
            "percentage" | "percent" => Ok(DistanceType::Percentage),
            _ => anyhow::bail!("Invalid distance type: {}", s),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistanceEntry {
    #[serde(rename = "type")]
    pub distance_type: DistanceType,
    pub value: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub set_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub set_at: Option<DateTime<Utc>>,
}

impl DistanceEntry {
    fn default_entry(distance_type: DistanceType, value: Decimal, description: &str) -> Self {
        Self {
            distance_type,
            value,
            description: Some(description.to_string()),
            set_by: None,
            set_at: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertDistancesFile {
    pub defaults: HashMap<String, DistanceEntry>,
    pub overrides: HashMap<String, DistanceEntry>,
}

impl Default for AlertDistancesFile {
    fn default() -> Self {
        let mut defaults = HashMap::new();
        defaults.insert(
            "forex".to_string(),
            DistanceEntry::default_entry(DistanceType::Pips, dec!(10.0), "Standard forex pairs"),
        );
        defaults.insert(
            "forex_jpy".to_string(),
            DistanceEntry::default_entry(DistanceType::Pips, dec!(20.0), "JPY pairs (auto-detected)"),
        );
        defaults.insert(
            "metals".to_string(),
            DistanceEntry::default_entry(DistanceType::Dollars, dec!(10.0), "Gold, Silver, etc."),
        );
        defaults.insert(
            "indices".to_string(),
            DistanceEntry::default_entry(DistanceType::Percentage, dec!(1.0), "Stock indices"),
        );
        defaults.insert(
            "stocks".to_string(),
            DistanceEntry::default_entry(DistanceType::Percentage, dec!(1.0), "Individual stocks"),
        );
        defaults.insert(
            "crypto".to_string(),
            DistanceEntry::default_entry(DistanceType::Percentage, dec!(0.5), "Cryptocurrencies"),
        );
        defaults.insert(
            "oil".to_string(),
            DistanceEntry::default_entry(DistanceType::Dollars, dec!(0.5), "Oil commodities"),
        );
        Self {
            defaults,
            overrides: HashMap::new(),
        }
    }
}

/// Hardcoded fallback when neither an override nor an asset-class default
/// resolves: 10 pips.
const FALLBACK_PIPS: Decimal = dec!(10.0);

pub struct AlertDistanceConfig {
    config_path: PathBuf,
    config: RwLock<AlertDistancesFile>,
}

impl AlertDistanceConfig {
    pub fn load(config_path: impl AsRef<Path>) -> Self {
        let config_path = config_path.as_ref().to_path_buf();
        let config = Self::load_or_migrate(&config_path);
        info!("AlertDistanceConfig initialized");
        Self {
            config_path,
            config: RwLock::new(config),
        }
    }

    pub fn with_config(config: AlertDistancesFile) -> Self {
        Self {
            config_path: PathBuf::new(),
            config: RwLock::new(config),
        }
    }

    fn load_or_migrate(path: &Path) -> AlertDistancesFile {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(_) => {
                warn!(
                    "Alert distance config not found, creating default: {}",
                    path.display()
                );
                let config = AlertDistancesFile::default();
                if let Err(e) = super::write_json_atomic(path, &config) {
                    error!("Failed to save default alert distances: {}", e);
                }
                return config;
            }
        };

        let value: serde_json::Value = match serde_json::from_str(&raw) {
            Ok(v) => v,
            Err(e) => {
                error!("Invalid JSON in alert distance config: {}, using defaults", e);
                return AlertDistancesFile::default();
            }
        };

        if Self::is_new_format(&value) {
            match serde_json::from_value(value) {
                Ok(config) => config,
                Err(e) => {
                    error!("Malformed alert distance config: {}, using defaults", e);
                    AlertDistancesFile::default()
                }
            }
        } else {
            warn!("Old alert distance config format detected, migrating");
            let migrated = Self::migrate(&value);
            if let Err(e) = super::write_json_atomic(path, &migrated) {
                error!("Failed to persist migrated alert distances: {}", e);
            }
            migrated
        }
    }

    fn is_new_format(value: &serde_json::Value) -> bool {
        let Some(defaults) = value.get("defaults").and_then(|d| d.as_object()) else {
            return false;
        };
        defaults.values().any(|settings| {
            settings.get("type").is_some() && settings.get("value").is_some()
        })
    }

    /// Migrates the two legacy shapes: a flat `{asset_class: number}` map,
    /// and nested entries keyed `approaching_pips` / `approaching_distance`.
    fn migrate(old: &serde_json::Value) -> AlertDistancesFile {
        let mut config = AlertDistancesFile::default();

        let legacy_type = |class: &str| match class {
            "forex" | "forex_jpy" => DistanceType::Pips,
            "metals" | "oil" => DistanceType::Dollars,
            "indices" | "stocks" | "crypto" => DistanceType::Percentage,
            _ => DistanceType::Pips,
        };

        if let Some(defaults) = old.get("defaults").and_then(|d| d.as_object()) {
            for (class, settings) in defaults {
                let Some(settings) = settings.as_object() else {
                    continue;
                };
                let mut distance_type = legacy_type(class);
                let value = if let Some(pips) = settings.get("approaching_pips") {
                    distance_type = DistanceType::Pips;
                    pips.as_f64()
                } else {
                    settings.get("approaching_distance").and_then(|v| v.as_f64())
                };
                if let Some(value) = value
                    && let Some(mut value) = Decimal::from_f64_retain(value)
                {
                    // Old configs carried pip-style magnitudes for what are
                    // now percentage classes; clamp those to sane percents.
                    if distance_type == DistanceType::Percentage && value > dec!(10) {
                        value = if class == "crypto" { dec!(0.5) } else { dec!(1.0) };
                    }
                    if let Some(entry) = config.defaults.get_mut(class.as_str()) {
                        entry.value = value;
                        entry.distance_type = distance_type;
                    }
                }
            }
        } else if let Some(flat) = old.as_object() {
            for (class, value) in flat {
                if class == "overrides" || class == "dynamic_overrides" {
                    continue;
                }
                let Some(value) = value.as_f64().and_then(Decimal::from_f64_retain) else {
                    continue;
                };
                let distance_type = legacy_type(class);
                let mut value = value;
                if distance_type == DistanceType::Percentage && value > dec!(10) {
                    value = if class == "crypto" { dec!(0.5) } else { dec!(1.0) };
                }
                if let Some(entry) = config.defaults.get_mut(class.as_str()) {
                    entry.value = value;
                    entry.distance_type = distance_type;
                }
            }
        }

        for key in ["overrides", "dynamic_overrides"] {
            let Some(overrides) = old.get(key).and_then(|o| o.as_object()) else {
                continue;
            };
            for (symbol, settings) in overrides {
                if config.overrides.contains_key(symbol) {
                    continue;
                }
                let Some(settings) = settings.as_object() else {
                    continue;
                };
                let (distance_type, value) =
                    if let Some(pips) = settings.get("approaching_pips").and_then(|v| v.as_f64()) {
                        (DistanceType::Pips, pips)
                    } else if let Some(dist) = settings
                        .get("approaching_distance")
                        .and_then(|v| v.as_f64())
                    {
                        (DistanceType::Dollars, dist)
                    } else {
                        continue;
                    };
                if let Some(value) = Decimal::from_f64_retain(value) {
                    config.overrides.insert(
                        symbol.clone(),
                        DistanceEntry {
                            distance_type,
                            value,
                            description: None,
                            set_by: Some("Migration".to_string()),
                            set_at: Some(Utc::now()),
                        },
                    );
                }
            }
        }

        info!("Alert distance configuration migrated");
        config
    }

    fn resolve(&self, symbol: &str) -> (DistanceType, Decimal) {
        let upper = symbol.to_uppercase();
        let config = self.config.read().expect("alert distance lock poisoned");

        if let Some(entry) = config.overrides.get(&upper) {
            return (entry.distance_type, entry.value);
        }
        let class = asset_class(&upper);
        if let Some(entry) = config.defaults.get(class.as_str()) {
            return (entry.distance_type, entry.value);
        }
        warn!("No alert distance config for {}, using fallback", upper);
        (DistanceType::Pips, FALLBACK_PIPS)
    }

    /// Effective approach distance in absolute price units.
    pub fn approach_distance(&self, symbol: &str, current_price: Decimal) -> Decimal {
        let (distance_type, value) = self.resolve(symbol);
        match distance_type {
            DistanceType::Pips => value * pip_size(symbol),
            DistanceType::Dollars => value,
            DistanceType::Percentage => value / dec!(100) * current_price,
        }
    }

    /// Formats a raw price-unit distance in the symbol's configured unit
    /// for alert display.
    pub fn format_distance(&self, symbol: &str, distance: Decimal, current_price: Decimal) -> String {
        let (distance_type, _) = self.resolve(symbol);
        match distance_type {
            DistanceType::Pips => {
                let pips = distance / pip_size(symbol);
                format!("{:.1} pips", pips)
            }
            DistanceType::Dollars => format!("${:.2}", distance),
            DistanceType::Percentage => {
                if current_price.is_zero() {
                    return format!("${:.5}", distance);
                }
                let pct = distance / current_price * dec!(100);
                format!("{:.2}%", pct)
            }
        }
    }

    pub fn set_override(
        &self,
        symbol: &str,
        value: Decimal,
        distance_type: DistanceType,
        set_by: &str,
    ) -> Result<()> {
        anyhow::ensure!(value > Decimal::ZERO, "distance value must be positive");
        let upper = symbol.to_uppercase();
        {
            let mut config = self.config.write().expect("alert distance lock poisoned");
            config.overrides.insert(
                upper.clone(),
                DistanceEntry {
                    distance_type,
                    value,
                    description: None,
                    set_by: Some(set_by.to_string()),
                    set_at: Some(Utc::now()),
                },
            );
        }
        self.save()?;
        info!("Set alert distance override: {} = {} {}", upper, value, distance_type);
        Ok(())
    }

    pub fn set_default(
        &self,
        class: AssetClass,
        value: Decimal,
        distance_type: DistanceType,
    ) -> Result<()> {
        anyhow::ensure!(value > Decimal::ZERO, "distance value must be positive");
        {
            let mut config = self.config.write().expect("alert distance lock poisoned");
            let entry = config
                .defaults
                .entry(class.as_str().to_string())
                .or_insert_with(|| DistanceEntry::default_entry(distance_type, value, "Default"));
            entry.value = value;
            entry.distance_type = distance_type;
        }
        self.save()?;
        info!("Set alert distance default: {} = {} {}", class, value, distance_type);
        Ok(())
    }

    pub fn remove_override(&self, symbol: &str) -> Result<bool> {
        let removed = {
            let mut config = self.config.write().expect("alert distance lock poisoned");
            config.overrides.remove(&symbol.to_uppercase()).is_some()
        };
        if removed {
            self.save()?;
            info!("Removed alert distance override: {}", symbol.to_uppercase());
        }
        Ok(removed)
    }

    pub fn snapshot(&self) -> AlertDistancesFile {
        self.config.read().expect("alert distance lock poisoned").clone()
    }

    pub fn reload(&self) {
        if self.config_path.as_os_str().is_empty() {
            return;
        }
        let fresh = Self::load_or_migrate(&self.config_path);
        *self.config.write().expect("alert distance lock poisoned") = fresh;
        debug!("Alert distance configuration reloaded");
    }

    fn save(&self) -> Result<()> {
        if self.config_path.as_os_str().is_empty() {
            return Ok(());
        }
        let config = self.config.read().expect("alert distance lock poisoned");
        super::write_json_atomic(&self.config_path, &*config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pips_distance_in_price_units() {
        let config = AlertDistanceConfig::with_config(AlertDistancesFile::default());
        // 10 pips on EURUSD = 0.0010
        assert_eq!(
            config.approach_distance("EURUSD", dec!(1.0850)),
            dec!(0.0010)
        );
        // 20 pips on USDJPY = 0.20
        assert_eq!(config.approach_distance("USDJPY", dec!(150.00)), dec!(0.200));
    }

    #[test]
    fn test_dollar_and_percentage_distances() {
        let config = AlertDistanceConfig::with_config(AlertDistancesFile::default());
        assert_eq!(config.approach_distance("XAUUSD", dec!(2500)), dec!(10.0));
        // 1% of NAS100USD @ 20000 = 200
        assert_eq!(
            config.approach_distance("NAS100USD", dec!(20000)),
            dec!(200.00)
        );
    }

    #[test]
    fn test_override_beats_default() {
        let config = AlertDistanceConfig::with_config(AlertDistancesFile::default());
        config
            .set_override("EURUSD", dec!(5.0), DistanceType::Pips, "test")
            .unwrap();
        assert_eq!(
            config.approach_distance("EURUSD", dec!(1.0850)),
            dec!(0.00050)
        );
        assert!(config.remove_override("EURUSD").unwrap());
        assert_eq!(
            config.approach_distance("EURUSD", dec!(1.0850)),
            dec!(0.0010)
        );
    }

    #[test]
    fn test_format_distance() {
        let config = AlertDistanceConfig::with_config(AlertDistancesFile::default());
        assert_eq!(
            config.format_distance("EURUSD", dec!(0.0012), dec!(1.0850)),
            "12.0 pips"
        );
        assert_eq!(
            config.format_distance("XAUUSD", dec!(4.5), dec!(2500)),
            "$4.50"
        );
    }

    #[test]
    fn test_migration_from_flat_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alert_distances.json");
        std::fs::write(&path, r#"{"forex": 15.0, "metals": 8.0}"#).unwrap();

        let config = AlertDistanceConfig::load(&path);
        assert_eq!(
            config.approach_distance("EURUSD", dec!(1.0850)),
            dec!(0.00150)
        );
        assert_eq!(config.approach_distance("XAUUSD", dec!(2500)), dec!(8.0));

        // The migrated file must round-trip as new-format
        let reloaded = AlertDistanceConfig::load(&path);
        assert_eq!(
            reloaded.approach_distance("EURUSD", dec!(1.0850)),
            dec!(0.00150)
        );
    }

    #[test]
    fn test_migration_from_nested_legacy_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alert_distances.json");
        std::fs::write(
            &path,
            r#"{
                "defaults": {
                    "forex": {"approaching_pips": 12, "pip_size": 0.0001},
                    "indices": {"approaching_distance": 50, "pip_size": 1.0}
                },
                "overrides": {
                    "GBPUSD": {"approaching_pips": 7}
                }
            }"#,
        )
        .unwrap();

        let config = AlertDistanceConfig::load(&path);
        assert_eq!(
            config.approach_distance("EURUSD", dec!(1.0850)),
            dec!(0.0012)
        );
        // Legacy pip-magnitude index values clamp to 1%
        assert_eq!(
            config.approach_distance("NAS100USD", dec!(20000)),
            dec!(200.00)
        );
        assert_eq!(
            config.approach_distance("GBPUSD", dec!(1.2500)),
            dec!(0.00070)
        );
    }
}
