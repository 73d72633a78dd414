//! Symbol translation between the internal (database) vocabulary and each
//! feed's dialect, plus asset-class classification and pip sizes.
//!
//! Internal symbols are always uppercase. OANDA splits pairs on the
//! midpoint with an underscore, Binance wants lowercase USDT tickers, and
//! ICMarkets mostly matches the internal spelling.

use crate::domain::errors::MapError;
use crate::domain::market::{AssetClass, Feed};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::{debug, info, warn};

const CRYPTO_TICKERS: &[&str] = &["BTC", "ETH", "BNB", "XRP", "ADA", "DOGE", "SOL", "DOT"];
const METAL_TOKENS: &[&str] = &["XAU", "XAG", "GOLD", "SILVER"];
const OIL_TOKENS: &[&str] = &["WTI", "BRENT", "OIL", "USOIL", "USOILSPOT"];
const INDEX_TOKENS: &[&str] = &[
    "SPX", "NAS", "DOW", "DAX", "CHINA50", "US500", "USTEC", "US30", "US2000", "RUSSEL", "GER30",
    "DE30", "JP225", "NIKKEI",
];
const STOCK_EXCHANGES: &[&str] = &[".NAS", ".NYSE", ".LON"];
const FOREX_CURRENCIES: &[&str] = &[
    "EUR", "USD", "GBP", "JPY", "AUD", "NZD", "CAD", "CHF", "SEK", "NOK", "DKK", "PLN", "HUF",
    "CZK", "MXN", "ZAR", "SGD", "HKD", "CNH", "TRY",
];
const OANDA_SUFFIX_CURRENCIES: &[&str] = &["USD", "EUR", "GBP", "JPY", "AUD", "CAD", "CHF"];

/// Classifies a symbol by inspection alone. Deterministic; no config.
pub fn asset_class(symbol: &str) -> AssetClass {
    let s = symbol.to_uppercase();

    if CRYPTO_TICKERS.iter().any(|t| s.contains(t)) || s.contains("USDT") {
        return AssetClass::Crypto;
    }
    if METAL_TOKENS.iter().any(|t| s.contains(t)) {
        return AssetClass::Metals;
    }
    if OIL_TOKENS.iter().any(|t| s.contains(t)) {
        return AssetClass::Oil;
    }
    if s.contains('.') || STOCK_EXCHANGES.iter().any(|t| s.contains(t)) {
        return AssetClass::Stocks;
    }
    if INDEX_TOKENS.iter().any(|t| s.contains(t)) {
        return AssetClass::Indices;
    }

    let clean = s.replace('/', "");
    if clean.len() == 6 {
        let (base, quote) = clean.split_at(3);
        if FOREX_CURRENCIES.contains(&base) && FOREX_CURRENCIES.contains(&quote) {
            return if clean.contains("JPY") {
                AssetClass::ForexJpy
            } else {
                AssetClass::Forex
            };
        }
        // Unknown 6-letter combinations are treated as exotic pairs
        if clean.chars().all(|c| c.is_ascii_alphabetic()) {
            return if clean.contains("JPY") {
                AssetClass::ForexJpy
            } else {
                AssetClass::Forex
            };
        }
    }

    AssetClass::Forex
}

/// Pip size in price units, a pure function of the symbol.
pub fn pip_size(symbol: &str) -> Decimal {
    let s = symbol.to_uppercase();
    if s.contains("JPY") {
        return dec!(0.01);
    }
    if s.contains("XAU") || s.contains("GOLD") {
        return dec!(0.01);
    }
    if s.contains("XAG") || s.contains("SILVER") {
        return dec!(0.001);
    }
    if s.contains("BTC") {
        return dec!(1.0);
    }
    if INDEX_TOKENS.iter().any(|t| s.contains(t)) {
        return dec!(1.0);
    }
    dec!(0.0001)
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FeedMappings {
    #[serde(default)]
    pub specific_mappings: HashMap<String, String>,
}

/// On-disk shape of `symbol_mappings.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingsConfig {
    #[serde(default)]
    pub feed_priority: HashMap<String, Vec<Feed>>,
    #[serde(default)]
    pub symbol_mappings: HashMap<String, FeedMappings>,
    #[serde(default)]
    pub reverse_mappings: HashMap<String, HashMap<String, String>>,
}

impl Default for MappingsConfig {
    fn default() -> Self {
        let mut feed_priority = HashMap::new();
        feed_priority.insert("forex".to_string(), vec![Feed::IcMarkets, Feed::Oanda]);
        feed_priority.insert("forex_jpy".to_string(), vec![Feed::IcMarkets, Feed::Oanda]);
        feed_priority.insert("indices".to_string(), vec![Feed::Oanda, Feed::IcMarkets]);
        feed_priority.insert("crypto".to_string(), vec![Feed::Binance]);
        feed_priority.insert("metals".to_string(), vec![Feed::IcMarkets]);
        feed_priority.insert("stocks".to_string(), vec![Feed::IcMarkets]);

        let mut icmarkets = FeedMappings::default();
        icmarkets
            .specific_mappings
            .insert("XAUUSD".to_string(), "GOLD".to_string());
        icmarkets
            .specific_mappings
            .insert("XAGUSD".to_string(), "SILVER".to_string());

        let mut symbol_mappings = HashMap::new();
        symbol_mappings.insert("icmarkets".to_string(), icmarkets);
        symbol_mappings.insert("oanda".to_string(), FeedMappings::default());
        symbol_mappings.insert("binance".to_string(), FeedMappings::default());

        Self {
            feed_priority,
            symbol_mappings,
            reverse_mappings: HashMap::new(),
        }
    }
}

/// Bidirectional symbol translator backed by `symbol_mappings.json`.
pub struct SymbolMapper {
    config_path: PathBuf,
    config: RwLock<MappingsConfig>,
}

impl SymbolMapper {
    pub fn load(config_path: impl AsRef<Path>) -> Self {
        let config_path = config_path.as_ref().to_path_buf();
        let config = match std::fs::read_to_string(&config_path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(cfg) => cfg,
                Err(e) => {
                    warn!(
                        "Invalid JSON in {}: {}, using default mappings",
                        config_path.display(),
                        e
                    );
                    MappingsConfig::default()
                }
            },
            Err(_) => {
                debug!(
                    "No symbol mappings file at {}, using defaults",
                    config_path.display()
                );
                MappingsConfig::default()
            }
        };
        info!("SymbolMapper initialized from {}", config_path.display());
        Self {
            config_path,
            config: RwLock::new(config),
        }
    }

    pub fn with_config(config: MappingsConfig) -> Self {
        Self {
            config_path: PathBuf::new(),
            config: RwLock::new(config),
        }
    }

    /// Reload configuration from disk (for the reload-configs command).
    pub fn reload(&self) {
        if self.config_path.as_os_str().is_empty() {
            return;
        }
        if let Ok(raw) = std::fs::read_to_string(&self.config_path)
            && let Ok(cfg) = serde_json::from_str::<MappingsConfig>(&raw)
        {
            *self.config.write().expect("mapper lock poisoned") = cfg;
            info!("SymbolMapper configuration reloaded");
        }
    }

    /// Primary feed for a symbol, from the per-asset-class priority table.
    pub fn best_feed(&self, symbol: &str) -> Result<Feed, MapError> {
        let class = asset_class(symbol);
        if class == AssetClass::Oil {
            return Err(MapError::Unsupported {
                symbol: symbol.to_string(),
                reason: "oil symbols are not supported on any feed".to_string(),
            });
        }
        let config = self.config.read().expect("mapper lock poisoned");
        config
            .feed_priority
            .get(class.as_str())
            .and_then(|feeds| feeds.first().copied())
            .ok_or_else(|| MapError::Unmapped {
                symbol: symbol.to_string(),
            })
    }

    /// Converts an internal symbol to the feed's dialect.
    pub fn to_feed(&self, symbol: &str, feed: Feed) -> Option<String> {
        let upper = symbol.to_uppercase();

        {
            let config = self.config.read().expect("mapper lock poisoned");
            if let Some(mappings) = config.symbol_mappings.get(feed.as_str()) {
                let specific = mappings
                    .specific_mappings
                    .get(&upper)
                    .or_else(|| mappings.specific_mappings.get(&symbol.to_lowercase()));
                if let Some(mapped) = specific {
                    return Some(match feed {
                        Feed::Binance => mapped.to_lowercase(),
                        _ => mapped.clone(),
                    });
                }
            }
        }

        match feed {
            Feed::IcMarkets => Some(upper),
            Feed::Oanda => self.to_oanda(&upper),
            Feed::Binance => Some(Self::to_binance(&upper)),
        }
    }

    fn to_oanda(&self, upper: &str) -> Option<String> {
        let class = asset_class(upper);

        if matches!(class, AssetClass::Forex | AssetClass::ForexJpy) && upper.len() == 6 {
            return Some(format!("{}_{}", &upper[..3], &upper[3..]));
        }

        if class == AssetClass::Indices {
            // JP225 carries no currency suffix in the internal form
            if upper == "JP225" {
                return Some("JP225_USD".to_string());
            }
            for currency in OANDA_SUFFIX_CURRENCIES {
                if let Some(base) = upper.strip_suffix(currency)
                    && !base.is_empty()
                {
                    return Some(format!("{}_{}", base, currency));
                }
            }
            warn!("Could not map index symbol to OANDA: {}", upper);
        }

        None
    }

    fn to_binance(upper: &str) -> String {
        if upper.ends_with("USDT") {
            return upper.to_lowercase();
        }
        if let Some(base) = upper.strip_suffix("USD") {
            return format!("{}USDT", base).to_lowercase();
        }
        format!("{}USDT", upper).to_lowercase()
    }

    /// Converts a feed-dialect symbol back to the internal uppercase form.
    pub fn from_feed(&self, feed_symbol: &str, feed: Feed) -> Option<String> {
        {
            let config = self.config.read().expect("mapper lock poisoned");
            if let Some(reverse) = config.reverse_mappings.get(feed.as_str()) {
                let hit = reverse
                    .get(feed_symbol)
                    .or_else(|| reverse.get(&feed_symbol.to_uppercase()));
                if let Some(internal) = hit {
                    return Some(internal.to_uppercase());
                }
            }
        }

        match feed {
            Feed::IcMarkets => Some(match feed_symbol {
                "GOLD" => "XAUUSD".to_string(),
                "SILVER" => "XAGUSD".to_string(),
                other => other.to_uppercase(),
            }),
            Feed::Oanda => {
                let upper = feed_symbol.to_uppercase();
                if upper == "JP225_USD" {
                    return Some("JP225".to_string());
                }
                Some(upper.replace('_', ""))
            }
            Feed::Binance => Some(feed_symbol.to_uppercase()),
        }
    }

    /// Checks whether a symbol can be routed and translated at all.
    pub fn validate(&self, symbol: &str) -> Result<(), MapError> {
        if symbol.is_empty() {
            return Err(MapError::Unsupported {
                symbol: symbol.to_string(),
                reason: "empty symbol".to_string(),
            });
        }
        let feed = self.best_feed(symbol)?;
        if self.to_feed(symbol, feed).is_none() {
            return Err(MapError::Unmapped {
                symbol: symbol.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapper() -> SymbolMapper {
        SymbolMapper::with_config(MappingsConfig::default())
    }

    #[test]
    fn test_asset_class_forex() {
        assert_eq!(asset_class("EURUSD"), AssetClass::Forex);
        assert_eq!(asset_class("GBPUSD"), AssetClass::Forex);
        assert_eq!(asset_class("USDJPY"), AssetClass::ForexJpy);
        assert_eq!(asset_class("CADJPY"), AssetClass::ForexJpy);
    }

    #[test]
    fn test_asset_class_specials() {
        assert_eq!(asset_class("XAUUSD"), AssetClass::Metals);
        assert_eq!(asset_class("SILVER"), AssetClass::Metals);
        assert_eq!(asset_class("BTCUSDT"), AssetClass::Crypto);
        assert_eq!(asset_class("SOLUSDT"), AssetClass::Crypto);
        assert_eq!(asset_class("NAS100USD"), AssetClass::Indices);
        assert_eq!(asset_class("JP225"), AssetClass::Indices);
        assert_eq!(asset_class("AAPL.NAS"), AssetClass::Stocks);
        assert_eq!(asset_class("USOILSPOT"), AssetClass::Oil);
    }

    #[test]
    fn test_pip_sizes() {
        assert_eq!(pip_size("EURUSD"), dec!(0.0001));
        assert_eq!(pip_size("USDJPY"), dec!(0.01));
        assert_eq!(pip_size("XAUUSD"), dec!(0.01));
        assert_eq!(pip_size("XAGUSD"), dec!(0.001));
        assert_eq!(pip_size("BTCUSDT"), dec!(1.0));
        assert_eq!(pip_size("NAS100USD"), dec!(1.0));
    }

    #[test]
    fn test_best_feed_priorities() {
        let m = mapper();
        assert_eq!(m.best_feed("EURUSD").unwrap(), Feed::IcMarkets);
        assert_eq!(m.best_feed("NAS100USD").unwrap(), Feed::Oanda);
        assert_eq!(m.best_feed("BTCUSDT").unwrap(), Feed::Binance);
        assert_eq!(m.best_feed("XAUUSD").unwrap(), Feed::IcMarkets);
        assert!(m.best_feed("USOILSPOT").is_err());
    }

    #[test]
    fn test_oanda_mapping() {
        let m = mapper();
        assert_eq!(m.to_feed("EURUSD", Feed::Oanda).unwrap(), "EUR_USD");
        assert_eq!(m.to_feed("SPX500USD", Feed::Oanda).unwrap(), "SPX500_USD");
        assert_eq!(m.to_feed("JP225", Feed::Oanda).unwrap(), "JP225_USD");
        assert_eq!(m.to_feed("DE30EUR", Feed::Oanda).unwrap(), "DE30_EUR");
    }

    #[test]
    fn test_binance_mapping_is_lowercase() {
        let m = mapper();
        assert_eq!(m.to_feed("BTCUSDT", Feed::Binance).unwrap(), "btcusdt");
        assert_eq!(m.to_feed("ETHUSD", Feed::Binance).unwrap(), "ethusdt");
    }

    #[test]
    fn test_icmarkets_specific_mappings() {
        let m = mapper();
        assert_eq!(m.to_feed("XAUUSD", Feed::IcMarkets).unwrap(), "GOLD");
        assert_eq!(m.to_feed("EURUSD", Feed::IcMarkets).unwrap(), "EURUSD");
    }

    #[test]
    fn test_round_trip_law() {
        let m = mapper();
        let cases = [
            ("EURUSD", Feed::IcMarkets),
            ("EURUSD", Feed::Oanda),
            ("USDJPY", Feed::Oanda),
            ("SPX500USD", Feed::Oanda),
            ("JP225", Feed::Oanda),
            ("XAUUSD", Feed::IcMarkets),
            ("BTCUSDT", Feed::Binance),
        ];
        for (symbol, feed) in cases {
            let mapped = m.to_feed(symbol, feed).unwrap();
            let back = m.from_feed(&mapped, feed).unwrap();
            assert_eq!(back, symbol, "round trip failed for {symbol} on {feed}");
        }
    }

    #[test]
    fn test_validate_rejects_oil_and_empty() {
        let m = mapper();
        assert!(m.validate("EURUSD").is_ok());
        assert!(m.validate("USOILSPOT").is_err());
        assert!(m.validate("").is_err());
    }
}
