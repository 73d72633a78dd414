//! Scheduled news windows during which matching signals auto-cancel
//! instead of registering a hit.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

const FOREX_CURRENCIES: &[&str] = &[
    "EUR", "USD", "GBP", "JPY", "AUD", "NZD", "CAD", "CHF", "SEK", "NOK", "DKK", "PLN", "HUF",
    "CZK", "MXN", "SGD", "HKD", "ZAR", "TRY",
];

// Metal/commodity prefixes excluded from currency-code matching, so a USD
// event does not cancel XAUUSD.
const METAL_PREFIXES: &[&str] = &["XAU", "XAG", "XPT", "XPD", "BCO", "WTI"];

const GOLD_SYMBOLS: &[&str] = &["XAUUSD", "GOLD"];
const OIL_SYMBOLS: &[&str] = &["USOILSPOT", "USOIL", "WTIUSD", "OIL"];
const BTC_SYMBOLS: &[&str] = &["BTCUSDT", "BTCUSD"];
const ETH_SYMBOLS: &[&str] = &["ETHUSDT", "ETHUSD"];

/// A single news event window. The window is the closed interval
/// `[news_time - window, news_time + window]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsEvent {
    pub event_id: i64,
    pub category: String,
    pub news_time: DateTime<Utc>,
    pub window_minutes: i64,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

impl NewsEvent {
    pub fn start_time(&self) -> DateTime<Utc> {
        self.news_time - Duration::minutes(self.window_minutes)
    }

    pub fn end_time(&self) -> DateTime<Utc> {
        self.news_time + Duration::minutes(self.window_minutes)
    }

    pub fn is_active(&self, at: DateTime<Utc>) -> bool {
        self.start_time() <= at && at <= self.end_time()
    }

    pub fn is_expired(&self, at: DateTime<Utc>) -> bool {
        at > self.end_time()
    }

    /// True if a hit on `instrument` should cancel during this window.
    pub fn affects(&self, instrument: &str) -> bool {
        let cat = self.category.to_uppercase();
        let instr = instrument.to_uppercase();

        if cat == "ALL" {
            return true;
        }

        match cat.as_str() {
            "GOLD" | "XAU" => return GOLD_SYMBOLS.contains(&instr.as_str()),
            "OIL" => return OIL_SYMBOLS.contains(&instr.as_str()),
            "BTC" => return BTC_SYMBOLS.contains(&instr.as_str()),
            "ETH" => return ETH_SYMBOLS.contains(&instr.as_str()),
            "CRYPTO" => return is_crypto_like(&instr),
            _ => {}
        }

        if FOREX_CURRENCIES.contains(&cat.as_str()) {
            // Match a 6-letter forex pair carrying the currency on either
            // side, excluding metal/commodity pairs like XAUUSD.
            if instr.len() == 6 {
                let prefix = &instr[..3];
                let suffix = &instr[3..];
                if METAL_PREFIXES.contains(&prefix) {
                    return false;
                }
                return prefix == cat || suffix == cat;
            }
            return false;
        }

        // Unknown category: treat as an exact-ticker substring match
        instr.contains(&cat)
    }
}

impl fmt::Display for NewsEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[#{}] {} news @ {} (±{} min)",
            self.event_id,
            self.category.to_uppercase(),
            self.news_time.format("%Y-%m-%d %H:%M UTC"),
            self.window_minutes
        )
    }
}

/// Rough crypto check used by the CRYPTO category: quote currency is a
/// stablecoin, or a long BASEUSD ticker that cannot be a forex pair.
fn is_crypto_like(symbol: &str) -> bool {
    symbol.ends_with("USDT")
        || symbol.ends_with("USDC")
        || symbol.ends_with("BTC")
        || (symbol.ends_with("USD") && symbol.len() > 6)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(category: &str) -> NewsEvent {
        NewsEvent {
            event_id: 1,
            category: category.to_string(),
            news_time: Utc::now(),
            window_minutes: 15,
            created_by: "test".to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_window_is_closed_interval() {
        let e = event("USD");
        assert!(e.is_active(e.start_time()));
        assert!(e.is_active(e.end_time()));
        assert!(!e.is_active(e.start_time() - Duration::seconds(1)));
        assert!(!e.is_active(e.end_time() + Duration::seconds(1)));
        assert!(e.is_expired(e.end_time() + Duration::seconds(1)));
        assert!(!e.is_expired(e.end_time()));
    }

    #[test]
    fn test_all_matches_everything() {
        let e = event("all");
        assert!(e.affects("EURUSD"));
        assert!(e.affects("XAUUSD"));
        assert!(e.affects("BTCUSDT"));
    }

    #[test]
    fn test_currency_code_matches_either_side() {
        let e = event("USD");
        assert!(e.affects("EURUSD"));
        assert!(e.affects("USDJPY"));
        assert!(!e.affects("EURGBP"));
    }

    #[test]
    fn test_currency_code_excludes_metal_pairs() {
        let e = event("USD");
        assert!(!e.affects("XAUUSD"));
        assert!(!e.affects("XAGUSD"));
    }

    #[test]
    fn test_named_buckets() {
        assert!(event("gold").affects("XAUUSD"));
        assert!(!event("gold").affects("EURUSD"));
        assert!(event("btc").affects("BTCUSDT"));
        assert!(!event("btc").affects("ETHUSDT"));
        assert!(event("crypto").affects("SOLUSDT"));
        assert!(event("crypto").affects("DOGEUSD"));
        assert!(!event("crypto").affects("EURUSD"));
    }

    #[test]
    fn test_unknown_category_falls_back_to_substring() {
        let e = event("NAS100");
        assert!(e.affects("NAS100USD"));
        assert!(!e.affects("SPX500USD"));
    }
}
