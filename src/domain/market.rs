use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

/// The three streaming feeds the engine can route a symbol to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Feed {
    IcMarkets,
    Oanda,
    Binance,
}

impl Feed {
    pub fn as_str(&self) -> &'static str {
        match self {
            Feed::IcMarkets => "icmarkets",
            Feed::Oanda => "oanda",
            Feed::Binance => "binance",
        }
    }

    pub const ALL: [Feed; 3] = [Feed::IcMarkets, Feed::Oanda, Feed::Binance];
}

impl fmt::Display for Feed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Feed {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "icmarkets" => Ok(Feed::IcMarkets),
            "oanda" => Ok(Feed::Oanda),
            "binance" => Ok(Feed::Binance),
            _ => anyhow::bail!(
                "Invalid feed: {}. Must be 'icmarkets', 'oanda' or 'binance'",
                s
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetClass {
    Forex,
    ForexJpy,
    Metals,
    Indices,
    Stocks,
    Crypto,
    Oil,
}

impl AssetClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetClass::Forex => "forex",
            AssetClass::ForexJpy => "forex_jpy",
            AssetClass::Metals => "metals",
            AssetClass::Indices => "indices",
            AssetClass::Stocks => "stocks",
            AssetClass::Crypto => "crypto",
            AssetClass::Oil => "oil",
        }
    }
}

impl fmt::Display for AssetClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Raw tuple yielded by a feed client, still in the feed's own vocabulary.
#[derive(Debug, Clone)]
pub struct FeedTick {
    pub feed_symbol: String,
    pub bid: Decimal,
    pub ask: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// Canonical price update broadcast by the stream manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub bid: Decimal,
    pub ask: Decimal,
    pub timestamp: DateTime<Utc>,
    pub feed: Feed,
    pub spread: Decimal,
}

impl Quote {
    /// Builds a quote with the spread derived from bid/ask. A negative
    /// spread is clamped to zero; it indicates a crossed or garbled tick.
    pub fn new(
        symbol: impl Into<String>,
        bid: Decimal,
        ask: Decimal,
        timestamp: DateTime<Utc>,
        feed: Feed,
    ) -> Self {
        let symbol = symbol.into();
        let mut spread = ask - bid;
        if spread < Decimal::ZERO {
            warn!("Negative spread for {}: {}, clamping to 0", symbol, spread);
            spread = Decimal::ZERO;
        }
        Self {
            symbol,
            bid,
            ask,
            timestamp,
            feed,
            spread,
        }
    }

    /// Price a signal would fill at: ask for long entries, bid for short.
    pub fn entry_price(&self, direction: crate::domain::signal::Direction) -> Decimal {
        match direction {
            crate::domain::signal::Direction::Long => self.ask,
            crate::domain::signal::Direction::Short => self.bid,
        }
    }

    /// Price a position would close at: bid for long, ask for short.
    pub fn close_price(&self, direction: crate::domain::signal::Direction) -> Decimal {
        match direction {
            crate::domain::signal::Direction::Long => self.bid,
            crate::domain::signal::Direction::Short => self.ask,
        }
    }
}
