pub mod binance;
pub mod icmarkets;
pub mod oanda;

pub use binance::BinanceFeed;
pub use icmarkets::IcMarketsFeed;
pub use oanda::OandaFeed;

use std::time::Duration;

/// Bounded exponential backoff shared by all feed workers: 5s doubling per
/// consecutive failure, capped at 30s.
pub(crate) fn backoff_delay(consecutive_failures: u32) -> Duration {
    let secs = 5u64
        .saturating_mul(2u64.saturating_pow(consecutive_failures))
        .min(30);
    Duration::from_secs(secs)
}
