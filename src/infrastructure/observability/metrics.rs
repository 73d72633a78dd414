//! Prometheus metrics definitions for limitwatch
//!
//! All metrics use the `limitwatch_` prefix and are read-only.

use prometheus::{
    CounterVec, Gauge, Opts, Registry, TextEncoder,
    core::{AtomicF64, GenericGauge},
};
use std::sync::Arc;

/// Prometheus metrics for the signal-tracking engine
#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,
    /// Price updates processed by the stream manager, by feed
    pub price_updates_total: CounterVec,
    /// Per-signal evaluations driven by ticks
    pub signals_checked_total: CounterVec,
    /// Limit hits recorded, by instrument
    pub limits_hit_total: CounterVec,
    /// Stop losses triggered
    pub stop_losses_total: CounterVec,
    /// Alerts emitted, by kind and outcome
    pub alerts_total: CounterVec,
    /// Hits the spread buffer allowed that exact matching would not have
    pub buffer_allowed_total: CounterVec,
    /// Policy vetoes (news, spread hour), by policy
    pub policy_vetoes_total: CounterVec,
    /// Feed reconnection attempts
    pub feed_reconnects_total: CounterVec,
    /// Store call failures observed by the tick handler
    pub store_failures_total: CounterVec,
    /// Signals currently tracked
    pub active_signals: GenericGauge<AtomicF64>,
    /// Symbols currently subscribed on the stream bus
    pub subscribed_symbols: GenericGauge<AtomicF64>,
}

impl Metrics {
    /// Create a new Metrics instance with all gauges and counters registered
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let price_updates_total = CounterVec::new(
            Opts::new(
                "limitwatch_price_updates_total",
                "Price updates processed by feed",
            ),
            &["feed"],
        )?;
        registry.register(Box::new(price_updates_total.clone()))?;

        let signals_checked_total = CounterVec::new(
            Opts::new(
                "limitwatch_signals_checked_total",
                "Per-signal tick evaluations",
            ),
            &["instrument"],
        )?;
        registry.register(Box::new(signals_checked_total.clone()))?;

        let limits_hit_total = CounterVec::new(
            Opts::new("limitwatch_limits_hit_total", "Limit hits recorded"),
            &["instrument"],
        )?;
        registry.register(Box::new(limits_hit_total.clone()))?;

        let stop_losses_total = CounterVec::new(
            Opts::new("limitwatch_stop_losses_total", "Stop losses triggered"),
            &["instrument"],
        )?;
        registry.register(Box::new(stop_losses_total.clone()))?;

        let alerts_total = CounterVec::new(
            Opts::new("limitwatch_alerts_total", "Alerts emitted by kind"),
            &["kind", "outcome"],
        )?;
        registry.register(Box::new(alerts_total.clone()))?;

        let buffer_allowed_total = CounterVec::new(
            Opts::new(
                "limitwatch_buffer_allowed_total",
                "Hits admitted only because of the spread buffer",
            ),
            &["instrument"],
        )?;
        registry.register(Box::new(buffer_allowed_total.clone()))?;

        let policy_vetoes_total = CounterVec::new(
            Opts::new(
                "limitwatch_policy_vetoes_total",
                "Hits vetoed by policy (news, spread hour)",
            ),
            &["policy"],
        )?;
        registry.register(Box::new(policy_vetoes_total.clone()))?;

        let feed_reconnects_total = CounterVec::new(
            Opts::new(
                "limitwatch_feed_reconnects_total",
                "Feed reconnection attempts",
            ),
            &["feed"],
        )?;
        registry.register(Box::new(feed_reconnects_total.clone()))?;

        let store_failures_total = CounterVec::new(
            Opts::new(
                "limitwatch_store_failures_total",
                "Store failures seen by the tick handler",
            ),
            &["operation"],
        )?;
        registry.register(Box::new(store_failures_total.clone()))?;

        let active_signals = Gauge::with_opts(Opts::new(
            "limitwatch_active_signals",
            "Signals currently tracked",
        ))?;
        registry.register(Box::new(active_signals.clone()))?;

        let subscribed_symbols = Gauge::with_opts(Opts::new(
            "limitwatch_subscribed_symbols",
            "Symbols currently subscribed on the stream bus",
        ))?;
        registry.register(Box::new(subscribed_symbols.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            price_updates_total,
            signals_checked_total,
            limits_hit_total,
            stop_losses_total,
            alerts_total,
            buffer_allowed_total,
            policy_vetoes_total,
            feed_reconnects_total,
            store_failures_total,
            active_signals,
            subscribed_symbols,
        })
    }

    /// Render the registry in Prometheus text exposition format
    pub fn export(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        Ok(encoder.encode_to_string(&families)?)
    }
}
