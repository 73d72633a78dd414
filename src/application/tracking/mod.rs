pub mod auto_tp;
pub mod checks;
pub mod lifecycle;
pub mod tracker;

pub use auto_tp::AutoTpMonitor;
pub use lifecycle::ExpiryService;
pub use tracker::SignalTracker;
