use crate::domain::signal::SignalStatus;
use thiserror::Error;

/// Errors surfaced by feed connectors.
#[derive(Debug, Error)]
pub enum FeedError {
    /// Connection lost, handshake failure, malformed frames. Feed workers
    /// back off and reconnect; the health monitor observes.
    #[error("transient feed failure: {reason}")]
    Transient { reason: String },

    /// Credentials invalid or account unauthorized. The feed is marked
    /// not-configured and never retried.
    #[error("feed not configured: {reason}")]
    NotConfigured { reason: String },

    #[error("feed not connected")]
    NotConnected,

    #[error("symbol {symbol} not available on feed")]
    UnknownSymbol { symbol: String },
}

/// Errors from symbol translation.
#[derive(Debug, Error)]
pub enum MapError {
    #[error("cannot map {symbol} to any available feed")]
    Unmapped { symbol: String },

    #[error("symbol {symbol} not supported: {reason}")]
    Unsupported { symbol: String, reason: String },
}

/// Errors from the signal store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid status transition {from} -> {to} for signal {signal_id}")]
    Conflict {
        signal_id: i64,
        from: SignalStatus,
        to: SignalStatus,
    },

    #[error("signal {signal_id} not found")]
    SignalNotFound { signal_id: i64 },

    #[error("limit {limit_id} not found")]
    LimitNotFound { limit_id: i64 },

    #[error("duplicate message id: {message_id}")]
    DuplicateMessage { message_id: String },

    /// Timeout or connection loss. The affected tick or command is dropped;
    /// no alert is emitted so alert flags stay consistent with the store.
    #[error("store unavailable: {reason}")]
    Unavailable { reason: String },
}

impl StoreError {
    pub fn unavailable(err: impl std::fmt::Display) -> Self {
        StoreError::Unavailable {
            reason: err.to_string(),
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::unavailable(err)
    }
}

/// Errors from JSON config files. Callers log and fall back to defaults
/// rather than crash.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid schema in {path}: {reason}")]
    InvalidSchema { path: String, reason: String },

    #[error("migration of {path} failed: {reason}")]
    MigrationFailed { path: String, reason: String },
}
