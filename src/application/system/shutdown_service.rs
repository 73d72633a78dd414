//! Cooperative shutdown. Workers subscribe to the shutdown signal and
//! drain voluntarily; whatever has not finished inside the grace window
//! is aborted.

use crate::application::stream::manager::StreamManager;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tracing::{info, warn};

const GRACE_PERIOD: Duration = Duration::from_secs(10);

pub struct ShutdownService {
    shutdown_tx: watch::Sender<bool>,
    handles: Mutex<Vec<tokio::task::JoinHandle<()>>>,
    stream: Arc<StreamManager>,
    grace: Duration,
}

impl ShutdownService {
    pub fn new(stream: Arc<StreamManager>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            shutdown_tx,
            handles: Mutex::new(Vec::new()),
            stream,
            grace: GRACE_PERIOD,
        }
    }

    /// Receiver for workers to select on.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Tracks a worker so it is drained (or aborted) at shutdown.
    pub async fn register(&self, handle: tokio::task::JoinHandle<()>) {
        self.handles.lock().await.push(handle);
    }

    /// Fires the shutdown signal without waiting. The run loop observes it
    /// and performs the actual drain.
    pub fn signal(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// True once the signal has fired.
    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Signals every worker, waits up to the grace window for them to
    /// drain, then aborts stragglers and closes the stream bus.
    pub async fn shutdown(&self) {
        info!("Shutdown initiated, draining workers...");
        let _ = self.shutdown_tx.send(true);

        let deadline = tokio::time::Instant::now() + self.grace;
        let mut handles = self.handles.lock().await;
        for handle in handles.drain(..) {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            let abort = handle.abort_handle();
            match tokio::time::timeout(remaining, handle).await {
                Ok(_) => {}
                Err(_) => {
                    warn!("Worker did not drain within grace period, aborting");
                    abort.abort();
                }
            }
        }

        self.stream.shutdown().await;
        info!("Shutdown complete");
    }
}
