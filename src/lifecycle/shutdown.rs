//! Shutdown coordination for the invocation server.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, watch};

/// Coordinator for graceful shutdown.
///
/// Provides a broadcast channel that all long-running tasks can subscribe to.
#[derive(Debug, Clone)]
pub struct Shutdown {
    /// Broadcast channel sender.
    tx: broadcast::Sender<()>,
}

impl Shutdown {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    /// Subscribe to the shutdown signal.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Trigger the shutdown signal.
    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// The part of the server the registry needs at shutdown.
#[async_trait]
pub trait ServerHandle: Send + Sync {
    /// Stop accepting connections, let in-flight ones finish, resolve when done.
    async fn close(&self);
}

/// Handle that closes a running [`InvocationServer`](crate::http::InvocationServer).
#[derive(Debug, Clone)]
pub struct ServerControl {
    shutdown: Shutdown,
    closed: watch::Receiver<bool>,
    drain_timeout: Duration,
}

impl ServerControl {
    pub(crate) fn new(shutdown: Shutdown, closed: watch::Receiver<bool>, drain_timeout: Duration) -> Self {
        Self {
            shutdown,
            closed,
            drain_timeout,
        }
    }

    /// Whether the server has stopped serving.
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }
}

#[async_trait]
impl ServerHandle for ServerControl {
    async fn close(&self) {
        tracing::info!(drain_timeout = ?self.drain_timeout, "Closing server");
        self.shutdown.trigger();

        let mut closed = self.closed.clone();
        match tokio::time::timeout(self.drain_timeout, closed.wait_for(|done| *done)).await {
            Ok(Ok(_)) => tracing::info!("Server closed"),
            // Sender dropped: the serve loop is gone either way.
            Ok(Err(_)) => tracing::debug!("Server exited without reporting close"),
            Err(_) => tracing::warn!("Drain timeout elapsed with connections still open"),
        };
    }
}
