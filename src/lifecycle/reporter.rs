//! Delivery of fatal events into the registry's dispatcher.

use std::fmt::Display;
use std::future::Future;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::lifecycle::condition::FatalEvent;
use crate::lifecycle::FatalError;

/// Cheap, cloneable sender for fatal events.
///
/// Safe to use from any thread, including inside a panic hook.
#[derive(Debug, Clone)]
pub struct FatalReporter {
    tx: mpsc::UnboundedSender<FatalEvent>,
}

impl FatalReporter {
    pub(crate) fn new(tx: mpsc::UnboundedSender<FatalEvent>) -> Self {
        Self { tx }
    }

    /// Queue an event. Returns `false` once the dispatcher is gone.
    pub fn deliver(&self, event: FatalEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    /// Report a fault that escaped every handler.
    pub fn uncaught(&self, error: FatalError) {
        self.deliver(FatalEvent::UncaughtException(error));
    }

    /// Report an asynchronous failure nobody is going to handle.
    pub fn report_rejection(&self, error: FatalError) {
        self.deliver(FatalEvent::UnhandledRejection(error));
    }

    /// Request process exit with `code`, running the exit handlers first.
    pub fn exit(&self, code: i32) {
        self.deliver(FatalEvent::ProcessExit(code));
    }

    /// Spawn a background task whose error is treated as an unhandled rejection.
    pub fn spawn_watched<F, E>(&self, name: &'static str, future: F) -> JoinHandle<()>
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let reporter = self.clone();
        tokio::spawn(async move {
            if let Err(e) = future.await {
                tracing::debug!(task = name, error = %e, "Watched task failed");
                reporter.report_rejection(FatalError::new(format!("{name}: {e}")));
            }
        })
    }
}
