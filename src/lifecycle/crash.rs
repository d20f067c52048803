//! Crash-response sender.
//!
//! # Responsibilities
//! - Surface the fatal error in the logs (unless silent)
//! - Write a best-effort 500 to the latest in-flight invocation
//! - Run the exit callback once the response had a chance to flush

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::config::CrashConfig;
use crate::http::response::crash_response;
use crate::lifecycle::latest::LatestResponse;
use crate::lifecycle::termination::Terminator;
use crate::lifecycle::FatalError;

/// Terminates the process with a fixed code when invoked.
///
/// Fires at most once; the registry checks [`ExitCallback::fired`] afterwards
/// and terminates itself if a responder dropped the callback.
pub struct ExitCallback {
    code: i32,
    terminator: Arc<dyn Terminator>,
    fired: Arc<AtomicBool>,
}

impl ExitCallback {
    pub fn new(code: i32, terminator: Arc<dyn Terminator>) -> Self {
        Self {
            code,
            terminator,
            fired: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn code(&self) -> i32 {
        self.code
    }

    pub fn invoke(self) {
        if !self.fired.swap(true, Ordering::SeqCst) {
            self.terminator.terminate(self.code);
        }
    }

    pub(crate) fn fired(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.fired)
    }
}

impl std::fmt::Debug for ExitCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExitCallback")
            .field("code", &self.code)
            .field("fired", &self.fired.load(Ordering::SeqCst))
            .finish()
    }
}

/// Everything the crash-response sender needs to know about a fatal condition.
#[derive(Debug)]
pub struct CrashReport {
    pub error: FatalError,
    /// Suppress user-visible error output (clean exits).
    pub silent: bool,
    pub callback: Option<ExitCallback>,
}

/// Error type for crash-response delivery.
#[derive(Debug, thiserror::Error)]
pub enum CrashError {
    /// The invocation stopped waiting before the crash response arrived.
    #[error("invocation {0} is no longer awaiting a response")]
    Disconnected(Uuid),
}

/// Writes a best-effort response describing a fatal condition.
///
/// Implementations invoke `report.callback` (when present) after writing.
#[async_trait]
pub trait CrashResponder: Send + Sync {
    async fn send(&self, report: CrashReport, res: &LatestResponse) -> Result<(), CrashError>;
}

/// Default responder answering the latest invocation with a 500.
#[derive(Debug, Clone)]
pub struct HttpCrashResponder {
    expose_error_details: bool,
    flush_delay: Duration,
}

impl HttpCrashResponder {
    pub fn new(expose_error_details: bool, flush_delay: Duration) -> Self {
        Self {
            expose_error_details,
            flush_delay,
        }
    }

    pub fn from_config(config: &CrashConfig) -> Self {
        Self::new(
            config.expose_error_details,
            Duration::from_millis(config.flush_delay_ms),
        )
    }
}

#[async_trait]
impl CrashResponder for HttpCrashResponder {
    async fn send(&self, report: CrashReport, res: &LatestResponse) -> Result<(), CrashError> {
        let CrashReport {
            error,
            silent,
            callback,
        } = report;

        if !silent {
            tracing::error!(
                error = %error,
                location = error.location().unwrap_or("unknown"),
                "Function crashed"
            );
        }

        let delivery = match res.take() {
            Some(pending) => {
                let id = pending.id();
                match pending.respond(crash_response(&error, self.expose_error_details)) {
                    Ok(()) => {
                        tracing::debug!(invocation_id = %id, "Crash response delivered");
                        // Give the connection task a chance to write it out.
                        tokio::time::sleep(self.flush_delay).await;
                        Ok(())
                    }
                    Err(_) => Err(CrashError::Disconnected(id)),
                }
            }
            None => {
                tracing::debug!("No invocation awaiting a response");
                Ok(())
            }
        };

        if let Some(callback) = callback {
            callback.invoke();
        }
        delivery
    }
}
